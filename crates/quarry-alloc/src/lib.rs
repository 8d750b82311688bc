//! Quarry node allocation engine — candidate selection, retirement, resizing.
//!
//! This crate decides which nodes serve a cluster request. It does NOT read
//! or write the inventory (that's `quarry-provision` driving `quarry-state`);
//! it is handed a snapshot and a prioritized candidate list and produces the
//! node values an allocation pass should commit.
//!
//! # Components
//!
//! - **`spec`** — What one engine run asks for (`NodeSpec`)
//! - **`candidate`** — Candidate nodes and in-place resize feasibility
//! - **`engine`** — The greedy allocator (`NodeAllocation`)
//! - **`limits`** — Minimum viable node resources

pub mod candidate;
pub mod engine;
pub mod limits;
pub mod spec;

pub use candidate::{NodeCandidate, can_resize};
pub use engine::NodeAllocation;
pub use limits::ResourceLimits;
pub use spec::NodeSpec;
