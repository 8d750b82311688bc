//! quarry-state — persistent node inventory for Quarry.
//!
//! Backed by [redb](https://docs.rs/redb), holds every node record and the
//! per-application deployment targets, persistent or in-memory.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns,
//! keyed by hostname (nodes) or serialized application id (applications).
//!
//! The `NodeStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. It also owns the process-wide
//! allocation locks: the per-application lock and the unallocated-pool lock
//! that serialize the read-decide-write cycle of an allocation pass.

pub mod clock;
pub mod error;
pub mod filter;
pub mod list;
pub mod lock;
pub mod store;
pub mod tables;
pub mod types;

pub use clock::Clock;
pub use error::{StateError, StateResult};
pub use filter::NodeFilter;
pub use list::NodeList;
pub use lock::{AllocationLock, ApplicationLock};
pub use store::NodeStore;
pub use types::*;
