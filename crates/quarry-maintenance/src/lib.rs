//! quarry-maintenance — the background loops that keep the inventory honest.
//!
//! Each job is a [`Maintainer`] driven by [`run_maintainer`] on its own
//! interval: abandoned reservations go back to dirty
//! (`reservation_expirer`), retirements older than their window are drained
//! and deactivated (`retired_expirer`, gated by an [`Orchestrator`]), and
//! physical nodes get rolling reboots (`rebooter`).

pub mod maintainer;
pub mod orchestrator;
pub mod rebooter;
pub mod reservation_expirer;
pub mod retired_expirer;

pub use maintainer::{Maintainer, run_maintainer};
pub use orchestrator::{Orchestrator, PermissiveOrchestrator};
pub use rebooter::Rebooter;
pub use reservation_expirer::ReservationExpirer;
pub use retired_expirer::RetiredExpirer;
