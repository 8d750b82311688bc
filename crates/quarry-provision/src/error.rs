//! Error taxonomy of the deployment path.

use quarry_state::StateError;
use thiserror::Error;

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The pool cannot satisfy the requested lower bound right now. The
    /// message names every contributing rejection reason. Retryable once
    /// capacity changes.
    #[error("out of capacity: {0}")]
    OutOfCapacity(String),

    /// The request itself is unservable and will never succeed as written.
    #[error("invalid specification: {0}")]
    InvalidSpecification(String),

    /// The inventory moved between prepare and activate; the caller must
    /// prepare again against the new state.
    #[error("activation conflict: {0}")]
    ActivationConflict(String),

    /// The prepare overran its time budget at the named step. Nothing was
    /// activated; leftover reservations expire on their own.
    #[error("out of time budget at {0}")]
    TimeBudget(&'static str),

    #[error("inventory error: {0}")]
    State(#[from] StateError),
}
