//! quarry-provision — the deployment path of Quarry.
//!
//! Turns a capacity request into committed node state in three stages:
//! validation and zone sizing (`policies`), per-group allocation (`preparer`
//! driving the engine in `quarry-alloc`), and the transactional
//! prepare/activate cycle (`provisioner`). The `Deployer` seam lets
//! maintenance replay an application's stored target without knowing any of
//! this.

pub mod deploy;
pub mod error;
pub mod policies;
pub mod preparer;
pub mod provisioner;

pub use deploy::{DeployFuture, Deployer, RegistryDeployer};
pub use error::{ProvisionError, ProvisionResult};
pub use provisioner::{ProvisionConfig, Provisioner};
