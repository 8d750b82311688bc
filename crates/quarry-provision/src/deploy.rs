//! The redeploy seam maintenance drives.
//!
//! Maintenance needs "redeploy this application with its current target"
//! without knowing how deployments are orchestrated. `Deployer` is that
//! seam; `RegistryDeployer` is the in-process implementation that replays
//! the stored target through the provisioner.

use std::future::Future;
use std::pin::Pin;

use quarry_core::ApplicationId;
use tracing::debug;

use crate::error::ProvisionResult;
use crate::provisioner::Provisioner;

pub type DeployFuture<'a> = Pin<Box<dyn Future<Output = ProvisionResult<u32>> + Send + 'a>>;

pub trait Deployer: Send + Sync {
    /// Redeploy an application from its current stored target. Returns the
    /// number of hosts in the committed allocation.
    fn redeploy<'a>(&'a self, application: &'a ApplicationId) -> DeployFuture<'a>;
}

pub struct RegistryDeployer {
    provisioner: Provisioner,
}

impl RegistryDeployer {
    pub fn new(provisioner: Provisioner) -> Self {
        RegistryDeployer { provisioner }
    }
}

impl Deployer for RegistryDeployer {
    fn redeploy<'a>(&'a self, application: &'a ApplicationId) -> DeployFuture<'a> {
        Box::pin(async move {
            let Some(record) = self.provisioner.store().get_application(application)? else {
                debug!(%application, "no stored target, nothing to redeploy");
                return Ok(0);
            };
            self.provisioner.deploy(application, &record.clusters).await
        })
    }
}
