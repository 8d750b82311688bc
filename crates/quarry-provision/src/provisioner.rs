//! The deployment path: prepare, activate, remove.
//!
//! `prepare` decides and reserves, `activate` commits; between the two the
//! inventory may move, which `activate` reports as a conflict rather than
//! resolving silently. Each call takes the per-application lock for its own
//! duration, and `prepare` additionally holds the unallocated-pool lock
//! around the read-decide-reserve sequence so concurrent applications do not
//! hand out the same free node twice.

use std::time::{Duration, Instant};

use quarry_core::{ApplicationId, Capacity, ClusterSpec, Zone};
use quarry_state::{ApplicationRecord, ClusterDeployment, HostSpec, Node, NodeState, NodeStore, StateError};
use tracing::{debug, info};

use crate::error::{ProvisionError, ProvisionResult};
use crate::{policies, preparer};

/// Knobs of the deployment path.
#[derive(Debug, Clone, Copy)]
pub struct ProvisionConfig {
    pub zone: Zone,
    /// How long to wait for inventory locks before giving up.
    pub lock_wait: Duration,
    /// Overall wall-clock budget for one prepare.
    pub prepare_budget: Duration,
}

impl ProvisionConfig {
    pub fn new(zone: Zone) -> Self {
        ProvisionConfig {
            zone,
            lock_wait: Duration::from_secs(10),
            prepare_budget: Duration::from_secs(60),
        }
    }

    pub fn with_prepare_budget(mut self, budget: Duration) -> Self {
        self.prepare_budget = budget;
        self
    }
}

/// Tracks the prepare deadline. Checked at step boundaries only; the
/// allocation itself is cheap enough that it is never interrupted.
struct TimeBudget {
    deadline: Instant,
}

impl TimeBudget {
    fn start(budget: Duration) -> Self {
        TimeBudget { deadline: Instant::now() + budget }
    }

    fn check(&self, step: &'static str) -> ProvisionResult<()> {
        if Instant::now() >= self.deadline {
            return Err(ProvisionError::TimeBudget(step));
        }
        Ok(())
    }
}

pub struct Provisioner {
    store: NodeStore,
    config: ProvisionConfig,
}

impl Provisioner {
    pub fn new(store: NodeStore, config: ProvisionConfig) -> Self {
        Provisioner { store, config }
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    /// Decide and reserve the nodes serving one cluster. Returns the host set
    /// to pass to `activate`; nothing serves yet, and a prepare that is never
    /// activated is rolled back by reservation expiry.
    pub async fn prepare(
        &self,
        application: &ApplicationId,
        cluster: &ClusterSpec,
        capacity: Capacity,
    ) -> ProvisionResult<Vec<HostSpec>> {
        policies::validate(&self.config.zone, cluster, &capacity)?;
        let capacity = policies::effective_capacity(&self.config.zone, capacity);

        let budget = TimeBudget::start(self.config.prepare_budget);
        budget.check("pre-allocation")?;

        let _application_lock =
            self.store.lock_application(application, self.config.lock_wait).await?;
        let _pool_lock = self.store.lock_unallocated(self.config.lock_wait).await?;

        let inventory = self.store.list_nodes()?;
        let accepted = preparer::prepare_cluster(
            &inventory,
            application,
            cluster,
            &capacity,
            self.config.zone.environment,
        )?;
        budget.check("post-allocation")?;

        // Only nodes not yet serving need a reservation; membership changes
        // of active members commit at activation.
        let proposals: Vec<Node> =
            accepted.iter().filter(|n| n.state != NodeState::Active).cloned().collect();
        if !proposals.is_empty() {
            self.store.reserve(application, &proposals)?;
        }
        budget.check("post-commit")?;

        let mut hosts: Vec<HostSpec> = accepted
            .into_iter()
            .filter_map(|node| {
                let allocation = node.allocation.as_ref()?;
                Some(HostSpec {
                    hostname: node.hostname.clone(),
                    membership: allocation.membership.clone(),
                    requested_resources: allocation.requested_resources,
                    advertised_resources: node.flavor.resources,
                })
            })
            .collect();
        hosts.sort_by_key(|h| (h.membership.cluster.group, h.membership.index));
        info!(
            %application,
            cluster = %cluster.id,
            hosts = hosts.len(),
            reserved = proposals.len(),
            "prepared"
        );
        Ok(hosts)
    }

    /// Commit a prepared host set and record the application's target.
    pub async fn activate(
        &self,
        application: &ApplicationId,
        clusters: &[ClusterDeployment],
        hosts: &[HostSpec],
    ) -> ProvisionResult<u32> {
        let _application_lock =
            self.store.lock_application(application, self.config.lock_wait).await?;

        let inventory = self.store.list_nodes()?;
        for host in hosts {
            let node = inventory.get(&host.hostname).ok_or_else(|| {
                ProvisionError::ActivationConflict(format!(
                    "{} disappeared after prepare",
                    host.hostname
                ))
            })?;
            let ours = node.allocation.as_ref().is_some_and(|a| a.owner == *application);
            let held = matches!(node.state, NodeState::Reserved | NodeState::Active);
            if !ours || !held {
                return Err(ProvisionError::ActivationConflict(format!(
                    "{} is no longer held by this application",
                    host.hostname
                )));
            }
        }

        let count = self.store.activate(application, hosts).map_err(|e| match e {
            StateError::Conflict(message) => ProvisionError::ActivationConflict(message),
            other => ProvisionError::State(other),
        })?;

        let record = ApplicationRecord {
            id: application.clone(),
            clusters: clusters.to_vec(),
            activated_at_secs: self.store.clock().now_secs(),
        };
        self.store.put_application(&record)?;
        info!(%application, hosts = count, "activated");
        Ok(count)
    }

    /// Prepare every cluster of a deployment, then activate the union: one
    /// full deployment cycle.
    pub async fn deploy(
        &self,
        application: &ApplicationId,
        clusters: &[ClusterDeployment],
    ) -> ProvisionResult<u32> {
        let mut hosts = Vec::new();
        for cluster in clusters {
            hosts.extend(self.prepare(application, &cluster.spec, cluster.capacity).await?);
        }
        debug!(%application, clusters = clusters.len(), hosts = hosts.len(), "deploying");
        self.activate(application, clusters, &hosts).await
    }

    /// Take an application out of service and forget its target. Returns how
    /// many nodes changed state.
    pub async fn remove(&self, application: &ApplicationId) -> ProvisionResult<u32> {
        let _application_lock =
            self.store.lock_application(application, self.config.lock_wait).await?;
        let changed = self.store.deactivate_application(application)?;
        self.store.delete_application(application)?;
        info!(%application, nodes = changed, "removed");
        Ok(changed)
    }
}
