//! Retirement completion.
//!
//! A commit marks displaced members retired instead of dropping them so the
//! search services on top can drain data off first. Once a retirement is
//! older than the window this maintainer asks the orchestration layer for
//! permission, marks the approved nodes removable, and redeploys the owning
//! application from its stored target. The allocation pass leaves removable
//! members out of the host set and the commit deactivates them.

use std::sync::Arc;
use std::time::Duration;

use quarry_core::ApplicationId;
use quarry_provision::Deployer;
use quarry_state::{NodeList, NodeState, NodeStore};
use tracing::{info, warn};

use crate::maintainer::Maintainer;
use crate::orchestrator::Orchestrator;

pub struct RetiredExpirer {
    store: NodeStore,
    deployer: Arc<dyn Deployer>,
    orchestrator: Arc<dyn Orchestrator>,
    window: Duration,
}

impl RetiredExpirer {
    pub fn new(
        store: NodeStore,
        deployer: Arc<dyn Deployer>,
        orchestrator: Arc<dyn Orchestrator>,
        window: Duration,
    ) -> Self {
        RetiredExpirer { store, deployer, orchestrator, window }
    }

    /// Run one sweep. Applications are handled independently; a failure in
    /// one is logged and the rest still run.
    pub async fn sweep(&self) -> anyhow::Result<()> {
        let now = self.store.clock().now_secs();
        let retired = self.store.list_nodes()?.in_state(NodeState::Active).retired();

        for owner in retired.owners() {
            let candidates = retired.owned_by(&owner);
            if let Err(e) = self.expire_for(&owner, &candidates, now).await {
                warn!(application = %owner, error = %e, "retirement sweep failed");
            }
        }
        Ok(())
    }

    async fn expire_for(
        &self,
        owner: &ApplicationId,
        candidates: &NodeList,
        now: u64,
    ) -> anyhow::Result<()> {
        let mut removable = Vec::new();
        for node in candidates.iter() {
            let retired_at = node.retired_at_secs().unwrap_or(0);
            if now < retired_at + self.window.as_secs() {
                continue;
            }
            if node.allocation.as_ref().is_some_and(|a| a.removable) {
                // Approved on an earlier pass whose redeploy did not finish.
                removable.push(node.hostname.clone());
                continue;
            }
            if self.orchestrator.permission_to_remove(node) {
                removable.push(node.hostname.clone());
            } else {
                info!(
                    application = %owner,
                    hostname = %node.hostname,
                    "removal vetoed, node stays retired"
                );
            }
        }
        if removable.is_empty() {
            return Ok(());
        }

        info!(
            application = %owner,
            nodes = removable.len(),
            "removing expired retirements"
        );
        self.store.set_removable(owner, &removable)?;
        self.deployer.redeploy(owner).await?;
        Ok(())
    }
}

impl Maintainer for RetiredExpirer {
    fn name(&self) -> &'static str {
        "retired-expirer"
    }

    async fn maintain(&mut self) -> anyhow::Result<()> {
        self.sweep().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use quarry_core::{
        ApplicationId, Capacity, ClusterId, ClusterSpec, ClusterType, Environment, Flavor,
        NodeResources, Zone,
    };
    use quarry_provision::{
        DeployFuture, ProvisionConfig, ProvisionError, Provisioner, RegistryDeployer,
    };
    use quarry_state::{Agent, Clock, ClusterDeployment, Node, NodeType};

    use crate::orchestrator::PermissiveOrchestrator;

    const WINDOW: Duration = Duration::from_secs(14_400);

    fn resources() -> NodeResources {
        NodeResources::new(4.0, 16.0, 100.0, 1.0)
    }

    fn app() -> ApplicationId {
        ApplicationId::new("vault", "search", "default")
    }

    fn cluster() -> ClusterSpec {
        ClusterSpec::new(ClusterType::Content, ClusterId::new("music"))
    }

    fn deployment(nodes: u32) -> Vec<ClusterDeployment> {
        vec![ClusterDeployment {
            spec: cluster(),
            capacity: Capacity::from_count(nodes, 1, resources()),
        }]
    }

    fn store_with_nodes(count: usize) -> (Clock, NodeStore) {
        let clock = Clock::manual(1_000);
        let store = NodeStore::open_in_memory(clock.clone()).unwrap();
        for i in 0..count {
            let hostname = format!("host-{i}");
            let node = Node::new(
                &hostname,
                &format!("id-{hostname}"),
                Flavor::new("d-4-16", resources()),
                NodeType::Tenant,
            );
            store.add_nodes(vec![node]).unwrap();
            store.move_to(&hostname, NodeState::Dirty, Agent::Operator).unwrap();
            store.move_to(&hostname, NodeState::Ready, Agent::Operator).unwrap();
        }
        (clock, store)
    }

    fn provisioner(store: &NodeStore) -> Provisioner {
        Provisioner::new(
            store.clone(),
            ProvisionConfig::new(Zone::new(Environment::Production)),
        )
    }

    async fn deploy(store: &NodeStore, nodes: u32) {
        provisioner(store).deploy(&app(), &deployment(nodes)).await.unwrap();
    }

    fn registry_deployer(store: &NodeStore) -> Arc<RegistryDeployer> {
        Arc::new(RegistryDeployer::new(provisioner(store)))
    }

    /// Denies the first `remaining` permission requests, grants after that.
    struct DenyFirst {
        remaining: AtomicU32,
    }

    impl Orchestrator for DenyFirst {
        fn permission_to_remove(&self, _node: &Node) -> bool {
            if self.remaining.load(Ordering::SeqCst) == 0 {
                return true;
            }
            self.remaining.fetch_sub(1, Ordering::SeqCst);
            false
        }
    }

    /// Fails the first `failures` redeploys, then delegates to the registry.
    struct FlakyDeployer {
        inner: RegistryDeployer,
        failures: AtomicU32,
    }

    impl Deployer for FlakyDeployer {
        fn redeploy<'a>(&'a self, application: &'a ApplicationId) -> DeployFuture<'a> {
            Box::pin(async move {
                if self.failures.load(Ordering::SeqCst) > 0 {
                    self.failures.fetch_sub(1, Ordering::SeqCst);
                    return Err(ProvisionError::OutOfCapacity("injected".to_string()));
                }
                self.inner.redeploy(application).await
            })
        }
    }

    #[tokio::test]
    async fn expired_retirement_is_deactivated() {
        let (clock, store) = store_with_nodes(3);
        deploy(&store, 3).await;
        deploy(&store, 2).await;

        let retired = store.get_node("host-2").unwrap().unwrap();
        assert_eq!(retired.state, NodeState::Active);
        assert!(retired.retired());

        clock.advance(20_000);
        let expirer = RetiredExpirer::new(
            store.clone(),
            registry_deployer(&store),
            Arc::new(PermissiveOrchestrator),
            WINDOW,
        );
        expirer.sweep().await.unwrap();

        let gone = store.get_node("host-2").unwrap().unwrap();
        assert_eq!(gone.state, NodeState::Inactive);
        assert!(!gone.retired());
        // the survivors were untouched
        for hostname in ["host-0", "host-1"] {
            let node = store.get_node(hostname).unwrap().unwrap();
            assert_eq!(node.state, NodeState::Active);
            assert!(!node.retired());
        }
    }

    #[tokio::test]
    async fn young_retirements_wait_out_the_window() {
        let (clock, store) = store_with_nodes(3);
        deploy(&store, 3).await;
        deploy(&store, 2).await;

        clock.advance(600);
        let expirer = RetiredExpirer::new(
            store.clone(),
            registry_deployer(&store),
            Arc::new(PermissiveOrchestrator),
            WINDOW,
        );
        expirer.sweep().await.unwrap();

        let still = store.get_node("host-2").unwrap().unwrap();
        assert_eq!(still.state, NodeState::Active);
        assert!(still.retired());
    }

    #[tokio::test]
    async fn a_veto_keeps_the_node_until_granted() {
        let (clock, store) = store_with_nodes(3);
        deploy(&store, 3).await;
        deploy(&store, 2).await;

        clock.advance(20_000);
        let expirer = RetiredExpirer::new(
            store.clone(),
            registry_deployer(&store),
            Arc::new(DenyFirst { remaining: AtomicU32::new(1) }),
            WINDOW,
        );

        expirer.sweep().await.unwrap();
        let vetoed = store.get_node("host-2").unwrap().unwrap();
        assert_eq!(vetoed.state, NodeState::Active);
        assert!(vetoed.retired());

        expirer.sweep().await.unwrap();
        let gone = store.get_node("host-2").unwrap().unwrap();
        assert_eq!(gone.state, NodeState::Inactive);
    }

    #[tokio::test]
    async fn a_failed_redeploy_is_retried_next_sweep() {
        let (clock, store) = store_with_nodes(3);
        deploy(&store, 3).await;
        deploy(&store, 2).await;

        clock.advance(20_000);
        let flaky = FlakyDeployer {
            inner: RegistryDeployer::new(provisioner(&store)),
            failures: AtomicU32::new(1),
        };
        let expirer = RetiredExpirer::new(
            store.clone(),
            Arc::new(flaky),
            Arc::new(PermissiveOrchestrator),
            WINDOW,
        );

        // the failure is contained; the node is approved but still serving
        expirer.sweep().await.unwrap();
        let marked = store.get_node("host-2").unwrap().unwrap();
        assert_eq!(marked.state, NodeState::Active);
        assert!(marked.allocation.as_ref().unwrap().removable);

        expirer.sweep().await.unwrap();
        let gone = store.get_node("host-2").unwrap().unwrap();
        assert_eq!(gone.state, NodeState::Inactive);
    }
}
