//! Rolling reboots.
//!
//! Physical nodes are rebooted on a schedule to pick up kernels and
//! firmware. A node is due once its newest provision or reboot is older
//! than the window; due nodes are then spread over a second window by
//! rebooting each with probability 1/(1+r), where r is the number of
//! passes left before the node is a full window overdue. A node that far
//! gone reboots unconditionally.

use std::time::Duration;

use quarry_state::{Agent, NodeEventKind, NodeFilter, NodeState, NodeStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::maintainer::Maintainer;

pub struct Rebooter {
    store: NodeStore,
    window: Duration,
    interval: Duration,
    rng: StdRng,
}

impl Rebooter {
    pub fn new(store: NodeStore, window: Duration, interval: Duration) -> Self {
        Rebooter::with_seed(store, window, interval, rand::random())
    }

    /// Deterministic spread for tests.
    pub fn with_seed(store: NodeStore, window: Duration, interval: Duration, seed: u64) -> Self {
        Rebooter {
            store,
            window,
            interval,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Run one pass. Returns how many reboots were ordered.
    pub fn reboot_due(&mut self) -> anyhow::Result<u32> {
        let now = self.store.clock().now_secs();
        let window = self.window.as_secs();
        let interval = self.interval.as_secs().max(1);
        let nodes = self
            .store
            .list_nodes()?
            .in_states(&[NodeState::Active, NodeState::Ready]);

        let mut ordered = 0;
        for node in nodes.iter() {
            if node.parent_hostname.is_some() {
                // Virtual nodes ride their parent's reboot.
                continue;
            }
            let last = node
                .last_event_of(&[NodeEventKind::Provisioned, NodeEventKind::Rebooted])
                .map_or(0, |e| e.at_secs);
            if now < last + window {
                continue;
            }
            let passes_left = (last + 2 * window).saturating_sub(now) / interval;
            if passes_left > 0 && !self.rng.random_bool(1.0 / (1.0 + passes_left as f64)) {
                continue;
            }
            let filter = NodeFilter::new().with_hostname(&node.hostname);
            self.store.bump_reboot(&filter, Agent::Rebooter)?;
            info!(hostname = %node.hostname, last_secs = last, "reboot ordered");
            ordered += 1;
        }
        Ok(ordered)
    }
}

impl Maintainer for Rebooter {
    fn name(&self) -> &'static str {
        "rebooter"
    }

    async fn maintain(&mut self) -> anyhow::Result<()> {
        self.reboot_due()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{Flavor, NodeResources};
    use quarry_state::{Clock, Node, NodeType};

    const WINDOW: Duration = Duration::from_secs(1_000);
    const INTERVAL: Duration = Duration::from_secs(100);

    fn flavor() -> Flavor {
        Flavor::new("d-4-16", NodeResources::new(4.0, 16.0, 100.0, 1.0))
    }

    fn add_ready(store: &NodeStore, hostname: &str, parent: Option<&str>) {
        let mut node = Node::new(hostname, &format!("id-{hostname}"), flavor(), NodeType::Tenant);
        if let Some(parent) = parent {
            node = node.with_parent(parent);
        }
        store.add_nodes(vec![node]).unwrap();
        store.move_to(hostname, NodeState::Dirty, Agent::Operator).unwrap();
        store.move_to(hostname, NodeState::Ready, Agent::Operator).unwrap();
    }

    fn rebooter(store: &NodeStore) -> Rebooter {
        Rebooter::with_seed(store.clone(), WINDOW, INTERVAL, 42)
    }

    #[test]
    fn fresh_nodes_are_not_rebooted() {
        let clock = Clock::manual(1_000);
        let store = NodeStore::open_in_memory(clock.clone()).unwrap();
        add_ready(&store, "young", None);

        clock.advance(500);
        assert_eq!(rebooter(&store).reboot_due().unwrap(), 0);
        let node = store.get_node("young").unwrap().unwrap();
        assert_eq!(node.status.reboot_generation.wanted, 0);
    }

    #[test]
    fn far_overdue_nodes_reboot_unconditionally() {
        let clock = Clock::manual(1_000);
        let store = NodeStore::open_in_memory(clock.clone()).unwrap();
        add_ready(&store, "stale", None);

        clock.advance(3_000);
        let mut rebooter = rebooter(&store);
        assert_eq!(rebooter.reboot_due().unwrap(), 1);
        let node = store.get_node("stale").unwrap().unwrap();
        assert_eq!(node.status.reboot_generation.wanted, 1);

        // the recorded reboot resets the schedule
        assert_eq!(rebooter.reboot_due().unwrap(), 0);
    }

    #[test]
    fn due_nodes_are_spread_over_passes() {
        let clock = Clock::manual(1_000);
        let store = NodeStore::open_in_memory(clock.clone()).unwrap();
        for i in 0..50 {
            add_ready(&store, &format!("host-{i}"), None);
        }

        // overdue, one pass left before unconditional: each reboots at 1/2
        clock.advance(1_850);
        let ordered = rebooter(&store).reboot_due().unwrap();
        assert!(ordered > 0, "some node should have been picked");
        assert!(ordered < 50, "the whole fleet must not reboot in one pass");
    }

    #[test]
    fn children_and_parked_nodes_are_skipped() {
        let clock = Clock::manual(1_000);
        let store = NodeStore::open_in_memory(clock.clone()).unwrap();
        add_ready(&store, "metal", None);
        add_ready(&store, "vm-1", Some("metal"));
        add_ready(&store, "bench", None);
        store.move_to("bench", NodeState::Parked, Agent::Operator).unwrap();

        clock.advance(3_000);
        assert_eq!(rebooter(&store).reboot_due().unwrap(), 1);
        let vm = store.get_node("vm-1").unwrap().unwrap();
        assert_eq!(vm.status.reboot_generation.wanted, 0);
        let bench = store.get_node("bench").unwrap().unwrap();
        assert_eq!(bench.status.reboot_generation.wanted, 0);
    }
}
