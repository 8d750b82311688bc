//! Builds prioritized candidate lists and runs the engine once per group.
//!
//! Candidate order is policy: the group's own active members first (by
//! index), then reserved and inactive members coming back, then surplus
//! members of removed groups, then free nodes from the ready pool with
//! flavor-compatible ones before resizable ones and hostname as the final
//! tie-break. The highest member index seen anywhere in the cluster is
//! threaded through the groups so new indices stay unique cluster-wide.

use std::collections::HashSet;

use quarry_alloc::{NodeAllocation, NodeCandidate, NodeSpec, can_resize};
use quarry_core::{ApplicationId, Capacity, ClusterSpec, Environment, NodeResources};
use quarry_state::{Node, NodeList, NodeState};
use tracing::debug;

use crate::error::{ProvisionError, ProvisionResult};

/// Run the allocation for every group of one cluster and return the node
/// values to commit.
pub fn prepare_cluster(
    inventory: &NodeList,
    application: &ApplicationId,
    cluster: &ClusterSpec,
    capacity: &Capacity,
    environment: Environment,
) -> ProvisionResult<Vec<Node>> {
    let groups = capacity.max.groups.max(1);
    let per_group_min = (capacity.min.nodes / groups).max(1);
    let per_group_max = (capacity.max.nodes / groups).max(1);
    // Range requests start at the bottom of the range.
    let resources = capacity.min.node_resources;

    let members = inventory.owned_by(application).in_cluster(&cluster.id);
    let mut highest = members.highest_index();

    // Active members of groups the request no longer has. Offered to every
    // surviving group so they can be moved instead of dropped.
    let surplus: Vec<Node> = members
        .in_state(NodeState::Active)
        .into_vec()
        .into_iter()
        .filter(|n| member_group(n).is_none_or(|g| g >= groups))
        .collect();

    let mut committed: Vec<Node> = Vec::new();
    let mut taken: HashSet<String> = HashSet::new();

    for group in 0..groups {
        let spec = NodeSpec::new(per_group_min, per_group_max, resources)
            .with_exclusive(cluster.exclusive)
            .with_can_fail(capacity.can_fail);
        let mut allocation = NodeAllocation::new(
            inventory.clone(),
            application.clone(),
            cluster.clone().with_group(group),
            spec,
            highest,
            environment,
        );
        allocation.offer(build_candidates(inventory, &members, &surplus, group, &resources, &taken));

        if capacity.can_fail && !allocation.fulfilled() {
            return Err(ProvisionError::OutOfCapacity(format!(
                "could not satisfy the request for {per_group_min} nodes of {resources} \
                 in {} group {group}: {}",
                cluster.id,
                allocation.out_of_capacity_details()
            )));
        }

        highest = allocation.highest_index();
        let nodes = allocation.final_nodes();
        debug!(cluster = %cluster.id, group, nodes = nodes.len(), "group prepared");
        taken.extend(nodes.iter().map(|n| n.hostname.clone()));
        committed.extend(nodes);
    }
    Ok(committed)
}

/// One group's candidates, best first.
fn build_candidates(
    inventory: &NodeList,
    members: &NodeList,
    surplus: &[Node],
    group: u32,
    requested: &NodeResources,
    taken: &HashSet<String>,
) -> Vec<NodeCandidate> {
    let mut candidates = Vec::new();

    let mut group_members: Vec<(&Node, u8)> = members
        .iter()
        .filter(|n| !taken.contains(&n.hostname) && member_group(n) == Some(group))
        .filter_map(|n| state_rank(n.state).map(|rank| (n, rank)))
        .collect();
    group_members.sort_by_key(|(n, rank)| (*rank, member_index(n)));
    for (node, _) in group_members {
        candidates.push(NodeCandidate::existing(node.clone(), can_resize(node, requested, inventory)));
    }

    let mut surplus: Vec<&Node> =
        surplus.iter().filter(|n| !taken.contains(&n.hostname)).collect();
    surplus.sort_by_key(|n| member_index(n));
    for node in surplus {
        candidates.push(NodeCandidate::surplus(node.clone(), can_resize(node, requested, inventory)));
    }

    let mut free: Vec<(&Node, bool, bool)> = inventory
        .iter()
        .filter(|n| {
            n.state == NodeState::Ready && !n.is_allocated() && !taken.contains(&n.hostname)
        })
        .map(|n| {
            (n, n.resources().compatible_with(requested), can_resize(n, requested, inventory))
        })
        .filter(|(_, compatible, resizable)| *compatible || *resizable)
        .collect();
    free.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.hostname.cmp(&b.0.hostname)));
    for (node, _, resizable) in free {
        candidates.push(NodeCandidate::ready(node.clone(), resizable));
    }

    candidates
}

fn member_group(node: &Node) -> Option<u32> {
    node.allocation.as_ref().and_then(|a| a.membership.cluster.group)
}

fn member_index(node: &Node) -> u32 {
    node.allocation.as_ref().map_or(0, |a| a.membership.index)
}

/// Activation priority of an already-allocated candidate; states outside the
/// deployment path are never offered.
fn state_rank(state: NodeState) -> Option<u8> {
    match state {
        NodeState::Active => Some(0),
        NodeState::Reserved => Some(1),
        NodeState::Inactive => Some(2),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{ClusterId, ClusterMembership, ClusterType, Flavor};
    use quarry_state::NodeType;

    fn resources() -> NodeResources {
        NodeResources::new(4.0, 16.0, 100.0, 1.0)
    }

    fn app() -> ApplicationId {
        ApplicationId::new("vault", "search", "default")
    }

    fn cluster() -> ClusterSpec {
        ClusterSpec::new(ClusterType::Content, ClusterId::new("music"))
    }

    fn node(hostname: &str, resources: NodeResources, state: NodeState) -> Node {
        let mut node = Node::new(
            hostname,
            &format!("id-{hostname}"),
            Flavor::new("flavor", resources),
            NodeType::Tenant,
        );
        node.state = state;
        node
    }

    fn ready(hostname: &str) -> Node {
        node(hostname, resources(), NodeState::Ready)
    }

    fn member(hostname: &str, index: u32, group: u32, state: NodeState) -> Node {
        let membership = ClusterMembership::new(cluster().with_group(group), index);
        node(hostname, resources(), state).allocate(app(), membership, resources())
    }

    fn prepare(inventory: Vec<Node>, capacity: Capacity) -> ProvisionResult<Vec<Node>> {
        prepare_cluster(
            &NodeList::new(inventory),
            &app(),
            &cluster(),
            &capacity,
            Environment::Production,
        )
    }

    fn placements(nodes: &[Node]) -> Vec<(String, u32, Option<u32>)> {
        let mut placements: Vec<(String, u32, Option<u32>)> = nodes
            .iter()
            .filter_map(|n| {
                n.allocation
                    .as_ref()
                    .map(|a| (n.hostname.clone(), a.membership.index, a.membership.cluster.group))
            })
            .collect();
        placements.sort();
        placements
    }

    #[test]
    fn test_splits_fresh_nodes_across_groups() {
        let inventory = vec![ready("host-a"), ready("host-b"), ready("host-c"), ready("host-d")];
        let nodes = prepare(inventory, Capacity::from_count(4, 2, resources())).unwrap();

        assert_eq!(
            placements(&nodes),
            vec![
                ("host-a".to_string(), 0, Some(0)),
                ("host-b".to_string(), 1, Some(0)),
                ("host-c".to_string(), 2, Some(1)),
                ("host-d".to_string(), 3, Some(1)),
            ]
        );
    }

    #[test]
    fn test_new_groups_continue_the_index_sequence() {
        let inventory = vec![
            member("host-a", 0, 0, NodeState::Active),
            member("host-b", 1, 0, NodeState::Active),
            ready("host-c"),
            ready("host-d"),
        ];
        let nodes = prepare(inventory, Capacity::from_count(4, 2, resources())).unwrap();

        assert_eq!(
            placements(&nodes),
            vec![
                ("host-a".to_string(), 0, Some(0)),
                ("host-b".to_string(), 1, Some(0)),
                ("host-c".to_string(), 2, Some(1)),
                ("host-d".to_string(), 3, Some(1)),
            ]
        );
    }

    #[test]
    fn test_surplus_members_rehome_to_surviving_groups() {
        let inventory = vec![
            member("host-a", 0, 0, NodeState::Active),
            member("host-b", 1, 0, NodeState::Active),
            member("host-c", 2, 1, NodeState::Active),
            member("host-d", 3, 1, NodeState::Active),
        ];
        let nodes = prepare(inventory, Capacity::from_count(4, 1, resources())).unwrap();

        assert_eq!(nodes.len(), 4);
        assert!(nodes.iter().all(|n| {
            n.allocation.as_ref().is_some_and(|a| a.membership.cluster.group == Some(0))
        }));
        let mut indexes: Vec<u32> = nodes
            .iter()
            .filter_map(|n| n.allocation.as_ref().map(|a| a.membership.index))
            .collect();
        indexes.sort_unstable();
        assert_eq!(indexes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_removing_a_group_drops_its_members() {
        let inventory = vec![
            member("host-a", 0, 0, NodeState::Active),
            member("host-b", 1, 0, NodeState::Active),
            member("host-c", 2, 1, NodeState::Active),
            member("host-d", 3, 1, NodeState::Active),
        ];
        // Half the size in one group: the surviving group is already full, so
        // the removed group's members are left out and deactivate on commit.
        let nodes = prepare(inventory, Capacity::from_count(2, 1, resources())).unwrap();

        let mut hostnames: Vec<&str> = nodes.iter().map(|n| n.hostname.as_str()).collect();
        hostnames.sort_unstable();
        assert_eq!(hostnames, vec!["host-a", "host-b"]);
    }

    #[test]
    fn test_reserved_and_inactive_members_return_before_free_nodes() {
        let inventory = vec![
            member("host-a", 0, 0, NodeState::Reserved),
            member("host-b", 1, 0, NodeState::Inactive),
            ready("host-c"),
        ];
        let nodes = prepare(inventory, Capacity::from_count(2, 1, resources())).unwrap();

        let mut hostnames: Vec<&str> = nodes.iter().map(|n| n.hostname.as_str()).collect();
        hostnames.sort_unstable();
        assert_eq!(hostnames, vec!["host-a", "host-b"]);
    }

    #[test]
    fn test_exact_flavor_beats_resizing_a_bigger_node() {
        let host = {
            let flavor = Flavor::new("host", NodeResources::new(16.0, 64.0, 1000.0, 10.0));
            let mut n = Node::new("parent-1", "id-parent-1", flavor, NodeType::Host);
            n.state = NodeState::Active;
            n
        };
        let big_child = node("node-r", NodeResources::new(8.0, 32.0, 200.0, 2.0), NodeState::Ready)
            .with_parent("parent-1");
        let exact = ready("node-z");
        let inventory = vec![host, big_child, exact];

        let nodes = prepare(inventory, Capacity::from_count(1, 1, resources())).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].hostname, "node-z");
    }

    #[test]
    fn test_shortfall_is_out_of_capacity_unless_the_pass_may_not_fail() {
        let inventory = vec![ready("host-a")];
        let err = prepare(inventory.clone(), Capacity::from_count(2, 1, resources()));
        match err {
            Err(ProvisionError::OutOfCapacity(message)) => {
                assert!(message.contains("music"));
                assert!(message.contains("group 0"));
            }
            other => panic!("expected OutOfCapacity, got {other:?}"),
        }

        let bootstrap = Capacity::from_count(2, 1, resources()).can_fail(false);
        let nodes = prepare(inventory, bootstrap).unwrap();
        assert_eq!(nodes.len(), 1);
    }
}
