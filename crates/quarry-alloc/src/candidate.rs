//! Candidate nodes offered to the allocation engine.

use quarry_core::NodeResources;
use quarry_state::{Node, NodeList};

/// One node offered to the engine, with the context flags the engine cannot
/// derive from the node record alone.
#[derive(Debug, Clone)]
pub struct NodeCandidate {
    pub node: Node,
    /// An active member of a group the request no longer has; may be moved
    /// into a remaining group instead of being retired.
    pub is_surplus: bool,
    /// A free node that would join the cluster for the first time.
    pub is_new: bool,
    /// Whether the node can be resized in place to the requested resources.
    pub is_resizable: bool,
}

impl NodeCandidate {
    /// A node already allocated to the requesting application.
    pub fn existing(node: Node, is_resizable: bool) -> Self {
        NodeCandidate { node, is_surplus: false, is_new: false, is_resizable }
    }

    /// An active member whose group was removed from the request.
    pub fn surplus(node: Node, is_resizable: bool) -> Self {
        NodeCandidate { node, is_surplus: true, is_new: false, is_resizable }
    }

    /// A free node from the ready pool.
    pub fn ready(node: Node, is_resizable: bool) -> Self {
        NodeCandidate { node, is_surplus: false, is_new: true, is_resizable }
    }
}

/// Whether `node` can be resized in place to `requested`.
///
/// Only virtualized children can: the node keeps its identity and data while
/// its share of the parent host changes. The new size must fit in what the
/// parent has left once every *other* child's share is subtracted (this
/// node's own share is returned to the pool by the resize), and the node's
/// physical disk traits must be able to serve the request.
pub fn can_resize(node: &Node, requested: &NodeResources, inventory: &NodeList) -> bool {
    let Some(parent_hostname) = node.parent_hostname.as_deref() else {
        return false;
    };
    if node.resources().compatible_with(requested) {
        return false;
    }
    if !node.resources().disk_speed.compatible_with(requested.disk_speed)
        || !node.resources().storage_type.compatible_with(requested.storage_type)
    {
        return false;
    }
    let Some(parent) = inventory.get(parent_hostname) else {
        return false;
    };
    let mut free = *parent.resources();
    for sibling in inventory.children_of(parent_hostname).iter() {
        if sibling.hostname == node.hostname {
            continue;
        }
        free = free.minus(sibling.resources());
    }
    free.satisfies(requested)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{DiskSpeed, Flavor};
    use quarry_state::NodeType;

    fn host(hostname: &str, vcpu: f64, memory_gb: f64) -> Node {
        let flavor = Flavor::new("host", NodeResources::new(vcpu, memory_gb, 1000.0, 10.0));
        Node::new(hostname, &format!("id-{hostname}"), flavor, NodeType::Host)
    }

    fn child(hostname: &str, parent: &str, vcpu: f64, memory_gb: f64) -> Node {
        let flavor = Flavor::new("child", NodeResources::new(vcpu, memory_gb, 100.0, 1.0));
        Node::new(hostname, &format!("id-{hostname}"), flavor, NodeType::Tenant).with_parent(parent)
    }

    #[test]
    fn test_resize_fits_in_parent_headroom() {
        let inventory = NodeList::new(vec![
            host("parent-1", 16.0, 64.0),
            child("node-1", "parent-1", 4.0, 16.0),
            child("node-2", "parent-1", 4.0, 16.0),
        ]);
        let node = inventory.get("node-1").unwrap();
        // parent has 16 vcpu; node-2 holds 4, so up to 12 are available
        assert!(can_resize(node, &NodeResources::new(8.0, 32.0, 100.0, 1.0), &inventory));
        assert!(!can_resize(node, &NodeResources::new(14.0, 32.0, 100.0, 1.0), &inventory));
    }

    #[test]
    fn test_physical_nodes_never_resize() {
        let inventory = NodeList::new(vec![host("parent-1", 16.0, 64.0)]);
        let node = inventory.get("parent-1").unwrap();
        assert!(!can_resize(node, &NodeResources::new(8.0, 32.0, 1000.0, 10.0), &inventory));
    }

    #[test]
    fn test_same_size_is_not_a_resize() {
        let inventory = NodeList::new(vec![
            host("parent-1", 16.0, 64.0),
            child("node-1", "parent-1", 4.0, 16.0),
        ]);
        let node = inventory.get("node-1").unwrap();
        assert!(!can_resize(node, &NodeResources::new(4.0, 16.0, 100.0, 1.0), &inventory));
    }

    #[test]
    fn test_disk_traits_must_serve_the_request() {
        let inventory = NodeList::new(vec![
            host("parent-1", 16.0, 64.0),
            child("node-1", "parent-1", 4.0, 16.0),
        ]);
        let node = inventory.get("node-1").unwrap();
        // a fast-disk node cannot serve an explicitly slow-disk request
        let slow = NodeResources::new(8.0, 32.0, 100.0, 1.0).with_disk_speed(DiskSpeed::Slow);
        assert!(!can_resize(node, &slow, &inventory));
    }
}
