//! Chainable queries over a snapshot of nodes.

use crate::filter::NodeFilter;
use crate::types::{Node, NodeState};
use quarry_core::{ApplicationId, ClusterId};

/// An immutable snapshot of nodes with combinators for the questions the
/// allocation and maintenance paths keep asking. Combinators clone the
/// matching records; snapshots are small and short-lived.
#[derive(Debug, Clone, Default)]
pub struct NodeList {
    nodes: Vec<Node>,
}

impl NodeList {
    pub fn new(nodes: Vec<Node>) -> Self {
        NodeList { nodes }
    }

    pub fn owned_by(&self, application: &ApplicationId) -> NodeList {
        self.select(|n| {
            n.allocation.as_ref().is_some_and(|a| a.owner == *application)
        })
    }

    pub fn in_cluster(&self, cluster_id: &ClusterId) -> NodeList {
        self.select(|n| {
            n.allocation
                .as_ref()
                .is_some_and(|a| a.membership.cluster.id == *cluster_id)
        })
    }

    pub fn in_state(&self, state: NodeState) -> NodeList {
        self.select(|n| n.state == state)
    }

    pub fn in_states(&self, states: &[NodeState]) -> NodeList {
        self.select(|n| states.contains(&n.state))
    }

    pub fn children_of(&self, parent_hostname: &str) -> NodeList {
        self.select(|n| n.parent_hostname.as_deref() == Some(parent_hostname))
    }

    pub fn retired(&self) -> NodeList {
        self.select(|n| n.retired())
    }

    pub fn not_retired(&self) -> NodeList {
        self.select(|n| !n.retired())
    }

    pub fn matching(&self, filter: &NodeFilter) -> NodeList {
        self.select(|n| filter.matches(n))
    }

    /// The highest member index among allocated nodes, across all states.
    pub fn highest_index(&self) -> Option<u32> {
        self.nodes
            .iter()
            .filter_map(|n| n.allocation.as_ref().map(|a| a.membership.index))
            .max()
    }

    /// Owning applications of all allocated nodes, deduplicated.
    pub fn owners(&self) -> Vec<ApplicationId> {
        let mut owners: Vec<ApplicationId> = self
            .nodes
            .iter()
            .filter_map(|n| n.allocation.as_ref().map(|a| a.owner.clone()))
            .collect();
        owners.sort();
        owners.dedup();
        owners
    }

    pub fn hostnames(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.hostname.clone()).collect()
    }

    pub fn get(&self, hostname: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.hostname == hostname)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn as_slice(&self) -> &[Node] {
        &self.nodes
    }

    pub fn into_vec(self) -> Vec<Node> {
        self.nodes
    }

    fn select(&self, predicate: impl Fn(&Node) -> bool) -> NodeList {
        NodeList { nodes: self.nodes.iter().filter(|n| predicate(n)).cloned().collect() }
    }
}

impl FromIterator<Node> for NodeList {
    fn from_iter<T: IntoIterator<Item = Node>>(iter: T) -> Self {
        NodeList { nodes: iter.into_iter().collect() }
    }
}

impl IntoIterator for NodeList {
    type Item = Node;
    type IntoIter = std::vec::IntoIter<Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}
