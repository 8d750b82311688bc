//! Node selection filters, AND-combined, parseable from query parameters.

use crate::types::{Node, NodeState, NodeType};
use quarry_core::{ClusterId, ClusterType};
use semver::Version;
use std::collections::HashMap;

/// A conjunctive node filter. Unset criteria match everything; `states`
/// empty means any state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeFilter {
    pub hostname: Option<String>,
    pub flavor: Option<String>,
    pub cluster_type: Option<ClusterType>,
    pub cluster_id: Option<ClusterId>,
    pub states: Vec<NodeState>,
    pub node_type: Option<NodeType>,
    pub parent_hostname: Option<String>,
    pub os_version: Option<Version>,
}

impl NodeFilter {
    pub fn new() -> Self {
        NodeFilter::default()
    }

    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = Some(hostname.to_string());
        self
    }

    pub fn with_flavor(mut self, flavor: &str) -> Self {
        self.flavor = Some(flavor.to_string());
        self
    }

    pub fn with_cluster_type(mut self, cluster_type: ClusterType) -> Self {
        self.cluster_type = Some(cluster_type);
        self
    }

    pub fn with_cluster_id(mut self, cluster_id: ClusterId) -> Self {
        self.cluster_id = Some(cluster_id);
        self
    }

    pub fn in_state(mut self, state: NodeState) -> Self {
        self.states.push(state);
        self
    }

    pub fn with_node_type(mut self, node_type: NodeType) -> Self {
        self.node_type = Some(node_type);
        self
    }

    pub fn with_parent_hostname(mut self, parent_hostname: &str) -> Self {
        self.parent_hostname = Some(parent_hostname.to_string());
        self
    }

    pub fn with_os_version(mut self, os_version: Version) -> Self {
        self.os_version = Some(os_version);
        self
    }

    pub fn matches(&self, node: &Node) -> bool {
        if let Some(hostname) = &self.hostname
            && node.hostname != *hostname
        {
            return false;
        }
        if let Some(flavor) = &self.flavor
            && node.flavor.name != *flavor
        {
            return false;
        }
        if !self.states.is_empty() && !self.states.contains(&node.state) {
            return false;
        }
        if let Some(node_type) = self.node_type
            && node.node_type != node_type
        {
            return false;
        }
        if let Some(parent) = &self.parent_hostname
            && node.parent_hostname.as_deref() != Some(parent.as_str())
        {
            return false;
        }
        if let Some(os_version) = &self.os_version
            && node.status.os_version.as_ref() != Some(os_version)
        {
            return false;
        }
        if let Some(cluster_type) = self.cluster_type {
            match &node.allocation {
                Some(a) if a.membership.cluster.cluster_type == cluster_type => {}
                _ => return false,
            }
        }
        if let Some(cluster_id) = &self.cluster_id {
            match &node.allocation {
                Some(a) if a.membership.cluster.id == *cluster_id => {}
                _ => return false,
            }
        }
        true
    }

    /// Build a filter from management API query parameters. Unknown keys are
    /// rejected so typos do not silently select everything.
    pub fn from_params(params: &HashMap<String, String>) -> Result<NodeFilter, String> {
        let mut filter = NodeFilter::new();
        for (key, value) in params {
            match key.as_str() {
                "hostname" => filter.hostname = Some(value.clone()),
                "flavor" => filter.flavor = Some(value.clone()),
                "clusterType" => {
                    filter.cluster_type = Some(
                        ClusterType::parse(value)
                            .ok_or_else(|| format!("unknown cluster type '{value}'"))?,
                    )
                }
                "clusterId" => filter.cluster_id = Some(ClusterId::new(value)),
                "state" => {
                    for part in value.split(',') {
                        let state = NodeState::parse(part.trim())
                            .ok_or_else(|| format!("unknown state '{part}'"))?;
                        filter.states.push(state);
                    }
                }
                "nodeType" => {
                    filter.node_type = Some(
                        NodeType::parse(value)
                            .ok_or_else(|| format!("unknown node type '{value}'"))?,
                    )
                }
                "parentHost" => filter.parent_hostname = Some(value.clone()),
                "osVersion" => {
                    filter.os_version = Some(
                        Version::parse(value).map_err(|e| format!("bad os version: {e}"))?,
                    )
                }
                other => return Err(format!("unknown filter parameter '{other}'")),
            }
        }
        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Allocation, Node};
    use quarry_core::{
        ApplicationId, ClusterMembership, ClusterSpec, Flavor, NodeResources,
    };

    fn test_node(hostname: &str, flavor: &str) -> Node {
        Node::new(
            hostname,
            &format!("id-{hostname}"),
            Flavor::new(flavor, NodeResources::new(4.0, 16.0, 100.0, 1.0)),
            NodeType::Tenant,
        )
    }

    fn allocated_node(hostname: &str, cluster_type: ClusterType, cluster_id: &str) -> Node {
        let mut node = test_node(hostname, "d-4-16");
        let spec = ClusterSpec::new(cluster_type, ClusterId::new(cluster_id));
        node.allocation = Some(Allocation::new(
            ApplicationId::new("vault", "search", "default"),
            ClusterMembership::new(spec, 0),
            NodeResources::new(4.0, 16.0, 100.0, 1.0),
        ));
        node
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(NodeFilter::new().matches(&test_node("a", "d-4-16")));
    }

    #[test]
    fn criteria_combine_with_and() {
        let filter = NodeFilter::new().with_flavor("d-4-16").with_hostname("a");
        assert!(filter.matches(&test_node("a", "d-4-16")));
        assert!(!filter.matches(&test_node("b", "d-4-16")));
        assert!(!filter.matches(&test_node("a", "d-8-64")));
    }

    #[test]
    fn cluster_criteria_require_allocation() {
        let filter = NodeFilter::new().with_cluster_type(ClusterType::Content);
        assert!(!filter.matches(&test_node("free", "d-4-16")));
        assert!(filter.matches(&allocated_node("a", ClusterType::Content, "music")));
        assert!(!filter.matches(&allocated_node("a", ClusterType::Container, "web")));

        let by_id = NodeFilter::new().with_cluster_id(ClusterId::new("music"));
        assert!(by_id.matches(&allocated_node("a", ClusterType::Content, "music")));
        assert!(!by_id.matches(&allocated_node("a", ClusterType::Content, "books")));
    }

    #[test]
    fn parse_from_params() {
        let mut params = HashMap::new();
        params.insert("state".to_string(), "active,reserved".to_string());
        params.insert("clusterType".to_string(), "content".to_string());
        let filter = NodeFilter::from_params(&params).unwrap();
        assert_eq!(filter.states.len(), 2);
        assert_eq!(filter.cluster_type, Some(ClusterType::Content));

        let mut bad = HashMap::new();
        bad.insert("nope".to_string(), "x".to_string());
        assert!(NodeFilter::from_params(&bad).is_err());

        let mut bad_state = HashMap::new();
        bad_state.insert("state".to_string(), "zombie".to_string());
        assert!(NodeFilter::from_params(&bad_state).is_err());
    }
}
