//! The capacity a deployment requests for one cluster.

use crate::resources::{ClusterResources, NodeResources};
use serde::{Deserialize, Serialize};

/// A capacity request: a range of acceptable cluster sizes plus deployment
/// policy knobs.
///
/// `required` requests are never reduced by zone policy (dev and test zones
/// normally shrink requests to a single node). `can_fail` is false for
/// bootstrap-style deployments that must proceed with whatever they can get
/// and must not churn retirement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Capacity {
    pub min: ClusterResources,
    pub max: ClusterResources,
    pub required: bool,
    pub can_fail: bool,
}

impl Capacity {
    /// A fixed-size request: exactly `nodes` in `groups` groups.
    pub fn from_count(nodes: u32, groups: u32, node_resources: NodeResources) -> Self {
        let size = ClusterResources::new(nodes, groups, node_resources);
        Capacity { min: size, max: size, required: false, can_fail: true }
    }

    pub fn between(min: ClusterResources, max: ClusterResources) -> Self {
        Capacity { min, max, required: false, can_fail: true }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn can_fail(mut self, can_fail: bool) -> Self {
        self.can_fail = can_fail;
        self
    }
}
