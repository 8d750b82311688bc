//! Resource envelopes for nodes and clusters.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskSpeed {
    Fast,
    Slow,
    /// Matches either; used in requests that do not care.
    Any,
}

impl DiskSpeed {
    pub fn compatible_with(self, other: DiskSpeed) -> bool {
        self == DiskSpeed::Any || other == DiskSpeed::Any || self == other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    /// Storage on the node itself, lost if the node is rebuilt.
    Local,
    /// Network-attached storage that survives the node.
    Remote,
    Any,
}

impl StorageType {
    pub fn compatible_with(self, other: StorageType) -> bool {
        self == StorageType::Any || other == StorageType::Any || self == other
    }
}

/// The resource envelope of a single node: what it has, or what is asked of it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeResources {
    pub vcpu: f64,
    pub memory_gb: f64,
    pub disk_gb: f64,
    pub bandwidth_gbps: f64,
    pub disk_speed: DiskSpeed,
    pub storage_type: StorageType,
}

impl NodeResources {
    pub fn new(vcpu: f64, memory_gb: f64, disk_gb: f64, bandwidth_gbps: f64) -> Self {
        NodeResources {
            vcpu,
            memory_gb,
            disk_gb,
            bandwidth_gbps,
            disk_speed: DiskSpeed::Fast,
            storage_type: StorageType::Any,
        }
    }

    pub fn with_disk_speed(mut self, disk_speed: DiskSpeed) -> Self {
        self.disk_speed = disk_speed;
        self
    }

    pub fn with_storage_type(mut self, storage_type: StorageType) -> Self {
        self.storage_type = storage_type;
        self
    }

    /// True when these resources can serve in a cluster requesting `requested`.
    ///
    /// Numeric dimensions must match exactly: clusters are kept homogeneous,
    /// so a larger node is not a substitute for the requested size (it may be
    /// resizable to it, which is a separate decision). Disk speed and storage
    /// type match through the `Any` wildcard.
    pub fn compatible_with(&self, requested: &NodeResources) -> bool {
        self.vcpu == requested.vcpu
            && self.memory_gb == requested.memory_gb
            && self.disk_gb == requested.disk_gb
            && self.bandwidth_gbps == requested.bandwidth_gbps
            && self.disk_speed.compatible_with(requested.disk_speed)
            && self.storage_type.compatible_with(requested.storage_type)
    }

    /// True when every dimension of `other` fits inside these resources.
    pub fn satisfies(&self, other: &NodeResources) -> bool {
        self.vcpu >= other.vcpu
            && self.memory_gb >= other.memory_gb
            && self.disk_gb >= other.disk_gb
            && self.bandwidth_gbps >= other.bandwidth_gbps
            && self.disk_speed.compatible_with(other.disk_speed)
            && self.storage_type.compatible_with(other.storage_type)
    }

    /// These resources minus `other`, clamped at zero per dimension.
    /// Traits (disk speed, storage type) are kept from `self`.
    pub fn minus(&self, other: &NodeResources) -> NodeResources {
        NodeResources {
            vcpu: (self.vcpu - other.vcpu).max(0.0),
            memory_gb: (self.memory_gb - other.memory_gb).max(0.0),
            disk_gb: (self.disk_gb - other.disk_gb).max(0.0),
            bandwidth_gbps: (self.bandwidth_gbps - other.bandwidth_gbps).max(0.0),
            disk_speed: self.disk_speed,
            storage_type: self.storage_type,
        }
    }
}

impl fmt::Display for NodeResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[vcpu: {}, memory: {} Gb, disk: {} Gb, bandwidth: {} Gbps]",
            self.vcpu, self.memory_gb, self.disk_gb, self.bandwidth_gbps
        )
    }
}

/// Cluster-level resources: node and group counts plus the per-node envelope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterResources {
    pub nodes: u32,
    pub groups: u32,
    pub node_resources: NodeResources,
}

impl ClusterResources {
    pub fn new(nodes: u32, groups: u32, node_resources: NodeResources) -> Self {
        ClusterResources { nodes, groups, node_resources }
    }
}
