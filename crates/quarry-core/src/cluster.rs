//! Cluster specifications and node membership within them.

use crate::ids::ClusterId;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of work a cluster does. Behavior differences (retire-before-
/// remove, redundancy) are dispatched on this tag through small predicate
/// methods, never through separate types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterType {
    /// Stateless request serving.
    Container,
    /// Stateful data storage and search.
    Content,
    /// Both roles on the same nodes.
    Combined,
}

impl ClusterType {
    /// True for clusters that hold data and must drain before shrinking.
    pub fn is_content(self) -> bool {
        matches!(self, ClusterType::Content | ClusterType::Combined)
    }

    pub fn is_container(self) -> bool {
        matches!(self, ClusterType::Container | ClusterType::Combined)
    }

    pub fn label(self) -> &'static str {
        match self {
            ClusterType::Container => "container",
            ClusterType::Content => "content",
            ClusterType::Combined => "combined",
        }
    }

    pub fn parse(s: &str) -> Option<ClusterType> {
        match s {
            "container" => Some(ClusterType::Container),
            "content" => Some(ClusterType::Content),
            "combined" => Some(ClusterType::Combined),
            _ => None,
        }
    }
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The immutable description of a cluster a deployment asks for: type, id,
/// optionally a concrete group, exclusivity, and the target platform version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub cluster_type: ClusterType,
    pub id: ClusterId,
    pub group: Option<u32>,
    pub exclusive: bool,
    pub version: Option<Version>,
}

impl ClusterSpec {
    pub fn new(cluster_type: ClusterType, id: ClusterId) -> Self {
        ClusterSpec { cluster_type, id, group: None, exclusive: false, version: None }
    }

    pub fn with_group(mut self, group: u32) -> Self {
        self.group = Some(group);
        self
    }

    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Whether a node carrying membership in `self` can serve a request for
    /// `other`: same type and id, compatible versions. Group is deliberately
    /// not part of this; regrouping is a separate, explicit decision.
    pub fn satisfies(&self, other: &ClusterSpec) -> bool {
        self.cluster_type == other.cluster_type
            && self.id == other.id
            && versions_compatible(self.version.as_ref(), other.version.as_ref())
    }
}

fn versions_compatible(a: Option<&Version>, b: Option<&Version>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.major == b.major,
        _ => true,
    }
}

/// A node's slot in a cluster: the spec it was allocated under, its stable
/// member index, and whether it has been marked retired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMembership {
    pub cluster: ClusterSpec,
    pub index: u32,
    pub retired: bool,
}

impl ClusterMembership {
    pub fn new(cluster: ClusterSpec, index: u32) -> Self {
        ClusterMembership { cluster, index, retired: false }
    }

    pub fn retire(mut self) -> Self {
        self.retired = true;
        self
    }

    pub fn unretire(mut self) -> Self {
        self.retired = false;
        self
    }

    pub fn with_cluster(mut self, cluster: ClusterSpec) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.cluster.exclusive = exclusive;
        self
    }
}
