//! Node records: lifecycle state, allocation, status flags, and history.

use quarry_core::{ApplicationId, Capacity, ClusterMembership, ClusterSpec, Flavor, NodeResources};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// History is capped at the newest this-many events per node.
pub const MAX_HISTORY_EVENTS: usize = 32;

/// Where a node is in its life.
///
/// `provisioned → dirty → ready` is the intake path; `ready → reserved →
/// active` is the deployment path; `inactive` holds deactivated nodes whose
/// allocation may be reused; `failed`/`parked` are operator holding pens and
/// `deprovisioned` is the terminal tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Provisioned,
    Dirty,
    Ready,
    Reserved,
    Active,
    Inactive,
    Failed,
    Parked,
    Deprovisioned,
}

impl NodeState {
    /// Legal direct transitions. The deployment path (`reserve`, `activate`)
    /// and the maintainers go through these too; nothing bypasses the table.
    pub fn can_transition_to(self, to: NodeState) -> bool {
        use NodeState::*;
        match self {
            Provisioned => matches!(to, Dirty | Failed | Parked | Deprovisioned),
            Dirty => matches!(to, Ready | Failed | Parked | Deprovisioned),
            Ready => matches!(to, Reserved | Dirty | Failed | Parked),
            Reserved => matches!(to, Active | Dirty | Failed | Parked),
            Active => matches!(to, Inactive | Failed | Parked),
            Inactive => matches!(to, Reserved | Dirty | Failed | Parked),
            Failed => matches!(to, Dirty | Parked | Deprovisioned),
            Parked => matches!(to, Dirty | Failed | Deprovisioned),
            Deprovisioned => false,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            NodeState::Provisioned => "provisioned",
            NodeState::Dirty => "dirty",
            NodeState::Ready => "ready",
            NodeState::Reserved => "reserved",
            NodeState::Active => "active",
            NodeState::Inactive => "inactive",
            NodeState::Failed => "failed",
            NodeState::Parked => "parked",
            NodeState::Deprovisioned => "deprovisioned",
        }
    }

    pub fn parse(s: &str) -> Option<NodeState> {
        match s {
            "provisioned" => Some(NodeState::Provisioned),
            "dirty" => Some(NodeState::Dirty),
            "ready" => Some(NodeState::Ready),
            "reserved" => Some(NodeState::Reserved),
            "active" => Some(NodeState::Active),
            "inactive" => Some(NodeState::Inactive),
            "failed" => Some(NodeState::Failed),
            "parked" => Some(NodeState::Parked),
            "deprovisioned" => Some(NodeState::Deprovisioned),
            _ => None,
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// A node tenant clusters run on (physical or a virtualized child).
    Tenant,
    /// A physical host carrying virtualized tenant nodes.
    Host,
}

impl NodeType {
    pub fn parse(s: &str) -> Option<NodeType> {
        match s {
            "tenant" => Some(NodeType::Tenant),
            "host" => Some(NodeType::Host),
            _ => None,
        }
    }
}

/// A wanted/current counter pair. The control plane bumps `wanted`; the host
/// agent converges `current` towards it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Generation {
    pub wanted: u64,
    pub current: u64,
}

impl Generation {
    pub fn initial() -> Self {
        Generation::default()
    }

    pub fn pending(&self) -> bool {
        self.wanted > self.current
    }

    pub fn bump_wanted(mut self) -> Self {
        self.wanted += 1;
        self
    }
}

/// Status flags and counters outside the allocation itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeStatus {
    pub reboot_generation: Generation,
    pub want_to_retire: bool,
    pub want_to_deprovision: bool,
    pub os_version: Option<Version>,
}

/// A node's current assignment to an application cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub owner: ApplicationId,
    pub membership: ClusterMembership,
    /// The resources the owning cluster asked for, which may differ from the
    /// node's advertised flavor until a resize or replacement converges.
    pub requested_resources: NodeResources,
    pub restart_generation: Generation,
    /// Set by the retirement pipeline once removal is approved; the next
    /// allocation pass skips removable nodes, which deactivates them.
    pub removable: bool,
}

impl Allocation {
    pub fn new(
        owner: ApplicationId,
        membership: ClusterMembership,
        requested_resources: NodeResources,
    ) -> Self {
        Allocation {
            owner,
            membership,
            requested_resources,
            restart_generation: Generation::initial(),
            removable: false,
        }
    }
}

/// Who performed a recorded action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Agent {
    System,
    Operator,
    Application,
    ReservationExpirer,
    RetiredExpirer,
    Rebooter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeEventKind {
    Provisioned,
    Dirtied,
    Readied,
    Reserved,
    Activated,
    Retired,
    Unretired,
    Deactivated,
    Failed,
    Parked,
    Rebooted,
    Deprovisioned,
    RetireRequested,
}

/// One entry in a node's append-only history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEvent {
    pub kind: NodeEventKind,
    pub at_secs: u64,
    pub agent: Agent,
}

/// A node in the inventory. Owned by the `NodeStore`; everything else works
/// on copies and proposes changes back through store operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub hostname: String,
    /// Provider-assigned identity, stable across reinstalls.
    pub id: String,
    pub flavor: Flavor,
    pub node_type: NodeType,
    pub state: NodeState,
    pub parent_hostname: Option<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub allocation: Option<Allocation>,
    pub status: NodeStatus,
    pub history: Vec<NodeEvent>,
}

impl Node {
    pub fn new(hostname: &str, id: &str, flavor: Flavor, node_type: NodeType) -> Self {
        Node {
            hostname: hostname.to_string(),
            id: id.to_string(),
            flavor,
            node_type,
            state: NodeState::Provisioned,
            parent_hostname: None,
            ip_addresses: Vec::new(),
            allocation: None,
            status: NodeStatus::default(),
            history: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent_hostname: &str) -> Self {
        self.parent_hostname = Some(parent_hostname.to_string());
        self
    }

    pub fn with_ip_addresses(mut self, ip_addresses: Vec<IpAddr>) -> Self {
        self.ip_addresses = ip_addresses;
        self
    }

    pub fn resources(&self) -> &NodeResources {
        &self.flavor.resources
    }

    pub fn is_allocated(&self) -> bool {
        self.allocation.is_some()
    }

    /// True when the node's membership is marked retired.
    pub fn retired(&self) -> bool {
        self.allocation.as_ref().is_some_and(|a| a.membership.retired)
    }

    /// Give this node an allocation, consuming and returning it.
    pub fn allocate(
        mut self,
        owner: ApplicationId,
        membership: ClusterMembership,
        requested_resources: NodeResources,
    ) -> Self {
        self.allocation = Some(Allocation::new(owner, membership, requested_resources));
        self
    }

    /// Record an event, dropping the oldest once the cap is reached.
    pub fn record_event(&mut self, kind: NodeEventKind, at_secs: u64, agent: Agent) {
        self.history.push(NodeEvent { kind, at_secs, agent });
        if self.history.len() > MAX_HISTORY_EVENTS {
            let excess = self.history.len() - MAX_HISTORY_EVENTS;
            self.history.drain(..excess);
        }
    }

    /// The newest event of any of the given kinds.
    pub fn last_event_of(&self, kinds: &[NodeEventKind]) -> Option<&NodeEvent> {
        self.history.iter().rev().find(|e| kinds.contains(&e.kind))
    }

    /// When the node's membership most recently became retired, if recorded.
    pub fn retired_at_secs(&self) -> Option<u64> {
        self.last_event_of(&[NodeEventKind::Retired]).map(|e| e.at_secs)
    }

    /// When the node was most recently reserved, if recorded.
    pub fn reserved_at_secs(&self) -> Option<u64> {
        self.last_event_of(&[NodeEventKind::Reserved]).map(|e| e.at_secs)
    }
}

/// The value `prepare` returns for each accepted node and `activate` commits:
/// the node's place in the cluster plus the resource envelopes decided for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSpec {
    pub hostname: String,
    pub membership: ClusterMembership,
    pub requested_resources: NodeResources,
    /// What the node will advertise after this allocation commits; differs
    /// from its current flavor only when the pass resized it.
    pub advertised_resources: NodeResources,
}

/// One cluster of an application's deployment target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDeployment {
    pub spec: ClusterSpec,
    pub capacity: Capacity,
}

/// The most recently activated target for an application, kept so that
/// maintenance can redeploy with the current specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: ApplicationId,
    pub clusters: Vec<ClusterDeployment>,
    pub activated_at_secs: u64,
}
