//! The node allocation engine.
//!
//! One engine run satisfies one group of one cluster. The caller offers a
//! prioritized candidate list; the engine walks it once, greedily accepting
//! or rejecting each candidate, then reconciles retirement counts and hands
//! back the node values to commit.
//!
//! Acceptance is stateful: earlier accepts constrain later ones (parent-host
//! spread, saturation), so candidate order is policy and the caller owns it.

use std::collections::HashSet;

use quarry_core::{ApplicationId, ClusterMembership, ClusterSpec, Environment};
use quarry_state::{Allocation, Node, NodeList, NodeState};
use tracing::debug;

use crate::candidate::NodeCandidate;
use crate::limits::ResourceLimits;
use crate::spec::NodeSpec;

/// Greedy allocator for one cluster group.
pub struct NodeAllocation {
    /// Every node in the zone, for exclusivity checks against other tenants.
    inventory: NodeList,
    application: ApplicationId,
    cluster: ClusterSpec,
    requested: NodeSpec,
    environment: Environment,
    limits: ResourceLimits,
    /// Accepted candidates in acceptance order, already carrying the
    /// allocation values that would be committed.
    nodes: Vec<NodeCandidate>,
    /// Member indexes seen so far; an index is never handed out twice.
    indexes: HashSet<u32>,
    /// Highest member index observed anywhere in the cluster, including nodes
    /// outside this run. New members get the next index above it.
    highest_index: Option<u32>,
    accepted: u32,
    accepted_without_resizing_retired: u32,
    rejected_due_to_exclusivity: u32,
    rejected_due_to_clashing_parent_host: u32,
    rejected_due_to_insufficient_resources: u32,
    was_retired_just_now: u32,
}

impl NodeAllocation {
    pub fn new(
        inventory: NodeList,
        application: ApplicationId,
        cluster: ClusterSpec,
        requested: NodeSpec,
        highest_index: Option<u32>,
        environment: Environment,
    ) -> Self {
        let limits = ResourceLimits::for_cluster(cluster.cluster_type);
        NodeAllocation {
            inventory,
            application,
            cluster,
            requested,
            environment,
            limits,
            nodes: Vec::new(),
            indexes: HashSet::new(),
            highest_index,
            accepted: 0,
            accepted_without_resizing_retired: 0,
            rejected_due_to_exclusivity: 0,
            rejected_due_to_clashing_parent_host: 0,
            rejected_due_to_insufficient_resources: 0,
            was_retired_just_now: 0,
        }
    }

    /// Walk the candidate list once, best candidates first.
    pub fn offer(&mut self, candidates: Vec<NodeCandidate>) {
        // A container member with the wrong flavor is only worth keeping
        // retired while the batch offers somewhere for its load to go.
        let batch_has_compatible = candidates
            .iter()
            .any(|c| c.node.resources().compatible_with(&self.requested.resources));

        for candidate in candidates {
            match candidate.node.allocation.clone() {
                Some(allocation) => {
                    self.offer_allocated(candidate, allocation, batch_has_compatible)
                }
                None => self.offer_free(candidate),
            }
        }
    }

    /// The request is minimally satisfied.
    pub fn fulfilled(&self) -> bool {
        self.accepted >= self.requested.min_count
    }

    /// The request wants no more nodes; further candidates are only taken to
    /// be retired.
    pub fn saturated(&self) -> bool {
        self.accepted_without_resizing_retired >= self.requested.max_count
    }

    pub fn highest_index(&self) -> Option<u32> {
        self.highest_index
    }

    /// How many members this run newly retired.
    pub fn was_retired_just_now(&self) -> u32 {
        self.was_retired_just_now
    }

    /// Why the pass came up short, for the out-of-capacity error.
    pub fn out_of_capacity_details(&self) -> String {
        let mut reasons = Vec::new();
        if self.rejected_due_to_exclusivity > 0 {
            reasons.push("host exclusivity constraints");
        }
        if self.rejected_due_to_clashing_parent_host > 0 {
            reasons.push("insufficient separate physical hosts");
        }
        if self.rejected_due_to_insufficient_resources > 0 {
            reasons.push("insufficient real resources on hosts");
        }
        if reasons.is_empty() {
            "no nodes available".to_string()
        } else {
            format!("not enough nodes available due to {}", reasons.join(", "))
        }
    }

    /// Close the books on this run: reconcile how many members are retired
    /// against the requested count, stamp exclusivity, and return the node
    /// values to commit.
    ///
    /// Surplus-driven and flavor-driven accepts can leave the wrong number of
    /// retired members, in both directions. Too few retired: retire from the
    /// highest member index down, so the members that joined last leave
    /// first. Too many: unretire lowest indexes first, preferring nodes
    /// nobody asked to retire, resizing back where the node was kept at its
    /// own size while retired.
    pub fn final_nodes(mut self) -> Vec<Node> {
        let current_retired = self.nodes.iter().filter(|c| c.node.retired()).count() as i64;
        let ideal_retired = self.nodes.len() as i64 - i64::from(self.requested.max_count);
        let mut delta = if self.requested.consider_retiring() {
            ideal_retired - current_retired
        } else {
            0
        };

        if delta > 0 {
            let mut to_retire: Vec<usize> = (0..self.nodes.len())
                .filter(|&i| {
                    self.nodes[i].node.state == NodeState::Active && !self.nodes[i].node.retired()
                })
                .collect();
            to_retire.sort_by_key(|&i| std::cmp::Reverse(member_index(&self.nodes[i])));
            for i in to_retire {
                if delta == 0 {
                    break;
                }
                if let Some(allocation) = self.nodes[i].node.allocation.as_mut() {
                    allocation.membership.retired = true;
                }
                delta -= 1;
            }
        } else if delta < 0 {
            let mut to_unretire: Vec<usize> = (0..self.nodes.len())
                .filter(|&i| {
                    let candidate = &self.nodes[i];
                    candidate.node.retired()
                        && (candidate
                            .node
                            .resources()
                            .compatible_with(&self.requested.resources)
                            || candidate.is_resizable)
                })
                .collect();
            to_unretire.sort_by_key(|&i| {
                (self.nodes[i].node.status.want_to_retire, member_index(&self.nodes[i]))
            });
            for i in to_unretire {
                if delta == 0 {
                    break;
                }
                let candidate = &mut self.nodes[i];
                if candidate.is_resizable {
                    let own = candidate.node.flavor.resources;
                    candidate.node.flavor.resources = self
                        .requested
                        .resources
                        .with_disk_speed(own.disk_speed)
                        .with_storage_type(own.storage_type);
                }
                if let Some(allocation) = candidate.node.allocation.as_mut() {
                    allocation.membership.retired = false;
                }
                delta += 1;
            }
        }

        for candidate in &mut self.nodes {
            if let Some(allocation) = candidate.node.allocation.as_mut() {
                allocation.membership.cluster.exclusive = self.requested.exclusive;
            }
        }
        self.nodes.into_iter().map(|c| c.node).collect()
    }

    // ── Candidate evaluation ───────────────────────────────────────

    fn offer_allocated(
        &mut self,
        candidate: NodeCandidate,
        allocation: Allocation,
        batch_has_compatible: bool,
    ) {
        if allocation.owner != self.application {
            return;
        }
        if !allocation.membership.cluster.satisfies(&self.cluster) {
            return;
        }
        if self.indexes.contains(&allocation.membership.index) {
            return;
        }
        if allocation.membership.cluster.group != self.cluster.group
            && (!candidate.is_surplus || self.saturated())
        {
            // Members of other groups are only picked up as surplus, and only
            // while there is still room.
            return;
        }
        if allocation.removable {
            // Approved for removal; leaving it out deactivates it.
            return;
        }

        let retirement = if self.requested.consider_retiring() {
            self.retirement_reason(&candidate)
        } else if allocation.membership.retired {
            // A pass that must not disrupt anything keeps retirements as
            // they are.
            Some("already retired")
        } else {
            None
        };
        let resizable = self.requested.consider_retiring() && candidate.is_resizable;

        if (!self.saturated() && self.has_compatible_resources(&candidate))
            || self.accept_to_retire(&candidate, batch_has_compatible)
        {
            self.accept(candidate, retirement, resizable);
        }
    }

    fn offer_free(&mut self, mut candidate: NodeCandidate) {
        if self.saturated() {
            return;
        }
        if !self.has_compatible_resources(&candidate) {
            return;
        }
        if !self.limits.within(candidate.node.resources()) {
            self.rejected_due_to_insufficient_resources += 1;
            return;
        }
        if self.clashes_with_accepted_parent(&candidate) {
            self.rejected_due_to_clashing_parent_host += 1;
            return;
        }
        if self.violates_exclusivity(&candidate) {
            self.rejected_due_to_exclusivity += 1;
            return;
        }
        if candidate.node.status.want_to_retire {
            return;
        }

        let index = self.next_index();
        let membership = ClusterMembership::new(self.cluster.clone(), index);
        candidate.node.allocation = Some(Allocation::new(
            self.application.clone(),
            membership,
            self.requested.resources,
        ));
        let resizable = self.requested.consider_retiring() && candidate.is_resizable;
        self.accept(candidate, None, resizable);
    }

    /// Take a candidate into the allocation. `retirement` carries the reason
    /// this member should be retired, or `None` to accept it as a working
    /// member.
    fn accept(
        &mut self,
        mut candidate: NodeCandidate,
        retirement: Option<&'static str>,
        resizable: bool,
    ) {
        let Some(allocation) = candidate.node.allocation.as_mut() else {
            return;
        };
        allocation.requested_resources = self.requested.resources;
        let currently_retired = allocation.membership.retired;

        match retirement {
            None => {
                self.accepted += 1;
                // A retired node kept at its own size while it drains does
                // not occupy a slot; it will be resized if it ever returns.
                if !(resizable && currently_retired) {
                    self.accepted_without_resizing_retired += 1;
                }
                if resizable && !currently_retired {
                    let own = candidate.node.flavor.resources;
                    candidate.node.flavor.resources = self
                        .requested
                        .resources
                        .with_disk_speed(own.disk_speed)
                        .with_storage_type(own.storage_type);
                }
                if candidate.node.state != NodeState::Active && currently_retired {
                    // Stale retirement left over from an abandoned session.
                    allocation.membership.retired = false;
                }
            }
            Some(reason) => {
                if !currently_retired {
                    self.was_retired_just_now += 1;
                    debug!(hostname = %candidate.node.hostname, reason, "retiring node");
                }
                allocation.membership.retired = true;
            }
        }

        if allocation.membership.cluster != self.cluster {
            allocation.membership.cluster = self.cluster.clone();
        }
        let index = allocation.membership.index;
        self.indexes.insert(index);
        self.highest_index = Some(self.highest_index.map_or(index, |h| h.max(index)));
        debug!(
            hostname = %candidate.node.hostname,
            index,
            new = candidate.is_new,
            retired = allocation.membership.retired,
            "accepted node"
        );
        self.nodes.push(candidate);
    }

    /// Whether to accept an otherwise-unwanted member in retired state rather
    /// than dropping it outright. Content nodes hold data, so they must drain
    /// before leaving. A container node is kept only while it is part of a
    /// flavor migration that still has somewhere to go; a plain container
    /// surplus is dropped directly.
    fn accept_to_retire(&self, candidate: &NodeCandidate, batch_has_compatible: bool) -> bool {
        if candidate.node.state != NodeState::Active {
            return false;
        }
        let Some(allocation) = candidate.node.allocation.as_ref() else {
            return false;
        };
        if allocation.membership.cluster.group != self.cluster.group {
            return false;
        }
        if allocation.membership.retired {
            return true;
        }
        if self.cluster.cluster_type.is_content() {
            return true;
        }
        !self.has_compatible_resources(candidate) && batch_has_compatible
    }

    /// The first reason this member should be retired, if any.
    fn retirement_reason(&self, candidate: &NodeCandidate) -> Option<&'static str> {
        if !self.limits.within(candidate.node.resources()) {
            return Some("outside real resource limits");
        }
        if self.clashes_with_accepted_parent(candidate) {
            return Some("parent host clash");
        }
        if !self.has_compatible_resources(candidate) {
            return Some("incompatible flavor");
        }
        if candidate.node.status.want_to_retire {
            return Some("operator request");
        }
        if self.violates_exclusivity(candidate) {
            return Some("exclusivity violation");
        }
        None
    }

    fn has_compatible_resources(&self, candidate: &NodeCandidate) -> bool {
        candidate.node.resources().compatible_with(&self.requested.resources)
            || candidate.is_resizable
    }

    /// In production, two members of the same cluster must not share a
    /// physical host. Tester instances are exempt; they are throwaway.
    fn clashes_with_accepted_parent(&self, candidate: &NodeCandidate) -> bool {
        if self.environment != Environment::Production || self.application.is_tester() {
            return false;
        }
        let Some(parent) = candidate.node.parent_hostname.as_deref() else {
            return false;
        };
        self.nodes
            .iter()
            .any(|accepted| accepted.node.parent_hostname.as_deref() == Some(parent))
    }

    /// An exclusive cluster may not share a physical host with other
    /// applications, and nobody may move onto a host that already carries an
    /// exclusive cluster.
    fn violates_exclusivity(&self, candidate: &NodeCandidate) -> bool {
        let Some(parent) = candidate.node.parent_hostname.as_deref() else {
            return false;
        };
        let siblings = self.inventory.children_of(parent);
        if self.requested.exclusive {
            siblings
                .iter()
                .any(|s| s.allocation.as_ref().is_some_and(|a| a.owner != self.application))
        } else {
            siblings
                .iter()
                .any(|s| s.allocation.as_ref().is_some_and(|a| a.membership.cluster.exclusive))
        }
    }

    fn next_index(&mut self) -> u32 {
        let next = match self.highest_index {
            Some(highest) => highest + 1,
            None => 0,
        };
        self.highest_index = Some(next);
        next
    }
}

fn member_index(candidate: &NodeCandidate) -> u32 {
    candidate.node.allocation.as_ref().map_or(0, |a| a.membership.index)
}
