//! What one allocation pass asks for: node counts and the per-node envelope.

use quarry_core::NodeResources;

/// The request a single engine run tries to satisfy, already broken down to
/// one group: between `min_count` and `max_count` nodes of `resources` each.
///
/// `can_fail` is false for bootstrap-style passes that must succeed with
/// whatever is already allocated; such passes also never start retirements,
/// since retiring is a deliberate disruption.
#[derive(Debug, Clone, Copy)]
pub struct NodeSpec {
    pub min_count: u32,
    pub max_count: u32,
    pub resources: NodeResources,
    pub exclusive: bool,
    pub can_fail: bool,
}

impl NodeSpec {
    pub fn new(min_count: u32, max_count: u32, resources: NodeResources) -> Self {
        NodeSpec { min_count, max_count, resources, exclusive: false, can_fail: true }
    }

    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn with_can_fail(mut self, can_fail: bool) -> Self {
        self.can_fail = can_fail;
        self
    }

    /// Whether this pass may start new retirements. Already-retired members
    /// stay retired either way.
    pub fn consider_retiring(&self) -> bool {
        self.can_fail
    }
}
