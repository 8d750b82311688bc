//! Orchestration veto for node removal.
//!
//! Retired nodes keep serving until whatever manages the search services on
//! top of Quarry agrees they can go. The retirement pipeline asks through
//! this trait; a veto leaves the node retired and it is asked about again
//! on the next pass.

use quarry_state::Node;

/// Decides whether a retired node may be removed now.
pub trait Orchestrator: Send + Sync {
    fn permission_to_remove(&self, node: &Node) -> bool;
}

/// Grants every request. Used when no orchestration layer is wired in.
pub struct PermissiveOrchestrator;

impl Orchestrator for PermissiveOrchestrator {
    fn permission_to_remove(&self, _node: &Node) -> bool {
        true
    }
}
