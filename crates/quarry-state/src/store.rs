//! NodeStore — redb-backed node inventory for Quarry.
//!
//! Holds every node record and the per-application deployment targets. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).
//!
//! Multi-node mutations (reserve, activate, deactivate) are single write
//! transactions: either the whole batch commits or none of it does. State
//! changes go through the `NodeState` transition table; a node found in an
//! unexpected state fails the batch with `StateError::Conflict`, which is
//! what a losing racer sees.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use quarry_core::ApplicationId;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::clock::Clock;
use crate::error::{StateError, StateResult};
use crate::filter::NodeFilter;
use crate::list::NodeList;
use crate::lock::{AllocationLock, ApplicationLock, LockRegistry};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn read_node(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    hostname: &str,
) -> StateResult<Option<Node>> {
    match table.get(hostname).map_err(map_err!(Read))? {
        Some(guard) => {
            let node: Node =
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(node))
        }
        None => Ok(None),
    }
}

fn all_nodes(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
) -> StateResult<Vec<Node>> {
    let mut nodes = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        let node: Node = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        nodes.push(node);
    }
    Ok(nodes)
}

/// Thread-safe node inventory backed by redb.
#[derive(Clone)]
pub struct NodeStore {
    db: Arc<Database>,
    locks: Arc<LockRegistry>,
    clock: Clock,
}

impl NodeStore {
    /// Open (or create) a persistent inventory at the given path.
    pub fn open(path: &Path, clock: Clock) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db), locks: Arc::new(LockRegistry::new()), clock };
        store.ensure_tables()?;
        debug!(?path, "node store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory inventory (for testing).
    pub fn open_in_memory(clock: Clock) -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db), locks: Arc::new(LockRegistry::new()), clock };
        store.ensure_tables()?;
        debug!("in-memory node store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    // ── Locks ──────────────────────────────────────────────────────

    pub async fn lock_application(
        &self,
        application: &ApplicationId,
        wait: Duration,
    ) -> StateResult<ApplicationLock> {
        self.locks.lock_application(application, wait).await
    }

    pub async fn lock_unallocated(&self, wait: Duration) -> StateResult<AllocationLock> {
        self.locks.lock_unallocated(wait).await
    }

    // ── Node CRUD ──────────────────────────────────────────────────

    /// Register new nodes as `provisioned`. Fails the whole batch if any
    /// hostname is already taken.
    pub fn add_nodes(&self, nodes: Vec<Node>) -> StateResult<()> {
        let now = self.clock.now_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            for node in nodes {
                if read_node(&table, &node.hostname)?.is_some() {
                    return Err(StateError::AlreadyExists(node.hostname));
                }
                let mut node = node;
                node.state = NodeState::Provisioned;
                node.record_event(NodeEventKind::Provisioned, now, Agent::System);
                let value = serde_json::to_vec(&node).map_err(map_err!(Serialize))?;
                table
                    .insert(node.hostname.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a node by hostname.
    pub fn get_node(&self, hostname: &str) -> StateResult<Option<Node>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        read_node(&table, hostname)
    }

    /// Snapshot of every node in the inventory.
    pub fn list_nodes(&self) -> StateResult<NodeList> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        Ok(NodeList::new(all_nodes(&table)?))
    }

    /// Overwrite an existing node record.
    pub fn write_node(&self, node: &Node) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            if read_node(&table, &node.hostname)?.is_none() {
                return Err(StateError::NotFound(node.hostname.clone()));
            }
            let value = serde_json::to_vec(node).map_err(map_err!(Serialize))?;
            table
                .insert(node.hostname.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Lifecycle moves ────────────────────────────────────────────

    /// Operator/system state move. Only the holding-pen targets are reachable
    /// this way; the deployment path owns `reserved`/`active`/`inactive`.
    /// Moving to `dirty`, `ready`, or `deprovisioned` strips the allocation;
    /// `failed` and `parked` keep it for diagnosis.
    pub fn move_to(&self, hostname: &str, target: NodeState, agent: Agent) -> StateResult<Node> {
        let event = match target {
            NodeState::Dirty => NodeEventKind::Dirtied,
            NodeState::Ready => NodeEventKind::Readied,
            NodeState::Failed => NodeEventKind::Failed,
            NodeState::Parked => NodeEventKind::Parked,
            NodeState::Deprovisioned => NodeEventKind::Deprovisioned,
            other => {
                return Err(StateError::InvalidTransition {
                    hostname: hostname.to_string(),
                    from: "any".to_string(),
                    to: other.to_string(),
                });
            }
        };
        let now = self.clock.now_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            let node = read_node(&table, hostname)?
                .ok_or_else(|| StateError::NotFound(hostname.to_string()))?;
            if !node.state.can_transition_to(target) {
                return Err(StateError::InvalidTransition {
                    hostname: hostname.to_string(),
                    from: node.state.to_string(),
                    to: target.to_string(),
                });
            }
            let mut node = node;
            node.state = target;
            if matches!(target, NodeState::Dirty | NodeState::Ready | NodeState::Deprovisioned) {
                node.allocation = None;
            }
            if target == NodeState::Deprovisioned {
                node.status.want_to_deprovision = false;
            }
            node.record_event(event, now, agent);
            let value = serde_json::to_vec(&node).map_err(map_err!(Serialize))?;
            table
                .insert(node.hostname.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            updated = node;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%hostname, state = %target, "node moved");
        Ok(updated)
    }

    /// Flag or unflag a node for retirement at the next allocation pass.
    pub fn set_want_to_retire(
        &self,
        hostname: &str,
        want_to_retire: bool,
        agent: Agent,
    ) -> StateResult<Node> {
        let now = self.clock.now_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            let mut node = read_node(&table, hostname)?
                .ok_or_else(|| StateError::NotFound(hostname.to_string()))?;
            if node.status.want_to_retire != want_to_retire {
                node.status.want_to_retire = want_to_retire;
                if want_to_retire {
                    node.record_event(NodeEventKind::RetireRequested, now, agent);
                }
            }
            let value = serde_json::to_vec(&node).map_err(map_err!(Serialize))?;
            table
                .insert(node.hostname.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            updated = node;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    /// Mark the given nodes' allocations removable. Every hostname must be
    /// allocated to `application`.
    pub fn set_removable(
        &self,
        application: &ApplicationId,
        hostnames: &[String],
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            for hostname in hostnames {
                let mut node = read_node(&table, hostname)?
                    .ok_or_else(|| StateError::NotFound(hostname.clone()))?;
                match &mut node.allocation {
                    Some(allocation) if allocation.owner == *application => {
                        allocation.removable = true;
                    }
                    _ => {
                        return Err(StateError::Conflict(format!(
                            "{hostname} is not allocated to {application}"
                        )));
                    }
                }
                let value = serde_json::to_vec(&node).map_err(map_err!(Serialize))?;
                table
                    .insert(node.hostname.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Order a reboot of every node matching the filter: bumps the wanted
    /// reboot generation and records the order. Returns how many matched.
    pub fn bump_reboot(&self, filter: &NodeFilter, agent: Agent) -> StateResult<u32> {
        let now = self.clock.now_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            let matching: Vec<Node> = all_nodes(&table)?
                .into_iter()
                .filter(|n| n.state != NodeState::Deprovisioned && filter.matches(n))
                .collect();
            count = matching.len() as u32;
            for mut node in matching {
                node.status.reboot_generation = node.status.reboot_generation.bump_wanted();
                node.record_event(NodeEventKind::Rebooted, now, agent);
                let value = serde_json::to_vec(&node).map_err(map_err!(Serialize))?;
                table
                    .insert(node.hostname.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    /// Order a restart of the services on every *allocated* node matching the
    /// filter. Returns how many matched.
    pub fn bump_restart(&self, filter: &NodeFilter) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            let matching: Vec<Node> = all_nodes(&table)?
                .into_iter()
                .filter(|n| n.is_allocated() && filter.matches(n))
                .collect();
            count = matching.len() as u32;
            for mut node in matching {
                if let Some(allocation) = &mut node.allocation {
                    allocation.restart_generation = allocation.restart_generation.bump_wanted();
                }
                let value = serde_json::to_vec(&node).map_err(map_err!(Serialize))?;
                table
                    .insert(node.hostname.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    // ── Deployment path ────────────────────────────────────────────

    /// Write the reservations of one allocation pass. Each proposal is the
    /// full node value the engine decided on; the stored record must still be
    /// in a reservable state (`ready`, `inactive`, or `reserved` by the same
    /// application), otherwise the whole batch aborts with `Conflict` and no
    /// node is touched.
    pub fn reserve(&self, application: &ApplicationId, proposals: &[Node]) -> StateResult<()> {
        let now = self.clock.now_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            for proposal in proposals {
                let stored = read_node(&table, &proposal.hostname)?
                    .ok_or_else(|| StateError::NotFound(proposal.hostname.clone()))?;
                let owner = proposal.allocation.as_ref().map(|a| &a.owner);
                if owner != Some(application) {
                    return Err(StateError::Conflict(format!(
                        "proposal for {} is not owned by {application}",
                        proposal.hostname
                    )));
                }
                match stored.state {
                    NodeState::Ready | NodeState::Inactive => {}
                    NodeState::Reserved => {
                        let held_by_us = stored
                            .allocation
                            .as_ref()
                            .is_some_and(|a| a.owner == *application);
                        if !held_by_us {
                            return Err(StateError::Conflict(format!(
                                "{} is already reserved by another application",
                                proposal.hostname
                            )));
                        }
                    }
                    other => {
                        return Err(StateError::Conflict(format!(
                            "{} is {other} and cannot be reserved",
                            proposal.hostname
                        )));
                    }
                }
                let mut updated = proposal.clone();
                updated.state = NodeState::Reserved;
                updated.history = stored.history.clone();
                if stored.state != NodeState::Reserved {
                    updated.record_event(NodeEventKind::Reserved, now, Agent::Application);
                }
                let value = serde_json::to_vec(&updated).map_err(map_err!(Serialize))?;
                table
                    .insert(updated.hostname.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%application, count = proposals.len(), "nodes reserved");
        Ok(())
    }

    /// Commit a prepared host set: reserved members become active, active
    /// members take their new membership, and the application's active nodes
    /// left out of the set are deactivated. Returns the committed host count.
    pub fn activate(&self, application: &ApplicationId, hosts: &[HostSpec]) -> StateResult<u32> {
        let now = self.clock.now_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            let all = all_nodes(&table)?;
            for host in hosts {
                let node = all
                    .iter()
                    .find(|n| n.hostname == host.hostname)
                    .cloned()
                    .ok_or_else(|| {
                        StateError::Conflict(format!("{} is not in the inventory", host.hostname))
                    })?;
                let allocation = node
                    .allocation
                    .clone()
                    .filter(|a| a.owner == *application)
                    .ok_or_else(|| {
                        StateError::Conflict(format!(
                            "{} is no longer allocated to {application}",
                            host.hostname
                        ))
                    })?;
                if !matches!(node.state, NodeState::Reserved | NodeState::Active) {
                    return Err(StateError::Conflict(format!(
                        "{} is {} and cannot be activated",
                        host.hostname, node.state
                    )));
                }
                let was_retired = allocation.membership.retired;
                let mut updated = node;
                updated.flavor.resources = host.advertised_resources;
                updated.allocation = Some(Allocation {
                    owner: application.clone(),
                    membership: host.membership.clone(),
                    requested_resources: host.requested_resources,
                    restart_generation: allocation.restart_generation,
                    removable: false,
                });
                if updated.state == NodeState::Reserved {
                    updated.state = NodeState::Active;
                    updated.record_event(NodeEventKind::Activated, now, Agent::Application);
                }
                if host.membership.retired && !was_retired {
                    updated.record_event(NodeEventKind::Retired, now, Agent::Application);
                } else if !host.membership.retired && was_retired {
                    updated.record_event(NodeEventKind::Unretired, now, Agent::Application);
                }
                let value = serde_json::to_vec(&updated).map_err(map_err!(Serialize))?;
                table
                    .insert(updated.hostname.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            // Actives omitted from the new allocation leave the cluster.
            for node in &all {
                if node.state != NodeState::Active {
                    continue;
                }
                let owned = node.allocation.as_ref().is_some_and(|a| a.owner == *application);
                if !owned || hosts.iter().any(|h| h.hostname == node.hostname) {
                    continue;
                }
                let mut updated = node.clone();
                updated.state = NodeState::Inactive;
                if let Some(allocation) = &mut updated.allocation {
                    allocation.membership.retired = false;
                    allocation.removable = false;
                }
                updated.record_event(NodeEventKind::Deactivated, now, Agent::Application);
                let value = serde_json::to_vec(&updated).map_err(map_err!(Serialize))?;
                table
                    .insert(updated.hostname.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%application, hosts = hosts.len(), "allocation activated");
        Ok(hosts.len() as u32)
    }

    /// Take an application out of service: reserved nodes back to the pool,
    /// active nodes to inactive. Returns how many nodes changed.
    pub fn deactivate_application(&self, application: &ApplicationId) -> StateResult<u32> {
        let now = self.clock.now_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut changed = 0u32;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            let owned: Vec<Node> = all_nodes(&table)?
                .into_iter()
                .filter(|n| n.allocation.as_ref().is_some_and(|a| a.owner == *application))
                .collect();
            for mut node in owned {
                match node.state {
                    NodeState::Reserved => {
                        node.state = NodeState::Dirty;
                        node.allocation = None;
                        node.record_event(NodeEventKind::Dirtied, now, Agent::Application);
                    }
                    NodeState::Active => {
                        node.state = NodeState::Inactive;
                        if let Some(allocation) = &mut node.allocation {
                            allocation.membership.retired = false;
                            allocation.removable = false;
                        }
                        node.record_event(NodeEventKind::Deactivated, now, Agent::Application);
                    }
                    _ => continue,
                }
                changed += 1;
                let value = serde_json::to_vec(&node).map_err(map_err!(Serialize))?;
                table
                    .insert(node.hostname.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%application, changed, "application deactivated");
        Ok(changed)
    }

    // ── Applications ───────────────────────────────────────────────

    /// Store the deployment target an activation just committed.
    pub fn put_application(&self, record: &ApplicationRecord) -> StateResult<()> {
        let key = record.id.serialized();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "application target stored");
        Ok(())
    }

    /// Get an application's current deployment target.
    pub fn get_application(
        &self,
        application: &ApplicationId,
    ) -> StateResult<Option<ApplicationRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
        match table.get(application.serialized().as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: ApplicationRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all known application targets.
    pub fn list_applications(&self) -> StateResult<Vec<ApplicationRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: ApplicationRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Delete an application target. Returns true if it existed.
    pub fn delete_application(&self, application: &ApplicationId) -> StateResult<bool> {
        let key = application.serialized();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}
