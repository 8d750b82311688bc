//! Reservation expiry.
//!
//! `prepare` reserves nodes and a later `activate` claims them. When the
//! activation never comes, the reservation would pin the node forever, so
//! nodes reserved longer than the grace period are returned to dirty and
//! flow back into the free pool through the usual cleanup.

use std::time::Duration;

use quarry_state::{Agent, NodeState, NodeStore};
use tracing::{info, warn};

use crate::maintainer::Maintainer;

pub struct ReservationExpirer {
    store: NodeStore,
    expiry: Duration,
}

impl ReservationExpirer {
    pub fn new(store: NodeStore, expiry: Duration) -> Self {
        ReservationExpirer { store, expiry }
    }

    /// Run one sweep. Returns how many reservations were expired.
    pub fn expire_once(&self) -> anyhow::Result<u32> {
        let now = self.store.clock().now_secs();
        let reserved = self.store.list_nodes()?.in_state(NodeState::Reserved);

        let mut expired = 0;
        for node in reserved.iter() {
            // A reserved node whose event already fell off the capped
            // history is old no matter what.
            let reserved_at = node.reserved_at_secs().unwrap_or(0);
            if now < reserved_at + self.expiry.as_secs() {
                continue;
            }
            match self
                .store
                .move_to(&node.hostname, NodeState::Dirty, Agent::ReservationExpirer)
            {
                Ok(_) => {
                    info!(
                        hostname = %node.hostname,
                        reserved_at,
                        "reservation expired, node returned to dirty"
                    );
                    expired += 1;
                }
                Err(e) => {
                    warn!(
                        hostname = %node.hostname,
                        error = %e,
                        "could not expire reservation"
                    );
                }
            }
        }
        Ok(expired)
    }
}

impl Maintainer for ReservationExpirer {
    fn name(&self) -> &'static str {
        "reservation-expirer"
    }

    async fn maintain(&mut self) -> anyhow::Result<()> {
        self.expire_once()?;
        Ok(())
    }
}
