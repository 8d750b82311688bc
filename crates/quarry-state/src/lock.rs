//! In-process mutual exclusion for deployments.
//!
//! Two lock families: one lock per application (serializes prepare/activate
//! of the same application) and a single unallocated-pool lock held around
//! the read-decide-reserve sequence so concurrent deployments of different
//! applications cannot hand the same free node to two owners.

use crate::error::{StateError, StateResult};
use quarry_core::ApplicationId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

pub struct LockRegistry {
    unallocated: Arc<Mutex<()>>,
    applications: Mutex<HashMap<ApplicationId, Arc<Mutex<()>>>>,
}

/// Held for the duration of one application's prepare+activate.
pub struct ApplicationLock {
    _guard: OwnedMutexGuard<()>,
}

/// Held around the read-decide-reserve sequence of one prepare.
pub struct AllocationLock {
    _guard: OwnedMutexGuard<()>,
}

impl LockRegistry {
    pub fn new() -> Self {
        LockRegistry {
            unallocated: Arc::new(Mutex::new(())),
            applications: Mutex::new(HashMap::new()),
        }
    }

    pub async fn lock_application(
        &self,
        application: &ApplicationId,
        wait: Duration,
    ) -> StateResult<ApplicationLock> {
        let mutex = {
            let mut map = self.applications.lock().await;
            map.entry(application.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = timeout(wait, mutex.lock_owned())
            .await
            .map_err(|_| StateError::LockTimeout(format!("application {application}")))?;
        Ok(ApplicationLock { _guard: guard })
    }

    pub async fn lock_unallocated(&self, wait: Duration) -> StateResult<AllocationLock> {
        let guard = timeout(wait, self.unallocated.clone().lock_owned())
            .await
            .map_err(|_| StateError::LockTimeout("unallocated pool".to_string()))?;
        Ok(AllocationLock { _guard: guard })
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        LockRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(name: &str) -> ApplicationId {
        ApplicationId::new("vault", name, "default")
    }

    #[tokio::test]
    async fn same_application_excludes() {
        let registry = LockRegistry::new();
        let held = registry.lock_application(&app("a"), Duration::from_secs(1)).await.unwrap();
        let err = registry.lock_application(&app("a"), Duration::from_millis(20)).await;
        assert!(matches!(err, Err(StateError::LockTimeout(_))));
        drop(held);
        registry.lock_application(&app("a"), Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn different_applications_do_not_block() {
        let registry = LockRegistry::new();
        let _a = registry.lock_application(&app("a"), Duration::from_secs(1)).await.unwrap();
        let _b = registry.lock_application(&app("b"), Duration::from_millis(20)).await.unwrap();
    }

    #[tokio::test]
    async fn unallocated_pool_is_single() {
        let registry = LockRegistry::new();
        let held = registry.lock_unallocated(Duration::from_secs(1)).await.unwrap();
        let err = registry.lock_unallocated(Duration::from_millis(20)).await;
        assert!(matches!(err, Err(StateError::LockTimeout(_))));
        drop(held);
        registry.lock_unallocated(Duration::from_secs(1)).await.unwrap();
    }
}
