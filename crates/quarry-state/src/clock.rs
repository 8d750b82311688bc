//! Epoch-second clock, swappable for a manually advanced one in tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Clock {
    inner: Arc<ClockInner>,
}

enum ClockInner {
    System,
    Manual(AtomicU64),
}

impl Clock {
    /// The real wall clock.
    pub fn system() -> Self {
        Clock { inner: Arc::new(ClockInner::System) }
    }

    /// A clock that only moves when `advance` is called.
    pub fn manual(start_secs: u64) -> Self {
        Clock { inner: Arc::new(ClockInner::Manual(AtomicU64::new(start_secs))) }
    }

    pub fn now_secs(&self) -> u64 {
        match &*self.inner {
            ClockInner::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            ClockInner::Manual(secs) => secs.load(Ordering::SeqCst),
        }
    }

    /// Advance a manual clock. Has no effect on the system clock.
    pub fn advance(&self, secs: u64) {
        if let ClockInner::Manual(current) = &*self.inner {
            current.fetch_add(secs, Ordering::SeqCst);
        }
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.inner {
            ClockInner::System => write!(f, "Clock::System"),
            ClockInner::Manual(secs) => {
                write!(f, "Clock::Manual({})", secs.load(Ordering::SeqCst))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = Clock::manual(100);
        assert_eq!(clock.now_secs(), 100);
        clock.advance(50);
        assert_eq!(clock.now_secs(), 150);
        let shared = clock.clone();
        shared.advance(10);
        assert_eq!(clock.now_secs(), 160);
    }

    #[test]
    fn system_clock_ignores_advance() {
        let clock = Clock::system();
        let before = clock.now_secs();
        clock.advance(3600);
        assert!(clock.now_secs() < before + 3600);
    }
}
