//! The maintainer loop.
//!
//! Every background job in Quarry is a [`Maintainer`]: one `maintain` call
//! per pass, driven on a fixed interval by [`run_maintainer`] until the
//! shutdown channel flips. A failed pass is logged and the next one runs
//! on schedule.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

/// A periodic background job.
pub trait Maintainer: Send {
    /// Name used in log lines.
    fn name(&self) -> &'static str;

    /// Run one maintenance pass.
    fn maintain(&mut self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Drive a maintainer until shutdown is signalled.
pub async fn run_maintainer<M: Maintainer>(
    mut maintainer: M,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        maintainer = maintainer.name(),
        interval_secs = interval.as_secs(),
        "maintainer started"
    );

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = maintainer.maintain().await {
                    error!(
                        maintainer = maintainer.name(),
                        error = %e,
                        "maintenance pass failed"
                    );
                }
            }
            _ = shutdown.changed() => {
                info!(maintainer = maintainer.name(), "maintainer shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingMaintainer {
        runs: Arc<AtomicU32>,
        fail: bool,
    }

    impl Maintainer for CountingMaintainer {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn maintain(&mut self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn runs_until_shutdown() {
        let runs = Arc::new(AtomicU32::new(0));
        let maintainer = CountingMaintainer {
            runs: runs.clone(),
            fail: false,
        };

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_maintainer(maintainer, Duration::from_millis(5), rx));

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(runs.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn a_failing_pass_does_not_stop_the_loop() {
        let runs = Arc::new(AtomicU32::new(0));
        let maintainer = CountingMaintainer {
            runs: runs.clone(),
            fail: true,
        };

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_maintainer(maintainer, Duration::from_millis(5), rx));

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(runs.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn shutdown_before_first_tick_runs_nothing() {
        let runs = Arc::new(AtomicU32::new(0));
        let maintainer = CountingMaintainer {
            runs: runs.clone(),
            fail: false,
        };

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_maintainer(maintainer, Duration::from_secs(3600), rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
