//! Periodic background passes (dispatch, watchdog).
//!
//! Each job runs on a fixed interval. A pass always finishes, or hits its
//! timeout, before the next tick is taken, so passes never overlap within
//! one process. Missed ticks are skipped rather than bunched.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Spawn `pass` every `period` until `cancel` fires.
///
/// The first pass runs immediately. A pass still running at shutdown is
/// dropped at its next await point.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    pass_timeout: Duration,
    cancel: CancellationToken,
    mut pass: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(job = name, period_secs = period.as_secs_f64(), "periodic job started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                result = tokio::time::timeout(pass_timeout, pass()) => {
                    if result.is_err() {
                        tracing::warn!(
                            job = name,
                            timeout_secs = pass_timeout.as_secs_f64(),
                            "periodic pass timed out"
                        );
                    }
                }
            }
        }

        tracing::info!(job = name, "periodic job stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_runs_until_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let counter = count.clone();

        let handle = spawn_periodic(
            "test",
            Duration::from_millis(10),
            Duration::from_secs(1),
            cancel.clone(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        cancel.cancel();
        handle.await.unwrap();

        let passes = count.load(Ordering::SeqCst);
        assert!(passes >= 2, "expected several passes, got {passes}");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), passes);
    }

    #[tokio::test]
    async fn test_hung_pass_times_out_and_loop_continues() {
        let started = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let counter = started.clone();

        let handle = spawn_periodic(
            "hung",
            Duration::from_millis(5),
            Duration::from_millis(20),
            cancel.clone(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(started.load(Ordering::SeqCst) >= 2);
    }
}
