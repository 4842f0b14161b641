/// Periodic task runner with failure backoff.
///
/// Runs one iteration of a background job every `interval`. Failed iterations
/// are retried with exponential backoff instead of waiting a full interval,
/// and the loop exits at the next wait once the cancellation token fires.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct PeriodicConfig {
    /// Delay between successful runs.
    pub interval: Duration,
    /// Delay before the first retry after a failure.
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Consecutive failures after which every further failure is logged as an alert.
    pub alert_after_failures: u32,
    /// Run once immediately instead of waiting one interval first.
    pub run_immediately: bool,
}

impl PeriodicConfig {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            initial_retry_delay: Duration::from_secs(30),
            max_retry_delay: interval.max(Duration::from_secs(30)),
            alert_after_failures: 3,
            run_immediately: false,
        }
    }
}

#[derive(Debug)]
struct BackoffState {
    consecutive_failures: u32,
    current_retry_delay: Duration,
}

impl BackoffState {
    fn new(initial_delay: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            current_retry_delay: initial_delay,
        }
    }

    /// Returns the delay to wait before the retry.
    fn record_failure(&mut self, max_delay: Duration) -> Duration {
        self.consecutive_failures += 1;
        let wait = self.current_retry_delay;
        self.current_retry_delay = std::cmp::min(self.current_retry_delay * 2, max_delay);
        wait
    }

    fn reset(&mut self, initial_delay: Duration) {
        self.consecutive_failures = 0;
        self.current_retry_delay = initial_delay;
    }
}

/// Sleeps unless cancelled first. Returns false on cancellation.
async fn wait_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Run `task_fn` periodically until `cancel` fires.
///
/// Returns the number of iterations executed.
pub async fn run_periodic<F, Fut>(
    task_name: &str,
    config: PeriodicConfig,
    cancel: CancellationToken,
    mut task_fn: F,
) -> u64
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), String>>,
{
    let mut state = BackoffState::new(config.initial_retry_delay);
    let mut runs = 0u64;

    if !config.run_immediately && !wait_or_cancel(config.interval, &cancel).await {
        info!("Task '{}' stopped before first run", task_name);
        return runs;
    }

    loop {
        if cancel.is_cancelled() {
            break;
        }

        runs += 1;
        let wait = match task_fn().await {
            Ok(()) => {
                if state.consecutive_failures > 0 {
                    warn!(
                        "Task '{}' recovered after {} failures",
                        task_name, state.consecutive_failures
                    );
                }
                state.reset(config.initial_retry_delay);
                config.interval
            }
            Err(e) => {
                let wait = state.record_failure(config.max_retry_delay);
                if state.consecutive_failures >= config.alert_after_failures {
                    error!(
                        alert = "background_task_failing",
                        "Task '{}' failed {} times in a row: {}",
                        task_name,
                        state.consecutive_failures,
                        e
                    );
                } else {
                    warn!(
                        "Task '{}' failed (attempt {}): {}",
                        task_name, state.consecutive_failures, e
                    );
                }
                warn!("Task '{}' will retry in {:?}", task_name, wait);
                wait
            }
        };

        if !wait_or_cancel(wait, &cancel).await {
            break;
        }
    }

    info!("Task '{}' stopped after {} runs", task_name, runs);
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast(interval_ms: u64) -> PeriodicConfig {
        PeriodicConfig {
            interval: Duration::from_millis(interval_ms),
            initial_retry_delay: Duration::from_millis(5),
            max_retry_delay: Duration::from_millis(20),
            alert_after_failures: 2,
            run_immediately: true,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut state = BackoffState::new(Duration::from_millis(10));
        assert_eq!(state.record_failure(Duration::from_millis(30)), Duration::from_millis(10));
        assert_eq!(state.record_failure(Duration::from_millis(30)), Duration::from_millis(20));
        assert_eq!(state.record_failure(Duration::from_millis(30)), Duration::from_millis(30));
        assert_eq!(state.consecutive_failures, 3);
        state.reset(Duration::from_millis(10));
        assert_eq!(state.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_retries_after_failures_then_keeps_running() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_periodic("test_task", fast(10), cancel.clone(), move || {
            let count = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err("Simulated failure".to_string())
                } else {
                    Ok(())
                }
            }
        }));

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        let runs = handle.await.unwrap();

        assert!(attempts.load(Ordering::SeqCst) >= 3);
        assert_eq!(runs as usize, attempts.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_before_first_run() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut config = fast(10);
        config.run_immediately = false;

        let runs = run_periodic("idle", config, cancel, || async { Ok(()) }).await;
        assert_eq!(runs, 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_long_interval() {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_periodic("slow", fast(60_000), cancel.clone(), || async { Ok(()) }));

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let runs = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(runs, 1);
    }
}
