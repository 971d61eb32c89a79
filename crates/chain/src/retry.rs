//! Exponential-backoff retry harness for transactional closures.
//!
//! SERIALIZABLE restarts and chain-link unique violations are equivalent
//! write-skew indicators; replaying the whole closure under backoff is what
//! makes a high-contention append safe and simple at the call site. The
//! closure decides retryability: it receives a [`Stopper`] and calls
//! [`Stopper::stop`] on non-retryable failures, aborting the loop without
//! sleeping. Exhausting the elapsed-time budget propagates the last
//! observed error.
//!
//! # Backoff Strategy
//!
//! The sleep before attempt `k+1` is
//! `min(max_interval, initial·multiplierᵏ) · (1 ± rand·randomization)` —
//! exponential growth, capped, with symmetric jitter to avoid
//! thundering-herd replays across contending writers.

use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use rand::Rng;

/// Default first sleep between attempts.
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);

/// Default growth factor applied per attempt.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// Default jitter factor: each sleep is scaled by `1 ± rand·factor`.
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;

/// Default upper bound on a single sleep.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);

/// Default bound on the total wall-clock time spent retrying.
pub const DEFAULT_MAX_ELAPSED_TIME: Duration = Duration::from_secs(600);

/// Backoff parameters for [`with_backoff`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use patchain_chain::BackoffConfig;
///
/// let config = BackoffConfig::builder()
///     .initial_interval(Duration::from_millis(100))
///     .max_elapsed_time(Duration::from_secs(30))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub(crate) initial_interval: Duration,
    pub(crate) multiplier: f64,
    pub(crate) randomization_factor: f64,
    pub(crate) max_interval: Duration,
    pub(crate) max_elapsed_time: Duration,
}

#[bon::bon]
impl BackoffConfig {
    /// Creates a new backoff configuration.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_INITIAL_INTERVAL)] initial_interval: Duration,
        #[builder(default = DEFAULT_MULTIPLIER)] multiplier: f64,
        #[builder(default = DEFAULT_RANDOMIZATION_FACTOR)] randomization_factor: f64,
        #[builder(default = DEFAULT_MAX_INTERVAL)] max_interval: Duration,
        #[builder(default = DEFAULT_MAX_ELAPSED_TIME)] max_elapsed_time: Duration,
    ) -> Self {
        Self { initial_interval, multiplier, randomization_factor, max_interval, max_elapsed_time }
    }

    /// Returns the first sleep interval.
    #[must_use]
    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    /// Returns the per-attempt growth factor.
    #[must_use]
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Returns the jitter factor.
    #[must_use]
    pub fn randomization_factor(&self) -> f64 {
        self.randomization_factor
    }

    /// Returns the upper bound on a single sleep.
    #[must_use]
    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    /// Returns the total retry wall-clock budget.
    #[must_use]
    pub fn max_elapsed_time(&self) -> Duration {
        self.max_elapsed_time
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            multiplier: DEFAULT_MULTIPLIER,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_elapsed_time: DEFAULT_MAX_ELAPSED_TIME,
        }
    }
}

/// Abort handle passed into each attempt.
///
/// Calling [`stop`](Stopper::stop) marks the attempt's failure as terminal:
/// the harness returns the error immediately instead of backing off.
#[derive(Clone, Default)]
pub struct Stopper(Arc<AtomicBool>);

impl Stopper {
    /// Marks the loop as stopped.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`stop`](Stopper::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counter of backoff retries, observable by callers and tests.
#[derive(Debug, Default)]
pub struct RetryStats {
    retries: AtomicU64,
}

impl RetryStats {
    /// Creates a zeroed counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one retry (an attempt after the first).
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Total retries recorded.
    #[must_use]
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}

/// Runs `operation` until it succeeds, is stopped, or the elapsed budget
/// runs out.
///
/// Each attempt receives a fresh [`Stopper`]. On failure with the stopper
/// untouched, the harness sleeps the backoff interval and re-runs; once
/// sleeping would exceed `config.max_elapsed_time`, the last error is
/// returned.
pub async fn with_backoff<T, E, F, Fut>(
    config: &BackoffConfig,
    stats: Option<&RetryStats>,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(Stopper) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        let stopper = Stopper::default();
        match operation(stopper.clone()).await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "operation succeeded after retry",
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                if stopper.is_stopped() {
                    return Err(err);
                }
                let delay = compute_backoff(config, attempt);
                if started.elapsed() + delay >= config.max_elapsed_time {
                    tracing::debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "retry budget exhausted",
                    );
                    return Err(err);
                }
                if let Some(stats) = stats {
                    stats.record_retry();
                }
                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retryable failure, backing off",
                );
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

/// Computes the sleep before attempt `attempt + 1`.
fn compute_backoff(config: &BackoffConfig, attempt: u32) -> Duration {
    let exp = config.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
    let base = config.initial_interval.as_secs_f64() * exp;
    let capped = base.min(config.max_interval.as_secs_f64());

    let factor = config.randomization_factor;
    let scale = if factor > 0.0 {
        1.0 - factor + rand::rng().random_range(0.0..=(2.0 * factor))
    } else {
        1.0
    };
    Duration::from_secs_f64(capped * scale)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig::builder()
            .initial_interval(Duration::from_millis(100))
            .randomization_factor(0.0)
            .max_interval(Duration::from_secs(1))
            .build()
    }

    fn fast() -> BackoffConfig {
        BackoffConfig::builder()
            .initial_interval(Duration::from_millis(1))
            .max_interval(Duration::from_millis(5))
            .max_elapsed_time(Duration::from_secs(5))
            .build()
    }

    #[test]
    fn defaults_match_the_retry_discipline() {
        let config = BackoffConfig::default();
        assert_eq!(config.initial_interval(), Duration::from_millis(500));
        assert_eq!(config.multiplier(), 1.5);
        assert_eq!(config.randomization_factor(), 0.5);
        assert_eq!(config.max_interval(), Duration::from_secs(60));
        assert_eq!(config.max_elapsed_time(), Duration::from_secs(600));
    }

    #[test]
    fn backoff_grows_by_the_multiplier() {
        let config = no_jitter();
        assert_eq!(compute_backoff(&config, 0), Duration::from_millis(100));
        assert_eq!(compute_backoff(&config, 1), Duration::from_millis(150));
        assert_eq!(compute_backoff(&config, 2), Duration::from_millis(225));
    }

    #[test]
    fn backoff_is_capped_at_max_interval() {
        let config = no_jitter();
        // 100ms · 1.5^20 ≫ 1s
        assert_eq!(compute_backoff(&config, 20), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_the_randomization_band() {
        let config = BackoffConfig::builder()
            .initial_interval(Duration::from_millis(100))
            .randomization_factor(0.5)
            .build();
        for _ in 0..100 {
            let d = compute_backoff(&config, 0);
            assert!(d >= Duration::from_millis(50), "below 1 - factor: {d:?}");
            assert!(d <= Duration::from_millis(150), "above 1 + factor: {d:?}");
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<i32, String> = with_backoff(&fast(), None, "test_op", |_stop| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success_and_counts() {
        let stats = RetryStats::new();
        let calls = AtomicU32::new(0);

        let result: Result<i32, String> = with_backoff(&fast(), Some(&stats), "test_op", |_stop| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("restart transaction".to_string())
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.retries(), 2);
    }

    #[tokio::test]
    async fn stopper_aborts_without_sleeping() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<(), String> = with_backoff(
            &BackoffConfig::builder().initial_interval(Duration::from_secs(30)).build(),
            None,
            "test_op",
            |stop| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    stop.stop();
                    Err("terminal".to_string())
                }
            },
        )
        .await;

        assert_eq!(result.unwrap_err(), "terminal");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(1), "must not back off");
    }

    #[tokio::test]
    async fn elapsed_budget_returns_last_error() {
        let config = BackoffConfig::builder()
            .initial_interval(Duration::from_millis(20))
            .randomization_factor(0.0)
            .max_elapsed_time(Duration::from_millis(60))
            .build();
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = with_backoff(&config, None, "test_op", |_stop| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("failure {n}")) }
        })
        .await;

        let message = result.unwrap_err();
        let attempts = calls.load(Ordering::SeqCst);
        assert!(attempts >= 2, "should retry at least once, got {attempts}");
        assert_eq!(message, format!("failure {}", attempts - 1), "last error wins");
    }
}
