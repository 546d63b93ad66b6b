//! Exponential-backoff retry for node execution.

use std::time::Duration;

use loomflow_error::ExecutionError;
use rand::Rng;

/// How a failed node's execution is retried before the scheduler gives up
/// and surfaces the error.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `1` disables retrying.
    pub max_attempts: usize,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Growth factor applied per additional attempt.
    pub multiplier: f64,
    /// Hard ceiling on the computed delay, before jitter.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(100))
    }
}

impl RetryPolicy {
    /// A policy that never retries: the first failure is final.
    #[must_use]
    pub fn none() -> Self {
        Self { max_attempts: 1, base_delay: Duration::ZERO, multiplier: 1.0, max_delay: Duration::ZERO }
    }

    /// Exponential backoff, doubling each attempt up to `max_delay`
    /// (defaults to 30s), with equal jitter applied to smooth out
    /// synchronized retries across concurrent branches.
    #[must_use]
    pub fn exponential(max_attempts: usize, base_delay: Duration) -> Self {
        Self { max_attempts, base_delay, multiplier: 2.0, max_delay: Duration::from_secs(30) }
    }

    /// Whether `error` is retryable at all under this policy.
    #[must_use]
    pub fn should_retry(&self, error: &ExecutionError) -> bool {
        self.max_attempts > 1 && error.is_retryable()
    }

    /// The delay to wait before the given 1-indexed attempt, or `None` once
    /// attempts are exhausted.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }
        let scaled_ms = (self.base_delay.as_millis() as f64) * self.multiplier.powi(attempt as i32 - 1);
        let capped = Duration::from_millis(scaled_ms as u64).min(self.max_delay);
        Some(apply_equal_jitter(capped))
    }
}

fn apply_equal_jitter(delay: Duration) -> Duration {
    let half = delay.as_millis() as u64 / 2;
    if half == 0 {
        return delay;
    }
    let jittered = half + rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(jittered)
}

/// Run `operation` under `policy`, retrying retryable [`ExecutionError`]s
/// with backoff between attempts. Returns the last error once attempts are
/// exhausted or the error is not retryable.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, ExecutionError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ExecutionError>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= policy.max_attempts || !policy.should_retry(&error) {
                    return Err(error);
                }
                if let Some(delay) = policy.delay_for_attempt(attempt) {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomflow_core::NodeId;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn failed(node_id: &str) -> ExecutionError {
        ExecutionError::Failed { node_id: NodeId::from(node_id), node_type: "tool".into(), message: "boom".into() }
    }

    #[test]
    fn none_policy_never_retries() {
        let policy = RetryPolicy::none();
        assert!(!policy.should_retry(&failed("n1")));
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let policy = RetryPolicy { max_attempts: 5, base_delay: Duration::from_millis(100), multiplier: 2.0, max_delay: Duration::from_millis(300) };
        assert!(policy.delay_for_attempt(1).unwrap() <= Duration::from_millis(100));
        assert!(policy.delay_for_attempt(3).unwrap() <= Duration::from_millis(300));
    }

    #[test]
    fn exhausted_attempts_yield_no_delay() {
        let policy = RetryPolicy::exponential(3, Duration::from_millis(10));
        assert!(policy.delay_for_attempt(3).is_none());
    }

    #[tokio::test]
    async fn with_retry_succeeds_after_transient_failures() {
        let policy = RetryPolicy::exponential(3, Duration::from_millis(1));
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = count.clone();
        let result: Result<u32, ExecutionError> = with_retry(&policy, || {
            let count = count_clone.clone();
            async move {
                let seen = count.fetch_add(1, Ordering::SeqCst);
                if seen < 2 { Err(ExecutionError::Timeout { node_id: NodeId::from("n1"), timeout_ms: 10 }) } else { Ok(42) }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retry_stops_on_non_retryable_error() {
        let result: Result<(), ExecutionError> = with_retry(&RetryPolicy::exponential(3, Duration::from_millis(1)), || async { Err(ExecutionError::Cancelled) }).await;
        assert!(matches!(result, Err(ExecutionError::Cancelled)));
    }
}
