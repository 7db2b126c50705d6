//! In-engine retry loop for task attempts.
//!
//! A task runs once, then up to `max_attempts` more times. Retry `k` waits
//! `backoff_seconds * 2^(k-1)` first; each attempt may carry its own timeout.
//! The wait is the only place a workflow suspends, and cancellation cuts it
//! short.

use std::future::Future;
use std::time::Duration;

use crewflow_types::error::TaskError;
use crewflow_types::task::RetryPolicy;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Outcome of a retried task.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    /// Output of the successful attempt, or the last error.
    pub result: Result<Value, TaskError>,
    /// Executor invocations made.
    pub attempts: u32,
    /// Error messages of the failed attempts, oldest first.
    pub failures: Vec<String>,
    /// The wait before a retry was cut short by cancellation.
    pub cancelled: bool,
}

impl RetryOutcome {
    /// Succeeded only after at least one failed attempt.
    pub fn recovered(&self) -> bool {
        self.result.is_ok() && !self.failures.is_empty()
    }
}

/// Wait before retry `retry` (1-based).
pub fn backoff_delay(policy: &RetryPolicy, retry: u32) -> Duration {
    if retry == 0 || policy.backoff_seconds <= 0.0 {
        return Duration::ZERO;
    }
    let factor = 2f64.powi(retry.saturating_sub(1).min(30) as i32);
    Duration::try_from_secs_f64(policy.backoff_seconds * factor).unwrap_or(Duration::MAX)
}

/// Per-attempt timeout, if the policy sets a positive one.
pub fn attempt_timeout(policy: &RetryPolicy) -> Option<Duration> {
    policy
        .timeout_seconds
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(Duration::from_secs_f64)
}

/// Run `attempt` until it succeeds or the policy is exhausted.
///
/// `attempt` receives the 1-based attempt number.
pub async fn run_with_retry<F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> RetryOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Value, TaskError>>,
{
    let total = policy.max_attempts.saturating_add(1);
    let timeout = attempt_timeout(policy);
    let mut failures = Vec::new();
    let mut last_error = TaskError::new("task was not attempted");

    for number in 1..=total {
        if number > 1 {
            let delay = backoff_delay(policy, number - 1);
            tracing::debug!(attempt = number, delay_secs = delay.as_secs_f64(), "retrying task");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return RetryOutcome {
                        result: Err(last_error),
                        attempts: number - 1,
                        failures,
                        cancelled: true,
                    };
                }
            }
        }

        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt(number)).await {
                Ok(result) => result,
                Err(_) => Err(TaskError::with_kind(
                    "TimeoutError",
                    format!("attempt timed out after {}s", limit.as_secs_f64()),
                )),
            },
            None => attempt(number).await,
        };

        match result {
            Ok(output) => {
                return RetryOutcome {
                    result: Ok(output),
                    attempts: number,
                    failures,
                    cancelled: false,
                };
            }
            Err(err) => {
                tracing::debug!(attempt = number, error = %err, "task attempt failed");
                failures.push(err.message.clone());
                last_error = err;
            }
        }
    }

    RetryOutcome {
        result: Err(last_error),
        attempts: total,
        failures,
        cancelled: false,
    }
}
