//! Per-operation circuit breaker.
//!
//! A breaker opens after `threshold` consecutive unrecovered failures of its
//! operation and rejects calls until `reset_timeout` has elapsed. The first
//! call after that is a probe: success closes the circuit, failure reopens
//! it for another full timeout.

use std::time::Duration;

use chrono::{DateTime, Utc};
use crewflow_types::error::{CircuitBreakerState, CircuitStatus};
use tokio::time::Instant;

/// Circuit breaker state.
#[derive(Debug, Clone)]
pub enum CircuitState {
    /// Normal operation. Tracks consecutive failures toward threshold.
    Closed { consecutive_failures: u32 },
    /// Calls are rejected until `reset_timeout` elapses.
    Open { opened_at: Instant },
    /// One probe call in flight to test whether the operation recovered.
    HalfOpen,
}

/// Failure gate for one named operation.
#[derive(Debug)]
pub struct CircuitBreaker {
    pub operation_name: String,
    pub state: CircuitState,
    pub threshold: u32,
    pub reset_timeout: Duration,
    /// Consecutive failures, kept across open periods for reporting.
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(operation_name: impl Into<String>, threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            operation_name: operation_name.into(),
            state: CircuitState::Closed {
                consecutive_failures: 0,
            },
            threshold: threshold.max(1),
            reset_timeout,
            failure_count: 0,
            last_failure_time: None,
        }
    }

    /// Whether a call may go through.
    ///
    /// Moves Open -> HalfOpen once the reset timeout has elapsed and admits
    /// that caller as the probe. Further callers are rejected until the
    /// probe's outcome is recorded.
    pub fn is_available(&mut self) -> bool {
        match &self.state {
            CircuitState::Closed { .. } => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_timeout {
                    tracing::debug!(operation = %self.operation_name, "circuit half-open, probing");
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Whether calls are currently rejected, without changing state.
    pub fn is_open(&self) -> bool {
        match &self.state {
            CircuitState::Open { opened_at } => opened_at.elapsed() < self.reset_timeout,
            _ => false,
        }
    }

    pub fn record_success(&mut self) {
        if !matches!(self.state, CircuitState::Closed { .. }) {
            tracing::info!(operation = %self.operation_name, "circuit closed");
        }
        self.failure_count = 0;
        self.state = CircuitState::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_time = Some(Utc::now());

        match &self.state {
            CircuitState::Closed {
                consecutive_failures,
            } => {
                let new_count = consecutive_failures + 1;
                if new_count >= self.threshold {
                    tracing::warn!(
                        operation = %self.operation_name,
                        failures = new_count,
                        "circuit opened"
                    );
                    self.state = CircuitState::Open {
                        opened_at: Instant::now(),
                    };
                } else {
                    self.state = CircuitState::Closed {
                        consecutive_failures: new_count,
                    };
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(operation = %self.operation_name, "probe failed, circuit reopened");
                self.state = CircuitState::Open {
                    opened_at: Instant::now(),
                };
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// Force the breaker closed.
    pub fn reset(&mut self) {
        self.failure_count = 0;
        self.last_failure_time = None;
        self.state = CircuitState::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn status(&self) -> CircuitStatus {
        match self.state {
            CircuitState::Closed { .. } => CircuitStatus::Closed,
            CircuitState::Open { .. } => CircuitStatus::Open,
            CircuitState::HalfOpen => CircuitStatus::HalfOpen,
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        CircuitBreakerState {
            operation_name: self.operation_name.clone(),
            state: self.status(),
            failure_count: self.failure_count,
            threshold: self.threshold,
            reset_timeout_secs: self.reset_timeout.as_secs_f64(),
            last_failure_time: self.last_failure_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_probes_after_timeout() {
        let mut breaker = CircuitBreaker::new("op", 2, Duration::from_secs(60));
        breaker.record_failure();
        assert!(breaker.is_available());
        breaker.record_failure();
        assert_eq!(breaker.status(), CircuitStatus::Open);
        assert!(!breaker.is_available());
        assert!(breaker.is_open());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!breaker.is_open());
        assert!(breaker.is_available());
        assert_eq!(breaker.status(), CircuitStatus::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.status(), CircuitStatus::Closed);
        assert_eq!(breaker.snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens() {
        let mut breaker = CircuitBreaker::new("op", 1, Duration::from_secs(10));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(breaker.is_available());
        breaker.record_failure();
        assert_eq!(breaker.status(), CircuitStatus::Open);
        assert!(!breaker.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_a_single_probe() {
        let mut breaker = CircuitBreaker::new("op", 1, Duration::from_secs(10));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(breaker.is_available());
        assert!(!breaker.is_available());
        assert!(!breaker.is_available());
        assert_eq!(breaker.status(), CircuitStatus::HalfOpen);

        breaker.record_success();
        assert!(breaker.is_available());
        assert!(breaker.is_available());
    }

    #[test]
    fn success_resets_consecutive_count() {
        let mut breaker = CircuitBreaker::new("op", 3, Duration::from_secs(10));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.status(), CircuitStatus::Closed);

        breaker.reset();
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.threshold, 3);
        assert_eq!(snapshot.reset_timeout_secs, 10.0);
    }
}
