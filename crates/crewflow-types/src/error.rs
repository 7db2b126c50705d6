use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Failure reported by a task executor or a recovery operation.
///
/// `kind` carries the error type name when one is known (e.g.
/// `"ConnectionError"`); categorization matches on both fields.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
        }
    }

    pub fn with_kind(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: Some(kind.into()),
        }
    }
}

/// Error taxonomy used to pick recovery strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Configuration,
    Authentication,
    Validation,
    Resource,
    Timeout,
    Agent,
    Workflow,
    Critical,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Agent => "agent",
            ErrorCategory::Workflow => "workflow",
            ErrorCategory::Critical => "critical",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Severity of an error; ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// High and critical errors force the workflow into `interrupted`.
    pub fn forces_interrupt(&self) -> bool {
        *self >= ErrorSeverity::High
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Declared blast radius of an error, supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorImpact {
    SystemWide,
    WorkflowBlocking,
    Local,
}

/// One strategy invocation recorded against an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAttemptRecord {
    pub strategy: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Log entry for one handled error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// `{operation}_{unix_ts}_{n}`.
    pub id: String,
    pub operation: String,
    pub error: TaskError,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub recovery_attempts: Vec<RecoveryAttemptRecord>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ErrorRecord {
    /// Append an attempt; the first successful attempt resolves the record.
    pub fn add_recovery_attempt(
        &mut self,
        strategy: impl Into<String>,
        success: bool,
        result: Option<Value>,
        notes: Option<String>,
    ) {
        let now = Utc::now();
        self.recovery_attempts.push(RecoveryAttemptRecord {
            strategy: strategy.into(),
            success,
            timestamp: now,
            result,
            notes,
        });
        if success && !self.resolved {
            self.resolved = true;
            self.resolved_at = Some(now);
        }
    }
}

/// Aggregate view over the error log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub total_errors: usize,
    pub resolved_errors: usize,
    /// Resolved / total, 0.0 when there are no errors.
    pub resolution_rate: f64,
    pub by_category: BTreeMap<ErrorCategory, usize>,
    pub by_severity: BTreeMap<ErrorSeverity, usize>,
}

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

/// Externally visible state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitStatus::Closed => write!(f, "closed"),
            CircuitStatus::Open => write!(f, "open"),
            CircuitStatus::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Serializable status of one per-operation circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub operation_name: String,
    pub state: CircuitStatus,
    pub failure_count: u32,
    pub threshold: u32,
    pub reset_timeout_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ErrorRecord {
        ErrorRecord {
            id: "op_1_0".to_string(),
            operation: "op".to_string(),
            error: TaskError::new("boom"),
            category: ErrorCategory::Unknown,
            severity: ErrorSeverity::Low,
            context: Map::new(),
            timestamp: Utc::now(),
            recovery_attempts: Vec::new(),
            resolved: false,
            resolved_at: None,
        }
    }

    #[test]
    fn first_success_resolves_record() {
        let mut rec = record();
        rec.add_recovery_attempt("retry", false, None, None);
        assert!(!rec.resolved);
        rec.add_recovery_attempt("fallback", true, None, Some("used cache".into()));
        assert!(rec.resolved);
        let resolved_at = rec.resolved_at;
        rec.add_recovery_attempt("retry", true, None, None);
        assert_eq!(rec.resolved_at, resolved_at);
        assert_eq!(rec.recovery_attempts.len(), 3);
    }

    #[test]
    fn severity_ordering_drives_interrupts() {
        assert!(ErrorSeverity::Critical.forces_interrupt());
        assert!(ErrorSeverity::High.forces_interrupt());
        assert!(!ErrorSeverity::Medium.forces_interrupt());
    }

    #[test]
    fn task_error_displays_message() {
        let err = TaskError::with_kind("ConnectionError", "connection refused");
        assert_eq!(err.to_string(), "connection refused");
    }
}
