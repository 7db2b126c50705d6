//! Error recovery framework.
//!
//! Categorizes failures, assesses their severity and runs an ordered list of
//! [`RecoveryStrategy`]s until one resolves the error. Each operation name
//! has its own [`CircuitBreaker`]; an open breaker fails fast before any
//! strategy runs. Every handled error is kept in an in-memory log.

pub mod breaker;
pub mod strategy;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crewflow_types::config::RecoveryConfig;
use crewflow_types::error::{
    CircuitBreakerState, CircuitStatus, ErrorCategory, ErrorImpact, ErrorRecord, ErrorSeverity,
    ErrorSummary, TaskError,
};
use dashmap::DashMap;
use serde_json::json;
use thiserror::Error;

use crate::assignment::AgentAssignment;

pub use breaker::{CircuitBreaker, CircuitState};
pub use strategy::{
    AgentFilter, AgentSwitchStrategy, CircuitBreakerStrategy, FallbackStrategy, OperationFuture,
    RecoveryContext, RecoveryOperation, RecoveryStrategy, Resolution, RetryStrategy,
    StrategyOutcome, WorkflowRollbackStrategy, WorkflowSkipStrategy,
};

/// Errors raised by the recovery framework itself.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("invalid recovery configuration: {0}")]
    InvalidConfig(String),
}

// ---------------------------------------------------------------------------
// Categorization
// ---------------------------------------------------------------------------

/// Keyword table in match order; the first category with a hit wins.
const CATEGORY_KEYWORDS: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Network,
        &["connection", "timeout", "network", "http", "api"],
    ),
    (
        ErrorCategory::Configuration,
        &["config", "setting", "parameter", "missing"],
    ),
    (
        ErrorCategory::Authentication,
        &["auth", "credential", "permission", "unauthorized"],
    ),
    (
        ErrorCategory::Validation,
        &["validation", "invalid", "format", "schema"],
    ),
    (
        ErrorCategory::Resource,
        &["resource", "memory", "disk", "quota"],
    ),
    (ErrorCategory::Timeout, &["timeout", "deadline"]),
    (ErrorCategory::Agent, &["agent", "crewai", "tool"]),
    (ErrorCategory::Workflow, &["workflow", "task", "process"]),
    (ErrorCategory::Critical, &["critical", "fatal"]),
];

/// Categorize an error by keyword match on its lowercased kind and message.
pub fn categorize(error: &TaskError) -> ErrorCategory {
    let text = match &error.kind {
        Some(kind) => format!("{kind} {}", error.message),
        None => error.message.clone(),
    }
    .to_lowercase();

    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Unknown)
}

/// Severity of an error of `category` raised in the given context.
pub fn assess_severity(
    category: ErrorCategory,
    impact: Option<ErrorImpact>,
    critical: bool,
) -> ErrorSeverity {
    if critical {
        return ErrorSeverity::Critical;
    }
    match category {
        ErrorCategory::Authentication | ErrorCategory::Configuration | ErrorCategory::Critical => {
            ErrorSeverity::Critical
        }
        ErrorCategory::Resource => ErrorSeverity::High,
        ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Agent => {
            ErrorSeverity::Medium
        }
        _ => match impact {
            Some(ErrorImpact::SystemWide) => ErrorSeverity::High,
            Some(ErrorImpact::WorkflowBlocking) => ErrorSeverity::Medium,
            _ => ErrorSeverity::Low,
        },
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Outcome of handling one error.
#[derive(Debug, Clone)]
pub struct RecoveryResult {
    pub error_id: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub recovery_success: bool,
    /// Winning strategy, or `circuit_breaker` when the breaker fast-failed.
    /// `None` when every strategy failed.
    pub strategy: Option<String>,
    pub resolution: Option<Resolution>,
    /// Breaker state of the operation after handling.
    pub circuit_state: CircuitStatus,
    /// High and critical errors interrupt the workflow even when resolved.
    pub force_interrupt: bool,
    pub record: ErrorRecord,
}

// ---------------------------------------------------------------------------
// Framework
// ---------------------------------------------------------------------------

/// Strategy registry, breaker registry and error log.
pub struct ErrorRecoveryFramework {
    strategies: Vec<Arc<dyn RecoveryStrategy>>,
    breakers: DashMap<String, CircuitBreaker>,
    records: DashMap<String, ErrorRecord>,
    sequence: AtomicU64,
    config: RecoveryConfig,
}

impl ErrorRecoveryFramework {
    /// Framework with the default general strategies (retry, breaker probe).
    ///
    /// Fallback needs a substitute operation and is added with
    /// [`with_strategy`](Self::with_strategy).
    pub fn new(config: RecoveryConfig) -> Result<Self, RecoveryError> {
        if !config.retry_base_delay_secs.is_finite()
            || !config.retry_max_delay_secs.is_finite()
            || !config.reset_timeout_secs.is_finite()
            || config.retry_base_delay_secs < 0.0
            || config.retry_max_delay_secs < 0.0
            || config.reset_timeout_secs < 0.0
        {
            return Err(RecoveryError::InvalidConfig(
                "delays and timeouts must be non-negative numbers".to_string(),
            ));
        }

        let retry = RetryStrategy::new(
            config.retry_max_attempts,
            Duration::from_secs_f64(config.retry_base_delay_secs),
            Duration::from_secs_f64(config.retry_max_delay_secs),
        );
        Ok(Self {
            strategies: vec![Arc::new(retry), Arc::new(CircuitBreakerStrategy)],
            breakers: DashMap::new(),
            records: DashMap::new(),
            sequence: AtomicU64::new(0),
            config,
        })
    }

    /// Framework with no strategies registered.
    pub fn empty(config: RecoveryConfig) -> Self {
        Self {
            strategies: Vec::new(),
            breakers: DashMap::new(),
            records: DashMap::new(),
            sequence: AtomicU64::new(0),
            config,
        }
    }

    /// Register the workflow-aware strategies (agent switch, skip, rollback).
    pub fn with_workflow_strategies(self, assignment: Arc<AgentAssignment>) -> Self {
        self.with_strategy(Arc::new(AgentSwitchStrategy::new(assignment)))
            .with_strategy(Arc::new(WorkflowSkipStrategy))
            .with_strategy(Arc::new(WorkflowRollbackStrategy))
    }

    /// Append a strategy; strategies are tried in registration order.
    pub fn with_strategy(mut self, strategy: Arc<dyn RecoveryStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Handle an error with every registered strategy in order.
    pub async fn handle_error(&self, error: &TaskError, context: &RecoveryContext) -> RecoveryResult {
        let order: Vec<_> = self.strategies.iter().collect();
        self.handle_with(error, context, order).await
    }

    /// Handle a workflow task failure: workflow-aware strategies first, then
    /// the general ones.
    pub async fn handle_workflow_error(
        &self,
        error: &TaskError,
        context: &RecoveryContext,
    ) -> RecoveryResult {
        let (aware, general): (Vec<_>, Vec<_>) =
            self.strategies.iter().partition(|s| s.is_workflow_aware());
        let order = aware.into_iter().chain(general).collect();
        self.handle_with(error, context, order).await
    }

    async fn handle_with(
        &self,
        error: &TaskError,
        context: &RecoveryContext,
        order: Vec<&Arc<dyn RecoveryStrategy>>,
    ) -> RecoveryResult {
        let category = categorize(error);
        let severity = assess_severity(category, context.impact, context.critical);
        let mut record = self.new_record(error, context, category, severity);
        let operation = context.operation_name.as_str();

        tracing::warn!(
            error_id = %record.id,
            operation,
            category = %category,
            severity = %severity,
            error = %error,
            "handling error"
        );

        let available = self.breaker_entry(operation).is_available();
        if !available {
            record.add_recovery_attempt(
                "circuit_breaker",
                false,
                None,
                Some("circuit open, call rejected".to_string()),
            );
            tracing::warn!(operation, "circuit open, skipping recovery");
            return self.finish(
                record,
                Some("circuit_breaker".to_string()),
                None,
                CircuitStatus::Open,
            );
        }

        let mut winner = None;
        let mut tried_any = false;
        for strategy in order {
            if !strategy.can_handle(error, category) {
                continue;
            }
            tried_any = true;
            match strategy.execute(error, context).await {
                StrategyOutcome::Recovered(resolution) => {
                    record.add_recovery_attempt(
                        strategy.name(),
                        true,
                        Some(resolution.to_value()),
                        None,
                    );
                    tracing::info!(
                        error_id = %record.id,
                        strategy = strategy.name(),
                        "recovery succeeded"
                    );
                    winner = Some((strategy.name().to_string(), resolution));
                    break;
                }
                StrategyOutcome::Failed { reason } => {
                    tracing::debug!(
                        error_id = %record.id,
                        strategy = strategy.name(),
                        reason = %reason,
                        "recovery strategy failed"
                    );
                    record.add_recovery_attempt(strategy.name(), false, None, Some(reason));
                }
            }
        }
        if !tried_any {
            record.add_recovery_attempt(
                "none",
                false,
                None,
                Some("no applicable strategy".to_string()),
            );
        }

        let circuit_state = {
            let mut breaker = self.breaker_entry(operation);
            if winner.is_some() {
                breaker.record_success();
            } else {
                breaker.record_failure();
            }
            breaker.status()
        };

        let (strategy, resolution) = match winner {
            Some((name, resolution)) => (Some(name), Some(resolution)),
            None => {
                tracing::error!(error_id = %record.id, operation, "recovery failed");
                (None, None)
            }
        };
        self.finish(record, strategy, resolution, circuit_state)
    }

    fn new_record(
        &self,
        error: &TaskError,
        context: &RecoveryContext,
        category: ErrorCategory,
        severity: ErrorSeverity,
    ) -> ErrorRecord {
        let now = Utc::now();
        let n = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut details = context.details.clone();
        if let Some(id) = &context.workflow_id {
            details.insert("workflow_id".into(), json!(id));
        }
        if let Some(index) = context.task_index {
            details.insert("task_index".into(), json!(index));
        }
        if let Some(agent) = &context.agent {
            details.insert("agent".into(), json!(agent));
        }

        ErrorRecord {
            id: format!("{}_{}_{n}", context.operation_name, now.timestamp()),
            operation: context.operation_name.clone(),
            error: error.clone(),
            category,
            severity,
            context: details,
            timestamp: now,
            recovery_attempts: Vec::new(),
            resolved: false,
            resolved_at: None,
        }
    }

    fn finish(
        &self,
        record: ErrorRecord,
        strategy: Option<String>,
        resolution: Option<Resolution>,
        circuit_state: CircuitStatus,
    ) -> RecoveryResult {
        self.records.insert(record.id.clone(), record.clone());
        RecoveryResult {
            error_id: record.id.clone(),
            category: record.category,
            severity: record.severity,
            recovery_success: record.resolved,
            strategy,
            resolution,
            circuit_state,
            force_interrupt: record.severity.forces_interrupt(),
            record,
        }
    }

    // -----------------------------------------------------------------------
    // Breaker registry
    // -----------------------------------------------------------------------

    fn breaker_entry(&self, operation: &str) -> dashmap::mapref::one::RefMut<'_, String, CircuitBreaker> {
        self.breakers
            .entry(operation.to_string())
            .or_insert_with(|| {
                CircuitBreaker::new(
                    operation,
                    self.config.failure_threshold,
                    Duration::from_secs_f64(self.config.reset_timeout_secs),
                )
            })
    }

    /// Status of the breaker for `operation`, creating it closed if unknown.
    pub fn circuit_breaker(&self, operation: &str) -> CircuitBreakerState {
        self.breaker_entry(operation).snapshot()
    }

    /// Status of a known breaker.
    pub fn circuit_breaker_status(&self, operation: &str) -> Option<CircuitBreakerState> {
        self.breakers.get(operation).map(|b| b.snapshot())
    }

    /// Whether calls to `operation` are currently rejected.
    pub fn is_circuit_open(&self, operation: &str) -> bool {
        self.breakers.get(operation).is_some_and(|b| b.is_open())
    }

    /// Force the breaker closed. Returns false for unknown operations.
    pub fn reset_circuit_breaker(&self, operation: &str) -> bool {
        match self.breakers.get_mut(operation) {
            Some(mut breaker) => {
                breaker.reset();
                tracing::info!(operation, "circuit breaker reset");
                true
            }
            None => false,
        }
    }

    /// Snapshot of every breaker, sorted by operation name.
    pub fn circuit_breakers(&self) -> Vec<CircuitBreakerState> {
        let mut all: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        all.sort_by(|a, b| a.operation_name.cmp(&b.operation_name));
        all
    }

    // -----------------------------------------------------------------------
    // Error log
    // -----------------------------------------------------------------------

    /// Totals over the error log, optionally restricted to errors at or
    /// after `since`.
    pub fn error_summary(&self, since: Option<DateTime<Utc>>) -> ErrorSummary {
        let mut summary = ErrorSummary::default();
        for record in self.records.iter() {
            if since.is_some_and(|since| record.timestamp < since) {
                continue;
            }
            summary.total_errors += 1;
            if record.resolved {
                summary.resolved_errors += 1;
            }
            *summary.by_category.entry(record.category).or_default() += 1;
            *summary.by_severity.entry(record.severity).or_default() += 1;
        }
        if summary.total_errors > 0 {
            summary.resolution_rate = summary.resolved_errors as f64 / summary.total_errors as f64;
        }
        summary
    }

    pub fn error_details(&self, error_id: &str) -> Option<ErrorRecord> {
        self.records.get(error_id).map(|r| r.clone())
    }

    /// Drop resolved errors resolved more than `older_than_days` ago.
    pub fn clear_resolved_errors(&self, older_than_days: u32) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(older_than_days));
        let before = self.records.len();
        self.records
            .retain(|_, r| !(r.resolved && r.resolved_at.is_some_and(|at| at < cutoff)));
        let removed = before - self.records.len();
        if removed > 0 {
            tracing::info!(removed, older_than_days, "cleared resolved errors");
        }
        removed
    }

    /// Error records, oldest first.
    pub fn errors(&self) -> Vec<ErrorRecord> {
        let mut all: Vec<_> = self.records.iter().map(|r| r.clone()).collect();
        all.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        all
    }
}

impl Default for ErrorRecoveryFramework {
    fn default() -> Self {
        Self::empty(RecoveryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicU32;

    /// Strategy that counts invocations and always fails.
    struct Counting {
        calls: Arc<AtomicU32>,
        succeed: bool,
        aware: bool,
        name: &'static str,
    }

    impl Counting {
        fn new(name: &'static str, succeed: bool) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Self {
                    calls: Arc::clone(&calls),
                    succeed,
                    aware: false,
                    name,
                },
                calls,
            )
        }
    }

    impl RecoveryStrategy for Counting {
        fn name(&self) -> &str {
            self.name
        }

        fn can_handle(&self, _error: &TaskError, _category: ErrorCategory) -> bool {
            true
        }

        fn execute<'a>(
            &'a self,
            _error: &'a TaskError,
            _context: &'a RecoveryContext,
        ) -> Pin<Box<dyn Future<Output = StrategyOutcome> + Send + 'a>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.succeed {
                    StrategyOutcome::Recovered(Resolution::Skip)
                } else {
                    StrategyOutcome::Failed {
                        reason: "nope".into(),
                    }
                }
            })
        }

        fn is_workflow_aware(&self) -> bool {
            self.aware
        }
    }

    fn config(threshold: u32) -> RecoveryConfig {
        RecoveryConfig {
            failure_threshold: threshold,
            ..Default::default()
        }
    }

    #[test]
    fn categorizes_by_first_keyword_match() {
        let cases = [
            ("connection refused", ErrorCategory::Network),
            ("request timeout", ErrorCategory::Network),
            ("missing config value", ErrorCategory::Configuration),
            ("unauthorized", ErrorCategory::Authentication),
            ("schema mismatch", ErrorCategory::Validation),
            ("out of memory", ErrorCategory::Resource),
            ("deadline exceeded", ErrorCategory::Timeout),
            ("agent crashed", ErrorCategory::Agent),
            ("workflow stalled", ErrorCategory::Workflow),
            ("fatal", ErrorCategory::Critical),
            ("boom", ErrorCategory::Unknown),
        ];
        for (message, expected) in cases {
            assert_eq!(categorize(&TaskError::new(message)), expected, "{message}");
        }
        assert_eq!(
            categorize(&TaskError::with_kind("ConnectionError", "boom")),
            ErrorCategory::Network
        );
    }

    #[test]
    fn severity_rules() {
        assert_eq!(
            assess_severity(ErrorCategory::Authentication, None, false),
            ErrorSeverity::Critical
        );
        assert_eq!(
            assess_severity(ErrorCategory::Resource, None, false),
            ErrorSeverity::High
        );
        assert_eq!(
            assess_severity(ErrorCategory::Network, Some(ErrorImpact::SystemWide), false),
            ErrorSeverity::Medium
        );
        assert_eq!(
            assess_severity(ErrorCategory::Unknown, Some(ErrorImpact::SystemWide), false),
            ErrorSeverity::High
        );
        assert_eq!(
            assess_severity(
                ErrorCategory::Validation,
                Some(ErrorImpact::WorkflowBlocking),
                false
            ),
            ErrorSeverity::Medium
        );
        assert_eq!(
            assess_severity(ErrorCategory::Unknown, None, false),
            ErrorSeverity::Low
        );
        assert_eq!(
            assess_severity(ErrorCategory::Unknown, None, true),
            ErrorSeverity::Critical
        );
    }

    #[tokio::test]
    async fn open_breaker_short_circuits_before_strategies() {
        let (strategy, calls) = Counting::new("counting", false);
        let framework = ErrorRecoveryFramework::empty(config(2)).with_strategy(Arc::new(strategy));
        let context = RecoveryContext::new("fetch");
        let err = TaskError::new("boom");

        for _ in 0..2 {
            let result = framework.handle_error(&err, &context).await;
            assert!(!result.recovery_success);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(framework.is_circuit_open("fetch"));

        let result = framework.handle_error(&err, &context).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.circuit_state, CircuitStatus::Open);
        assert_eq!(result.strategy.as_deref(), Some("circuit_breaker"));
        assert!(!result.recovery_success);
        assert_eq!(result.record.recovery_attempts.len(), 1);

        assert!(framework.reset_circuit_breaker("fetch"));
        assert!(!framework.is_circuit_open("fetch"));
        assert!(!framework.reset_circuit_breaker("unknown"));
    }

    #[tokio::test]
    async fn first_success_wins_and_attempts_are_logged() {
        let (failing, failing_calls) = Counting::new("first", false);
        let (winning, winning_calls) = Counting::new("second", true);
        let (unused, unused_calls) = Counting::new("third", true);
        let framework = ErrorRecoveryFramework::empty(config(5))
            .with_strategy(Arc::new(failing))
            .with_strategy(Arc::new(winning))
            .with_strategy(Arc::new(unused));

        let result = framework
            .handle_error(&TaskError::new("boom"), &RecoveryContext::new("op"))
            .await;
        assert!(result.recovery_success);
        assert_eq!(result.strategy.as_deref(), Some("second"));
        assert_eq!(result.resolution, Some(Resolution::Skip));
        assert_eq!(failing_calls.load(Ordering::SeqCst), 1);
        assert_eq!(winning_calls.load(Ordering::SeqCst), 1);
        assert_eq!(unused_calls.load(Ordering::SeqCst), 0);

        let record = framework.error_details(&result.error_id).unwrap();
        let names: Vec<_> = record
            .recovery_attempts
            .iter()
            .map(|a| a.strategy.as_str())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
        assert!(record.resolved);
        assert!(result.error_id.starts_with("op_"));
        assert!(result.error_id.ends_with("_0"));
    }

    #[tokio::test]
    async fn workflow_errors_try_aware_strategies_first() {
        let (general, _) = Counting::new("general", true);
        let (mut aware, aware_calls) = Counting::new("aware", true);
        aware.aware = true;
        let framework = ErrorRecoveryFramework::empty(config(5))
            .with_strategy(Arc::new(general))
            .with_strategy(Arc::new(aware));

        let err = TaskError::new("boom");
        let context = RecoveryContext::new("task");
        let result = framework.handle_workflow_error(&err, &context).await;
        assert_eq!(result.strategy.as_deref(), Some("aware"));
        assert_eq!(aware_calls.load(Ordering::SeqCst), 1);

        let result = framework.handle_error(&err, &context).await;
        assert_eq!(result.strategy.as_deref(), Some("general"));
    }

    #[tokio::test]
    async fn severe_errors_force_interrupt_even_when_resolved() {
        let (winning, _) = Counting::new("win", true);
        let framework = ErrorRecoveryFramework::empty(config(5)).with_strategy(Arc::new(winning));
        let result = framework
            .handle_error(&TaskError::new("disk quota exceeded"), &RecoveryContext::new("op"))
            .await;
        assert!(result.recovery_success);
        assert_eq!(result.severity, ErrorSeverity::High);
        assert!(result.force_interrupt);
    }

    #[tokio::test]
    async fn no_applicable_strategy_is_recorded() {
        let framework = ErrorRecoveryFramework::new(config(5)).unwrap();
        let result = framework
            .handle_error(&TaskError::new("boom"), &RecoveryContext::new("op"))
            .await;
        assert!(!result.recovery_success);
        assert_eq!(result.record.recovery_attempts[0].strategy, "none");
        assert_eq!(result.circuit_state, CircuitStatus::Closed);
        assert_eq!(
            framework.circuit_breaker_status("op").unwrap().failure_count,
            1
        );
    }

    #[tokio::test]
    async fn summary_and_cleanup() {
        let (winning, _) = Counting::new("win", true);
        let framework = ErrorRecoveryFramework::empty(config(5)).with_strategy(Arc::new(winning));
        framework
            .handle_error(&TaskError::new("connection reset"), &RecoveryContext::new("a"))
            .await;
        framework
            .handle_error(&TaskError::new("agent crashed"), &RecoveryContext::new("b"))
            .await;

        let summary = framework.error_summary(None);
        assert_eq!(summary.total_errors, 2);
        assert_eq!(summary.resolved_errors, 2);
        assert_eq!(summary.resolution_rate, 1.0);
        assert_eq!(summary.by_category[&ErrorCategory::Network], 1);
        assert_eq!(summary.by_severity[&ErrorSeverity::Medium], 2);

        let future = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(framework.error_summary(Some(future)).total_errors, 0);

        // Resolved just now, so nothing is older than a day.
        assert_eq!(framework.clear_resolved_errors(1), 0);
        assert_eq!(framework.clear_resolved_errors(0), 2);
        assert!(framework.errors().is_empty());
    }

    #[test]
    fn rejects_negative_delays() {
        let config = RecoveryConfig {
            retry_base_delay_secs: -1.0,
            ..Default::default()
        };
        assert!(ErrorRecoveryFramework::new(config).is_err());
    }

    #[test]
    fn default_strategy_order() {
        let framework = ErrorRecoveryFramework::new(RecoveryConfig::default()).unwrap();
        assert_eq!(framework.strategy_names(), vec!["retry", "circuit_breaker"]);
    }
}
