//! Recovery strategies.
//!
//! Each strategy declares which error categories it handles and, when asked,
//! tries to resolve the failure. Strategies that re-run work do so through
//! the [`RecoveryOperation`] carried in the [`RecoveryContext`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crewflow_types::error::{ErrorCategory, ErrorImpact, TaskError};
use crewflow_types::state::HandoffRecord;
use crewflow_types::task::TaskSpec;
use serde_json::{Map, Value, json};

use crate::assignment::{AgentAssignment, extract_requirements};

// ---------------------------------------------------------------------------
// Operation and context
// ---------------------------------------------------------------------------

/// Boxed future returned by a [`RecoveryOperation`].
pub type OperationFuture = Pin<Box<dyn Future<Output = Result<Value, TaskError>> + Send>>;

/// Re-runnable unit of work. The argument overrides the agent that runs it.
pub type RecoveryOperation = Arc<dyn Fn(Option<String>) -> OperationFuture + Send + Sync>;

/// Filter applied to replacement agents (e.g. handoff validity).
pub type AgentFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Everything a strategy may need to know about the failure.
#[derive(Clone, Default)]
pub struct RecoveryContext {
    pub operation_name: String,
    pub workflow_id: Option<String>,
    pub task_index: Option<usize>,
    /// Agent that ran the failed operation.
    pub agent: Option<String>,
    pub task: Option<TaskSpec>,
    /// Escalates the error to critical severity.
    pub critical: bool,
    pub impact: Option<ErrorImpact>,
    /// Free-form details stored on the error record.
    pub details: Map<String, Value>,
    /// Handoff history of the workflow, used for agent scoring.
    pub history: Vec<HandoffRecord>,
    pub last_checkpoint_id: Option<String>,
    pub operation: Option<RecoveryOperation>,
    pub accept_agent: Option<AgentFilter>,
}

impl RecoveryContext {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_operation(mut self, operation: RecoveryOperation) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Whether the failed task may be skipped.
    pub fn task_is_optional(&self) -> bool {
        self.task.as_ref().is_some_and(|t| t.optional)
    }
}

impl fmt::Debug for RecoveryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryContext")
            .field("operation_name", &self.operation_name)
            .field("workflow_id", &self.workflow_id)
            .field("task_index", &self.task_index)
            .field("agent", &self.agent)
            .field("critical", &self.critical)
            .field("impact", &self.impact)
            .field("last_checkpoint_id", &self.last_checkpoint_id)
            .field("has_operation", &self.operation.is_some())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// How a failure was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The operation succeeded when re-run.
    Retried { output: Value, attempts: u32 },
    /// A substitute operation produced a result.
    Fallback { output: Value },
    /// A single probe run succeeded.
    Probed { output: Value },
    /// The failed step may be skipped.
    Skip,
    /// Another agent completed the operation.
    SwitchAgent { agent: String, output: Value },
    /// The workflow should be rolled back to a checkpoint.
    Rollback { checkpoint_id: String },
}

impl Resolution {
    /// Output produced by the resolution, if any.
    pub fn output(&self) -> Option<&Value> {
        match self {
            Resolution::Retried { output, .. }
            | Resolution::Fallback { output }
            | Resolution::Probed { output }
            | Resolution::SwitchAgent { output, .. } => Some(output),
            Resolution::Skip | Resolution::Rollback { .. } => None,
        }
    }

    /// Summary stored in the error record's attempt log.
    pub fn to_value(&self) -> Value {
        match self {
            Resolution::Retried { output, attempts } => {
                json!({"action": "retried", "attempts": attempts, "output": output})
            }
            Resolution::Fallback { output } => json!({"action": "fallback", "output": output}),
            Resolution::Probed { output } => json!({"action": "probed", "output": output}),
            Resolution::Skip => json!({"action": "skip"}),
            Resolution::SwitchAgent { agent, output } => {
                json!({"action": "switch_agent", "agent": agent, "output": output})
            }
            Resolution::Rollback { checkpoint_id } => {
                json!({"action": "rollback", "checkpoint_id": checkpoint_id})
            }
        }
    }
}

/// Result of one strategy invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    Recovered(Resolution),
    Failed { reason: String },
}

impl StrategyOutcome {
    fn failed(reason: impl Into<String>) -> Self {
        StrategyOutcome::Failed {
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy trait
// ---------------------------------------------------------------------------

/// A way of recovering from a categorized failure.
///
/// Object-safe: `execute` returns a boxed future so strategies can be held
/// as `Arc<dyn RecoveryStrategy>` in the framework's ordered list.
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn can_handle(&self, error: &TaskError, category: ErrorCategory) -> bool;

    fn execute<'a>(
        &'a self,
        error: &'a TaskError,
        context: &'a RecoveryContext,
    ) -> Pin<Box<dyn Future<Output = StrategyOutcome> + Send + 'a>>;

    /// Workflow-aware strategies are tried first for workflow failures.
    fn is_workflow_aware(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Re-runs the operation with capped exponential backoff.
///
/// Attempt `n` (0-based) waits `min(base * 2^n, max)` first; the initial
/// attempt runs immediately.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryStrategy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay before 0-based attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl RecoveryStrategy for RetryStrategy {
    fn name(&self) -> &str {
        "retry"
    }

    fn can_handle(&self, _error: &TaskError, category: ErrorCategory) -> bool {
        matches!(
            category,
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Resource
        )
    }

    fn execute<'a>(
        &'a self,
        _error: &'a TaskError,
        context: &'a RecoveryContext,
    ) -> Pin<Box<dyn Future<Output = StrategyOutcome> + Send + 'a>> {
        Box::pin(async move {
            let Some(operation) = &context.operation else {
                return StrategyOutcome::failed("No operation provided for retry");
            };

            let mut last_error = String::new();
            for attempt in 0..self.max_attempts {
                let delay = self.delay_for(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                match operation(None).await {
                    Ok(output) => {
                        return StrategyOutcome::Recovered(Resolution::Retried {
                            output,
                            attempts: attempt + 1,
                        });
                    }
                    Err(err) => {
                        tracing::debug!(
                            operation = %context.operation_name,
                            attempt = attempt + 1,
                            error = %err,
                            "recovery retry failed"
                        );
                        last_error = err.message;
                    }
                }
            }
            StrategyOutcome::failed(format!(
                "retries exhausted after {} attempts: {last_error}",
                self.max_attempts
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

/// Runs a substitute operation. Handles everything except critical errors.
pub struct FallbackStrategy {
    fallback: RecoveryOperation,
}

impl FallbackStrategy {
    pub fn new(fallback: RecoveryOperation) -> Self {
        Self { fallback }
    }
}

impl RecoveryStrategy for FallbackStrategy {
    fn name(&self) -> &str {
        "fallback"
    }

    fn can_handle(&self, _error: &TaskError, category: ErrorCategory) -> bool {
        category != ErrorCategory::Critical
    }

    fn execute<'a>(
        &'a self,
        _error: &'a TaskError,
        context: &'a RecoveryContext,
    ) -> Pin<Box<dyn Future<Output = StrategyOutcome> + Send + 'a>> {
        Box::pin(async move {
            match (self.fallback)(context.agent.clone()).await {
                Ok(output) => StrategyOutcome::Recovered(Resolution::Fallback { output }),
                Err(err) => StrategyOutcome::failed(err.message),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Circuit breaker probe
// ---------------------------------------------------------------------------

/// Makes one probe run of the operation for network and resource errors.
///
/// The framework owns the per-operation breakers and records the overall
/// outcome; this strategy only decides whether the probe succeeded.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerStrategy;

impl RecoveryStrategy for CircuitBreakerStrategy {
    fn name(&self) -> &str {
        "circuit_breaker"
    }

    fn can_handle(&self, _error: &TaskError, category: ErrorCategory) -> bool {
        matches!(category, ErrorCategory::Network | ErrorCategory::Resource)
    }

    fn execute<'a>(
        &'a self,
        _error: &'a TaskError,
        context: &'a RecoveryContext,
    ) -> Pin<Box<dyn Future<Output = StrategyOutcome> + Send + 'a>> {
        Box::pin(async move {
            let Some(operation) = &context.operation else {
                return StrategyOutcome::failed("No operation provided for probe");
            };
            match operation(None).await {
                Ok(output) => StrategyOutcome::Recovered(Resolution::Probed { output }),
                Err(err) => StrategyOutcome::failed(err.message),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Workflow-aware strategies
// ---------------------------------------------------------------------------

/// Skips optional tasks that failed on validation or workflow errors.
#[derive(Debug, Clone, Default)]
pub struct WorkflowSkipStrategy;

impl RecoveryStrategy for WorkflowSkipStrategy {
    fn name(&self) -> &str {
        "workflow_skip"
    }

    fn can_handle(&self, _error: &TaskError, category: ErrorCategory) -> bool {
        matches!(category, ErrorCategory::Validation | ErrorCategory::Workflow)
    }

    fn execute<'a>(
        &'a self,
        _error: &'a TaskError,
        context: &'a RecoveryContext,
    ) -> Pin<Box<dyn Future<Output = StrategyOutcome> + Send + 'a>> {
        Box::pin(async move {
            if context.task_is_optional() {
                StrategyOutcome::Recovered(Resolution::Skip)
            } else {
                StrategyOutcome::failed("task is not optional")
            }
        })
    }

    fn is_workflow_aware(&self) -> bool {
        true
    }
}

/// Re-runs the operation with the best-scoring other agent.
pub struct AgentSwitchStrategy {
    assignment: Arc<AgentAssignment>,
}

impl AgentSwitchStrategy {
    pub fn new(assignment: Arc<AgentAssignment>) -> Self {
        Self { assignment }
    }
}

impl RecoveryStrategy for AgentSwitchStrategy {
    fn name(&self) -> &str {
        "agent_switch"
    }

    fn can_handle(&self, _error: &TaskError, category: ErrorCategory) -> bool {
        matches!(category, ErrorCategory::Agent | ErrorCategory::Workflow)
    }

    fn execute<'a>(
        &'a self,
        _error: &'a TaskError,
        context: &'a RecoveryContext,
    ) -> Pin<Box<dyn Future<Output = StrategyOutcome> + Send + 'a>> {
        Box::pin(async move {
            let Some(operation) = &context.operation else {
                return StrategyOutcome::failed("No operation provided for agent switch");
            };
            let task = context.task.clone().unwrap_or_default();
            let requirements = extract_requirements(&task, &context.details);
            let exclude: Vec<&str> = context.agent.as_deref().into_iter().collect();

            let alternative = self.assignment.best_alternative(
                &requirements,
                &context.history,
                &exclude,
                |agent| context.accept_agent.as_ref().is_none_or(|accept| accept(agent)),
            );
            let Some(agent) = alternative else {
                return StrategyOutcome::failed("no alternative agent available");
            };

            tracing::info!(
                operation = %context.operation_name,
                from = ?context.agent,
                to = %agent,
                "switching agent"
            );
            match operation(Some(agent.clone())).await {
                Ok(output) => StrategyOutcome::Recovered(Resolution::SwitchAgent { agent, output }),
                Err(err) => StrategyOutcome::failed(format!("{agent} failed: {}", err.message)),
            }
        })
    }

    fn is_workflow_aware(&self) -> bool {
        true
    }
}

/// Requests a rollback to the latest checkpoint.
#[derive(Debug, Clone, Default)]
pub struct WorkflowRollbackStrategy;

impl RecoveryStrategy for WorkflowRollbackStrategy {
    fn name(&self) -> &str {
        "workflow_rollback"
    }

    fn can_handle(&self, _error: &TaskError, category: ErrorCategory) -> bool {
        matches!(category, ErrorCategory::Critical | ErrorCategory::Workflow)
    }

    fn execute<'a>(
        &'a self,
        _error: &'a TaskError,
        context: &'a RecoveryContext,
    ) -> Pin<Box<dyn Future<Output = StrategyOutcome> + Send + 'a>> {
        Box::pin(async move {
            match &context.last_checkpoint_id {
                Some(checkpoint_id) => StrategyOutcome::Recovered(Resolution::Rollback {
                    checkpoint_id: checkpoint_id.clone(),
                }),
                None => StrategyOutcome::failed("no checkpoint to roll back to"),
            }
        })
    }

    fn is_workflow_aware(&self) -> bool {
        true
    }
}
