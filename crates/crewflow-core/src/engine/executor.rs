//! `WorkflowEngine`: sequential task execution with checkpoints, handoff
//! enforcement, retry and recovery.
//!
//! All state changes go through [`StateManager`], so every mutation is
//! serialized per workflow id and persisted before the engine moves on.
//! Pause and cancel are status changes that the run loop observes at the
//! next task boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{Timelike, Utc};
use crewflow_types::config::EngineConfig;
use crewflow_types::error::{ErrorImpact, TaskError};
use crewflow_types::state::{
    Checkpoint, HandoffStatus, ProgressReport, TimelineKind, WorkflowState, WorkflowStatus,
};
use crewflow_types::task::{
    TaskRecoveryAttempt, TaskResult, TaskSpec, TaskStatus, WorkflowTemplate,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::assignment::{AgentAssignment, extract_requirements};
use crate::recovery::{
    ErrorRecoveryFramework, OperationFuture, RecoveryContext, RecoveryOperation, RecoveryResult,
    Resolution,
};
use crate::state::handoff::validate_handoff;
use crate::state::metrics::collect_execution_metrics;
use crate::state::{MetricsStore, StateManager, StateStore};

use super::artefact::{self, ArtefactGenerator, Placeholders};
use super::branching::{self, NextStep};
use super::condition;
use super::retry::{self, RetryOutcome};
use super::{EngineError, ExecutionReport, TaskExecutor, TaskRequest};

/// Runs workflow templates against a state store and a task executor.
///
/// Generic over the store and the executor; agent directory, recovery
/// framework and artefact generator are injected.
pub struct WorkflowEngine<S, X> {
    state: Arc<StateManager<S>>,
    executor: Arc<X>,
    assignment: Arc<AgentAssignment>,
    recovery: Arc<ErrorRecoveryFramework>,
    artefacts: Option<Arc<dyn ArtefactGenerator>>,
    config: EngineConfig,
    /// Tokens of the runs currently executing, keyed by workflow id.
    cancellation_tokens: DashMap<String, CancellationToken>,
}

impl<S, X> WorkflowEngine<S, X>
where
    S: StateStore + MetricsStore + 'static,
    X: TaskExecutor,
{
    pub fn new(
        state: Arc<StateManager<S>>,
        executor: Arc<X>,
        assignment: Arc<AgentAssignment>,
        recovery: Arc<ErrorRecoveryFramework>,
        config: EngineConfig,
    ) -> Self {
        Self {
            state,
            executor,
            assignment,
            recovery,
            artefacts: None,
            config,
            cancellation_tokens: DashMap::new(),
        }
    }

    pub fn with_artefact_generator(mut self, generator: Arc<dyn ArtefactGenerator>) -> Self {
        self.artefacts = Some(generator);
        self
    }

    pub fn state_manager(&self) -> &Arc<StateManager<S>> {
        &self.state
    }

    pub fn recovery(&self) -> &Arc<ErrorRecoveryFramework> {
        &self.recovery
    }

    pub fn assignment(&self) -> &Arc<AgentAssignment> {
        &self.assignment
    }

    /// Whether a run loop is currently executing `id`.
    pub fn is_running(&self, id: &str) -> bool {
        self.cancellation_tokens.contains_key(id)
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Start a new workflow `id` from `template` and run it.
    ///
    /// An invalid template is recorded as a `failed` workflow and returned
    /// as an error.
    pub async fn execute(
        &self,
        template: &WorkflowTemplate,
        id: &str,
    ) -> Result<ExecutionReport, EngineError> {
        if self.state.load(id).await?.is_some() {
            return Err(EngineError::AlreadyExists(id.to_string()));
        }

        let mut state = WorkflowState::new(id, template.tasks.len());
        state.template_name = Some(template.name.clone()).filter(|n| !n.is_empty());
        state.context = template.context.clone();

        if let Err(err) = template.validate() {
            state.status = WorkflowStatus::Failed;
            state.current_step = "failed".to_string();
            state.error = Some(err.to_string());
            state.push_timeline(TimelineKind::Failed, format!("Invalid template: {err}"), None);
            self.state.persist(id, &state).await?;
            tracing::error!(workflow_id = %id, error = %err, "workflow template rejected");
            return Err(err.into());
        }

        state.status = WorkflowStatus::Running;
        state.current_step = "started".to_string();
        state.push_timeline(
            TimelineKind::Started,
            format!("Workflow started with {} tasks", template.tasks.len()),
            None,
        );
        self.state.persist(id, &state).await?;
        tracing::info!(
            workflow_id = %id,
            template = %template.name,
            tasks = template.tasks.len(),
            "workflow started"
        );

        self.run(template, id, 0).await
    }

    /// Continue a paused, recovered or interrupted workflow from its cursor.
    ///
    /// An interrupted workflow is first restored from its latest checkpoint.
    pub async fn resume(
        &self,
        template: &WorkflowTemplate,
        id: &str,
    ) -> Result<ExecutionReport, EngineError> {
        template.validate()?;
        let state = self
            .state
            .load(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if state.total_steps != template.tasks.len() {
            return Err(EngineError::TemplateMismatch {
                id: id.to_string(),
                expected: state.total_steps,
                actual: template.tasks.len(),
            });
        }
        if self.is_running(id) {
            return Err(EngineError::InvalidState {
                id: id.to_string(),
                status: state.status,
                reason: "a run is already in progress".to_string(),
            });
        }

        let state = match state.status {
            WorkflowStatus::Paused => self.state.resume(id).await?,
            WorkflowStatus::Interrupted => self.state.recover_from_checkpoint(id, None).await?,
            WorkflowStatus::Initialized => {
                self.state
                    .update(id, |s| {
                        s.status = WorkflowStatus::Running;
                        s.push_timeline(TimelineKind::Started, "Workflow started", None);
                        Ok(s.clone())
                    })
                    .await?
            }
            WorkflowStatus::Running => state,
            status @ (WorkflowStatus::Completed | WorkflowStatus::Failed) => {
                return Err(EngineError::InvalidState {
                    id: id.to_string(),
                    status,
                    reason: "terminal workflows cannot be resumed".to_string(),
                });
            }
        };

        tracing::info!(workflow_id = %id, cursor = state.cursor, "workflow resumed");
        self.run(template, id, state.cursor).await
    }

    /// Pause a running workflow. The run loop stops at the next task boundary.
    pub async fn pause(&self, id: &str) -> Result<WorkflowState, EngineError> {
        Ok(self.state.pause(id).await?)
    }

    /// Interrupt a workflow on operator request.
    ///
    /// A pending backoff wait is cut short; an attempt already in flight is
    /// allowed to finish.
    pub async fn cancel(&self, id: &str, reason: &str) -> Result<WorkflowState, EngineError> {
        let state = self
            .state
            .load(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if state.status.is_terminal() {
            return Err(EngineError::InvalidState {
                id: id.to_string(),
                status: state.status,
                reason: "terminal workflows cannot be cancelled".to_string(),
            });
        }

        let state = self
            .state
            .mark_interrupted(id, &format!("Cancelled: {reason}"))
            .await?;
        if let Some(token) = self.cancellation_tokens.get(id) {
            token.cancel();
        }
        Ok(state)
    }

    /// Restore the latest (or named) checkpoint without running anything.
    pub async fn recover_from_checkpoint(
        &self,
        id: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<WorkflowState, EngineError> {
        Ok(self.state.recover_from_checkpoint(id, checkpoint_id).await?)
    }

    pub async fn progress(&self, id: &str) -> Result<Option<ProgressReport>, EngineError> {
        Ok(self.state.progress(id).await?)
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    async fn run(
        &self,
        template: &WorkflowTemplate,
        id: &str,
        start: usize,
    ) -> Result<ExecutionReport, EngineError> {
        let token = CancellationToken::new();
        match self.cancellation_tokens.entry(id.to_string()) {
            Entry::Occupied(_) => {
                return Err(EngineError::InvalidState {
                    id: id.to_string(),
                    status: WorkflowStatus::Running,
                    reason: "a run is already in progress".to_string(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }

        let result = self.run_loop(template, id, start, &token).await;
        self.cancellation_tokens.remove(id);
        let report = result?;

        if report.status.is_terminal() && self.config.collect_metrics {
            let metrics = collect_execution_metrics(&report.state);
            if let Err(err) = self
                .state
                .store_metrics(id, metrics.to_entry(Utc::now()))
                .await
            {
                tracing::warn!(workflow_id = %id, error = %err, "failed to store execution metrics");
            }
        }

        tracing::info!(
            workflow_id = %id,
            status = %report.status,
            executed = report.executed.len(),
            "workflow run finished"
        );
        Ok(report)
    }

    async fn run_loop(
        &self,
        template: &WorkflowTemplate,
        id: &str,
        start: usize,
        token: &CancellationToken,
    ) -> Result<ExecutionReport, EngineError> {
        let mut executed = Vec::new();
        let mut index = start;

        loop {
            let state = self
                .state
                .load(id)
                .await?
                .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
            if state.status != WorkflowStatus::Running || token.is_cancelled() {
                tracing::info!(workflow_id = %id, status = %state.status, "run stopped at task boundary");
                return Ok(ExecutionReport::from_state(state, executed));
            }

            let Some(task) = template.tasks.get(index) else {
                let state = self.complete(id).await?;
                return Ok(ExecutionReport::from_state(state, executed));
            };

            let hour = chrono::Local::now().hour();
            if condition::should_skip(task.condition.as_ref(), &state, &state.context, hour) {
                self.skip(id, index, task, "condition matched").await?;
                index += 1;
                continue;
            }

            executed.push(index);
            match self.run_task(id, index, task, &state, token).await? {
                Some(NextStep::Task(next)) => index = next,
                Some(NextStep::End) => {
                    let state = self.complete(id).await?;
                    return Ok(ExecutionReport::from_state(state, executed));
                }
                None => {
                    let state = self
                        .state
                        .load(id)
                        .await?
                        .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
                    return Ok(ExecutionReport::from_state(state, executed));
                }
            }
        }
    }

    async fn complete(&self, id: &str) -> Result<WorkflowState, EngineError> {
        let state = self
            .state
            .update(id, |s| {
                s.status = WorkflowStatus::Completed;
                s.current_step = "completed".to_string();
                s.cursor = s.total_steps;
                s.push_timeline(TimelineKind::Completed, "Workflow completed", None);
                Ok(s.clone())
            })
            .await?;
        tracing::info!(workflow_id = %id, steps_completed = state.steps_completed.len(), "workflow completed");
        Ok(state)
    }

    async fn skip(&self, id: &str, index: usize, task: &TaskSpec, why: &str) -> Result<(), EngineError> {
        let label = task.label(index);
        self.state
            .update(id, |s| {
                s.record_result(TaskResult::skipped(index));
                s.cursor = index + 1;
                s.push_timeline(
                    TimelineKind::TaskSkipped,
                    format!("Task {label} skipped: {why}"),
                    Some(index),
                );
                Ok(())
            })
            .await?;
        tracing::debug!(workflow_id = %id, task_index = index, reason = why, "task skipped");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Single task
    // -----------------------------------------------------------------------

    /// Run task `index`. Returns where to continue, or `None` when the
    /// workflow stopped (interrupted or cancelled).
    async fn run_task(
        &self,
        id: &str,
        index: usize,
        task: &TaskSpec,
        state: &WorkflowState,
        token: &CancellationToken,
    ) -> Result<Option<NextStep>, EngineError> {
        let label = task.label(index);
        let checkpoint_id = self.checkpoint(id, index, task).await?;

        // Agent resolution and handoff enforcement.
        let mut agent = match &task.agent {
            Some(agent) => agent.clone(),
            None => self
                .assignment
                .select_agent(task, &state.context, &state.agent_handoffs),
        };
        let previous = state.last_agent().map(str::to_string);
        let mut handoff_seq = None;
        if let Some(from) = previous.as_deref().filter(|from| *from != agent) {
            let validation = self.state.validate_handoff(id, from, &agent).await?;
            if !validation.is_valid {
                let requirements = extract_requirements(task, &state.context);
                let alternative = self.assignment.best_alternative(
                    &requirements,
                    &state.agent_handoffs,
                    &[agent.as_str()],
                    |candidate| candidate == from || validate_handoff(state, from, candidate).is_valid,
                );
                match alternative {
                    Some(replacement) => {
                        tracing::warn!(
                            workflow_id = %id,
                            task_index = index,
                            rejected = %agent,
                            agent = %replacement,
                            "handoff rejected, using alternative agent"
                        );
                        agent = replacement;
                    }
                    None => {
                        let error = TaskError::with_kind(
                            "HandoffError",
                            format!(
                                "invalid handoff {from} -> {agent}: {}",
                                validation.errors.join("; ")
                            ),
                        );
                        let result = TaskResult::pending(index, Some(agent.clone()));
                        return self.fail_task(id, index, task, state, result, &error, None).await;
                    }
                }
            }
            if agent != from {
                let record = self
                    .state
                    .track_handoff(id, from, &agent, json!({"task_index": index}))
                    .await?;
                handoff_seq = Some(record.sequence_id);
            }
        }

        self.state
            .update(id, |s| {
                s.current_step = label.clone();
                s.push_timeline(
                    TimelineKind::TaskStarted,
                    format!("Task {label} started with {agent}"),
                    Some(index),
                );
                Ok(())
            })
            .await?;
        tracing::info!(workflow_id = %id, task_index = index, agent = %agent, "task started");

        let mut result = TaskResult::pending(index, Some(agent.clone()));
        let request = TaskRequest {
            workflow_id: id.to_string(),
            task_index: index,
            task: task.clone(),
            agent: agent.clone(),
            attempt: 0,
            context: state.context.clone(),
        };

        let outcome = retry::run_with_retry(&task.retry, token, |attempt| {
            let executor = Arc::clone(&self.executor);
            let mut request = request.clone();
            request.attempt = attempt;
            async move { executor.execute(request).await }
        })
        .await;
        result.attempts = outcome.attempts;

        let error = match outcome.result {
            Ok(ref output) => {
                if outcome.recovered() {
                    result.recovered = true;
                    result.recovery_attempts.push(retry_attempt_record(&outcome));
                }
                let output = output.clone();
                return self
                    .complete_task(id, index, task, state, result, output, None)
                    .await;
            }
            Err(ref err) if outcome.cancelled => {
                result.status = TaskStatus::Failed;
                result.error = Some(err.message.clone());
                result.finished_at = Some(Utc::now());
                self.state
                    .update(id, |s| {
                        s.record_result(result);
                        Ok(())
                    })
                    .await?;
                tracing::info!(workflow_id = %id, task_index = index, "task cancelled during backoff");
                return Ok(None);
            }
            Err(err) => err,
        };

        tracing::warn!(
            workflow_id = %id,
            task_index = index,
            agent = %agent,
            attempts = outcome.attempts,
            error = %error,
            "task retries exhausted"
        );

        if !self.config.use_advanced_recovery {
            return self
                .fail_task(id, index, task, state, result, &error, handoff_seq)
                .await;
        }

        let recovery = self
            .recover(id, index, task, state, &request, &checkpoint_id, outcome.attempts, &error)
            .await;
        result.recovery_attempts.push(TaskRecoveryAttempt {
            strategy: recovery
                .strategy
                .clone()
                .unwrap_or_else(|| "none".to_string()),
            success: recovery.recovery_success,
            timestamp: Utc::now(),
            error_id: Some(recovery.error_id.clone()),
            notes: Some(format!(
                "{} error, {} severity",
                recovery.category, recovery.severity
            )),
        });
        let force_reason = recovery.force_interrupt.then(|| {
            format!(
                "{} severity error in task {label}: {}",
                recovery.severity, error.message
            )
        });

        match recovery.resolution.clone().filter(|_| recovery.recovery_success) {
            Some(Resolution::Retried { output, .. })
            | Some(Resolution::Fallback { output })
            | Some(Resolution::Probed { output }) => {
                result.recovered = true;
                self.complete_task(id, index, task, state, result, output, force_reason)
                    .await
            }
            Some(Resolution::SwitchAgent {
                agent: replacement,
                output,
            }) => {
                result.recovered = true;
                result.agent = Some(replacement);
                self.complete_task(id, index, task, state, result, output, force_reason)
                    .await
            }
            Some(Resolution::Skip) => {
                result.status = TaskStatus::Skipped;
                result.recovered = true;
                result.error = Some(error.message.clone());
                result.finished_at = Some(Utc::now());
                self.state
                    .update(id, |s| {
                        s.record_result(result);
                        s.cursor = index + 1;
                        s.push_timeline(
                            TimelineKind::TaskSkipped,
                            format!("Optional task {label} skipped after failure"),
                            Some(index),
                        );
                        Ok(())
                    })
                    .await?;
                if let Some(reason) = force_reason {
                    self.state.mark_interrupted(id, &reason).await?;
                    return Ok(None);
                }
                Ok(Some(NextStep::Task(index + 1)))
            }
            Some(Resolution::Rollback { checkpoint_id }) => {
                result.status = TaskStatus::Failed;
                result.error = Some(error.message.clone());
                result.finished_at = Some(Utc::now());
                self.state
                    .update(id, |s| {
                        s.record_result(result);
                        Ok(())
                    })
                    .await?;
                self.state
                    .recover_from_checkpoint(id, Some(&checkpoint_id))
                    .await?;
                self.state
                    .mark_interrupted(
                        id,
                        &format!(
                            "Rolled back to checkpoint {checkpoint_id} after task {label} failed: {}",
                            error.message
                        ),
                    )
                    .await?;
                Ok(None)
            }
            None => {
                self.fail_task(id, index, task, state, result, &error, handoff_seq)
                    .await
            }
        }
    }

    /// Append a checkpoint for task `index` and return its id.
    async fn checkpoint(&self, id: &str, index: usize, task: &TaskSpec) -> Result<String, EngineError> {
        let checkpoint_id = Uuid::now_v7().to_string();
        let task_spec = task.clone();
        let cp_id = checkpoint_id.clone();
        self.state
            .update(id, move |s| {
                s.cursor = index;
                let state_snapshot = s.snapshot();
                s.checkpoints.push(Checkpoint {
                    id: cp_id,
                    timestamp: Utc::now(),
                    task_index: index,
                    task_spec,
                    state_snapshot,
                });
                s.push_timeline(
                    TimelineKind::Checkpoint,
                    format!("Checkpoint before task {index}"),
                    Some(index),
                );
                Ok(())
            })
            .await?;
        tracing::debug!(workflow_id = %id, task_index = index, checkpoint_id = %checkpoint_id, "checkpoint created");
        Ok(checkpoint_id)
    }

    /// Hand an exhausted failure to the recovery framework.
    #[allow(clippy::too_many_arguments)]
    async fn recover(
        &self,
        id: &str,
        index: usize,
        task: &TaskSpec,
        state: &WorkflowState,
        request: &TaskRequest,
        checkpoint_id: &str,
        attempts: u32,
        error: &TaskError,
    ) -> RecoveryResult {
        let executor = Arc::clone(&self.executor);
        let base = request.clone();
        let counter = Arc::new(AtomicU32::new(attempts));
        let operation: RecoveryOperation =
            Arc::new(move |agent: Option<String>| -> OperationFuture {
                let executor = Arc::clone(&executor);
                let mut request = base.clone();
                request.attempt = counter.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(agent) = agent {
                    request.agent = agent;
                }
                Box::pin(async move { executor.execute(request).await })
            });

        let snapshot = Arc::new(state.clone());
        let previous = state.last_agent().map(str::to_string);
        let accept = move |candidate: &str| match previous.as_deref() {
            Some(from) if from != candidate => validate_handoff(&snapshot, from, candidate).is_valid,
            _ => true,
        };

        let mut context = RecoveryContext::new(recovery_operation(id, &task.label(index)));
        context.workflow_id = Some(id.to_string());
        context.task_index = Some(index);
        context.agent = Some(request.agent.clone());
        context.task = Some(task.clone());
        context.critical = task.critical;
        context.impact = Some(if task.optional {
            ErrorImpact::Local
        } else {
            ErrorImpact::WorkflowBlocking
        });
        context.details = state.context.clone();
        context.details.insert("attempts".into(), json!(attempts));
        context.history = state.agent_handoffs.clone();
        context.last_checkpoint_id = Some(checkpoint_id.to_string());
        context.operation = Some(operation);
        context.accept_agent = Some(Arc::new(accept));

        let result = self.recovery.handle_workflow_error(error, &context).await;
        tracing::info!(
            workflow_id = %id,
            task_index = index,
            error_id = %result.error_id,
            success = result.recovery_success,
            strategy = ?result.strategy,
            "recovery finished"
        );
        result
    }

    /// Record a successful result, run the artefact hook and resolve the
    /// branching target.
    #[allow(clippy::too_many_arguments)]
    async fn complete_task(
        &self,
        id: &str,
        index: usize,
        task: &TaskSpec,
        state: &WorkflowState,
        mut result: TaskResult,
        output: Value,
        force_interrupt: Option<String>,
    ) -> Result<Option<NextStep>, EngineError> {
        let label = task.label(index);
        let finished_at = Utc::now();
        result.status = TaskStatus::Success;
        result.finished_at = Some(finished_at);

        if let Some(spec) = &task.output {
            let agent = result.agent.clone().unwrap_or_default();
            let values = Placeholders {
                workflow_id: id,
                task_index: index,
                agent: &agent,
                timestamp: finished_at,
                status: "success",
                message: artefact::message_from_output(&output),
            };
            let (outcome, produced) = artefact::run_hook(self.artefacts.as_deref(), spec, &values);
            result.artefact_status = Some(outcome);
            result.artefacts_generated = produced;
        }

        let next = branching::after_success(task, index, Some(&output), &state.context);
        result.output = Some(output);
        let recovered_by = result
            .recovered
            .then(|| result.recovery_attempts.last().map(|a| a.strategy.clone()))
            .flatten();
        let branched = task.branching.is_some() && next != NextStep::Task(index + 1);

        self.state
            .update(id, |s| {
                s.record_result(result);
                s.mark_step_completed(index);
                s.recompute_progress();
                if let Some(strategy) = &recovered_by {
                    s.push_timeline(
                        TimelineKind::Recovered,
                        format!("Task {label} recovered via {strategy}"),
                        Some(index),
                    );
                }
                s.push_timeline(
                    TimelineKind::TaskCompleted,
                    format!("Task {label} completed"),
                    Some(index),
                );
                s.cursor = match next {
                    NextStep::Task(to) => to,
                    NextStep::End => s.total_steps,
                };
                if branched {
                    let target = match next {
                        NextStep::Task(to) => format!("task {to}"),
                        NextStep::End => "end".to_string(),
                    };
                    s.push_timeline(
                        TimelineKind::Branch,
                        format!("Branching from task {index} to {target}"),
                        Some(index),
                    );
                }
                Ok(())
            })
            .await?;
        tracing::info!(workflow_id = %id, task_index = index, next = ?next, "task completed");

        if let Some(reason) = force_interrupt {
            self.state.mark_interrupted(id, &reason).await?;
            return Ok(None);
        }
        Ok(Some(next))
    }

    /// Record a failed result. Follows a failure branch when one applies,
    /// otherwise interrupts the workflow with recovery options.
    #[allow(clippy::too_many_arguments)]
    async fn fail_task(
        &self,
        id: &str,
        index: usize,
        task: &TaskSpec,
        state: &WorkflowState,
        mut result: TaskResult,
        error: &TaskError,
        handoff_seq: Option<u64>,
    ) -> Result<Option<NextStep>, EngineError> {
        let label = task.label(index);
        result.status = TaskStatus::Failed;
        result.error = Some(error.message.clone());
        result.finished_at = Some(Utc::now());
        let agent = result.agent.clone().unwrap_or_default();
        let next = branching::after_failure(task, index, &state.context);

        self.state
            .update(id, |s| {
                if let Some(handoff) = handoff_seq.and_then(|seq| s.agent_handoffs.get_mut(seq as usize)) {
                    handoff.status = HandoffStatus::Failed;
                    handoff.error = Some(error.message.clone());
                }
                s.record_result(result);
                s.push_timeline(
                    TimelineKind::TaskFailed,
                    format!("Task {label} failed: {}", error.message),
                    Some(index),
                );
                if let Some(step) = next {
                    s.cursor = match step {
                        NextStep::Task(to) => to,
                        NextStep::End => s.total_steps,
                    };
                    s.push_timeline(
                        TimelineKind::Branch,
                        format!("Failure branch from task {index}"),
                        Some(index),
                    );
                }
                Ok(())
            })
            .await?;

        if let Some(step) = next {
            tracing::info!(workflow_id = %id, task_index = index, next = ?step, "following failure branch");
            return Ok(Some(step));
        }

        let requirements = extract_requirements(task, &state.context);
        let alternatives: Vec<String> = self
            .assignment
            .rank(&requirements, &state.agent_handoffs, &[agent.as_str()])
            .into_iter()
            .take(2)
            .map(|score| score.agent_id)
            .collect();
        self.state
            .recover_from_agent_failure(id, &agent, &error.message, &alternatives, task.optional)
            .await?;
        tracing::error!(workflow_id = %id, task_index = index, agent = %agent, "task failed, workflow interrupted");
        Ok(None)
    }
}

/// Breaker key for a task's recovery. Scoped to the workflow so one
/// workflow's failures never open another workflow's breaker.
fn recovery_operation(workflow_id: &str, label: &str) -> String {
    format!("{workflow_id}:task:{label}")
}

fn retry_attempt_record(outcome: &RetryOutcome) -> TaskRecoveryAttempt {
    TaskRecoveryAttempt {
        strategy: "retry".to_string(),
        success: true,
        timestamp: Utc::now(),
        error_id: None,
        notes: Some(format!(
            "succeeded on attempt {} after {} failures",
            outcome.attempts,
            outcome.failures.len()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::StaticAgentDirectory;
    use crate::recovery::FallbackStrategy;
    use crate::state::InMemoryStateStore;
    use crewflow_types::config::{AssignmentConfig, RecoveryConfig};
    use crewflow_types::state::RecoveryAction;
    use crewflow_types::task::{BranchTarget, Branching, ConditionOperator, TaskCondition};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;
    use tokio::time::Instant;

    type Manager = StateManager<InMemoryStateStore>;

    /// Executor that fails selected tasks a fixed number of times.
    #[derive(Default)]
    struct Scripted {
        failures: Mutex<HashMap<usize, u32>>,
        always_fail: Mutex<Vec<usize>>,
        message: String,
        calls: Mutex<Vec<(usize, String, Instant)>>,
        healthy: AtomicBool,
        pause_after: Option<(usize, Arc<Manager>)>,
    }

    impl Scripted {
        fn new() -> Self {
            Self {
                message: "boom".to_string(),
                ..Default::default()
            }
        }

        fn failing(self, index: usize, times: u32) -> Self {
            self.failures.lock().unwrap().insert(index, times);
            self
        }

        fn broken(self, index: usize) -> Self {
            self.always_fail.lock().unwrap().push(index);
            self
        }

        fn call_times(&self, index: usize) -> Vec<Instant> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(i, _, _)| *i == index)
                .map(|(_, _, at)| *at)
                .collect()
        }
    }

    impl TaskExecutor for Scripted {
        async fn execute(&self, request: TaskRequest) -> Result<Value, TaskError> {
            self.calls
                .lock()
                .unwrap()
                .push((request.task_index, request.agent.clone(), Instant::now()));

            if let Some((index, manager)) = &self.pause_after {
                if *index == request.task_index {
                    manager.pause(&request.workflow_id).await.unwrap();
                }
            }

            let broken = !self.healthy.load(Ordering::SeqCst)
                && self.always_fail.lock().unwrap().contains(&request.task_index);
            let scripted = {
                let mut failures = self.failures.lock().unwrap();
                match failures.get_mut(&request.task_index) {
                    Some(left) if *left > 0 => {
                        *left -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if broken || scripted {
                return Err(TaskError::new(self.message.clone()));
            }
            Ok(json!({"result": "ok", "agent": request.agent, "task": request.task_index}))
        }
    }

    fn template(n: usize) -> WorkflowTemplate {
        WorkflowTemplate {
            name: "test".into(),
            description: None,
            tasks: (0..n)
                .map(|i| {
                    let mut task = TaskSpec::new(format!("Implement step {i}"));
                    task.retry.backoff_seconds = 0.0;
                    task.retry.max_attempts = 1;
                    task
                })
                .collect(),
            context: serde_json::Map::new(),
        }
    }

    fn engine_with(
        executor: Scripted,
        manager: Arc<Manager>,
        recovery: ErrorRecoveryFramework,
        config: EngineConfig,
    ) -> (WorkflowEngine<InMemoryStateStore, Scripted>, Arc<Scripted>) {
        let assignment = Arc::new(AgentAssignment::new(
            Arc::new(StaticAgentDirectory::bmad_default()),
            AssignmentConfig::default(),
        ));
        let executor = Arc::new(executor);
        let engine = WorkflowEngine::new(
            manager,
            Arc::clone(&executor),
            assignment,
            Arc::new(recovery),
            config,
        );
        (engine, executor)
    }

    fn engine(executor: Scripted) -> (WorkflowEngine<InMemoryStateStore, Scripted>, Arc<Scripted>) {
        let assignment = Arc::new(AgentAssignment::new(
            Arc::new(StaticAgentDirectory::bmad_default()),
            AssignmentConfig::default(),
        ));
        let recovery = ErrorRecoveryFramework::new(RecoveryConfig::default())
            .unwrap()
            .with_workflow_strategies(assignment);
        engine_with(
            executor,
            Arc::new(StateManager::new(InMemoryStateStore::new())),
            recovery,
            EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn sequential_run_completes_and_stores_metrics() {
        let (engine, _) = engine(Scripted::new());
        let report = engine.execute(&template(3), "wf").await.unwrap();

        assert_eq!(report.status, WorkflowStatus::Completed);
        assert_eq!(report.executed, vec![0, 1, 2]);
        assert_eq!(report.steps_completed, vec![0, 1, 2]);
        assert_eq!(report.state.progress.percentage, 100.0);
        assert_eq!(report.state.checkpoints.len(), 3);
        assert!(report.state.task_results.values().all(|r| r.status == TaskStatus::Success));
        let kinds: Vec<_> = report.state.execution_timeline.iter().map(|e| e.kind).collect();
        assert_eq!(kinds.first(), Some(&TimelineKind::Started));
        assert_eq!(kinds.last(), Some(&TimelineKind::Completed));

        let history = engine.state_manager().metrics_history("wf", None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].success_rate, 1.0);

        assert!(matches!(
            engine.execute(&template(3), "wf").await,
            Err(EngineError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn flaky_task_recovers_within_retries() {
        let (engine, _) = engine(Scripted::new().failing(1, 2));
        let mut tpl = template(3);
        tpl.tasks[1].retry.max_attempts = 2;

        let report = engine.execute(&tpl, "wf").await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Completed);
        assert_eq!(report.steps_completed, vec![0, 1, 2]);
        let second = &report.state.task_results[&1];
        assert!(second.recovered);
        assert_eq!(second.recovery_attempts.len(), 1);
        assert_eq!(second.attempts, 3);
        assert!(!report.state.task_results[&0].recovered);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_back_off_and_interrupt() {
        let (engine, executor) = engine_with(
            Scripted::new().broken(0),
            Arc::new(StateManager::new(InMemoryStateStore::new())),
            ErrorRecoveryFramework::empty(RecoveryConfig::default()),
            EngineConfig {
                use_advanced_recovery: false,
                collect_metrics: true,
            },
        );
        let mut tpl = template(2);
        tpl.tasks[0].retry.max_attempts = 3;
        tpl.tasks[0].retry.backoff_seconds = 1.0;

        let report = engine.execute(&tpl, "wf").await.unwrap();
        let times = executor.call_times(0);
        let gaps: Vec<u64> = times.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!(gaps, vec![1, 2, 4]);

        assert_eq!(report.status, WorkflowStatus::Interrupted);
        assert_eq!(report.executed, vec![0]);
        let state = &report.state;
        assert_eq!(state.task_results[&0].status, TaskStatus::Failed);
        assert_eq!(state.task_results[&0].attempts, 4);
        assert!(state.interruption_reason.as_deref().unwrap().starts_with("Agent failure"));
        assert_eq!(state.recovery_options[0].action, RecoveryAction::RetrySameAgent);
        assert!(state
            .recovery_options
            .iter()
            .any(|o| o.action == RecoveryAction::RollbackCheckpoint));
        assert!(
            engine
                .state_manager()
                .metrics_history("wf", None)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn success_branch_jumps_forward() {
        let (engine, _) = engine(Scripted::new());
        let mut tpl = template(4);
        tpl.tasks[0].branching = Some(Branching::OnSuccess {
            success_target: BranchTarget::Index(3),
        });

        let report = engine.execute(&tpl, "wf").await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Completed);
        assert_eq!(report.executed, vec![0, 3]);
        assert_eq!(report.steps_completed, vec![0, 3]);
        assert!(!report.state.task_results.contains_key(&1));
        assert!(!report.state.task_results.contains_key(&2));
    }

    #[tokio::test]
    async fn failure_branch_keeps_running() {
        let (engine, _) = engine(Scripted::new().broken(0));
        let mut tpl = template(3);
        tpl.tasks[0].branching = Some(Branching::OnFailure {
            failure_target: BranchTarget::Index(2),
        });

        let report = engine.execute(&tpl, "wf").await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Completed);
        assert_eq!(report.executed, vec![0, 2]);
        assert_eq!(report.state.task_results[&0].status, TaskStatus::Failed);
        assert_eq!(report.steps_completed, vec![2]);
    }

    #[tokio::test]
    async fn matching_condition_skips_task() {
        let (engine, _) = engine(Scripted::new());
        let mut tpl = template(3);
        tpl.context.insert("env".into(), json!("prod"));
        tpl.tasks[1].condition = Some(TaskCondition::ContextCheck {
            key: "env".into(),
            operator: ConditionOperator::Equals,
            value: json!("prod"),
        });
        tpl.tasks[2].condition = Some(TaskCondition::ContextCheck {
            key: "missing".into(),
            operator: ConditionOperator::Equals,
            value: json!(1),
        });

        let report = engine.execute(&tpl, "wf").await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Completed);
        assert_eq!(report.executed, vec![0, 2]);
        assert_eq!(report.state.task_results[&1].status, TaskStatus::Skipped);
        assert_eq!(report.steps_completed, vec![0, 2]);
    }

    #[tokio::test]
    async fn cyclic_handoff_is_rerouted() {
        let (engine, _) = engine(Scripted::new());
        let mut tpl = template(3);
        for (task, agent) in tpl.tasks.iter_mut().zip(["architect", "dev-agent", "architect"]) {
            task.agent = Some(agent.to_string());
        }
        tpl.tasks[2].description = "Design the review".into();

        let report = engine.execute(&tpl, "wf").await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Completed);
        let third = report.state.task_results[&2].agent.clone().unwrap();
        assert_ne!(third, "architect");
        assert!(!report
            .state
            .agent_handoffs
            .iter()
            .any(|h| h.from_agent == "dev-agent" && h.to_agent == "architect"));
    }

    #[tokio::test]
    async fn pause_takes_effect_at_boundary_and_resume_continues() {
        let manager = Arc::new(StateManager::new(InMemoryStateStore::new()));
        let executor = Scripted {
            pause_after: Some((0, Arc::clone(&manager))),
            ..Scripted::new()
        };
        let (engine, _) = engine_with(
            executor,
            manager,
            ErrorRecoveryFramework::empty(RecoveryConfig::default()),
            EngineConfig::default(),
        );
        let tpl = template(3);

        let report = engine.execute(&tpl, "wf").await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Paused);
        assert_eq!(report.executed, vec![0]);
        assert_eq!(report.steps_completed, vec![0]);

        let report = engine.resume(&tpl, "wf").await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Completed);
        assert_eq!(report.executed, vec![1, 2]);
        assert_eq!(report.steps_completed, vec![0, 1, 2]);
        assert!(report
            .state
            .execution_timeline
            .iter()
            .any(|e| e.kind == TimelineKind::Resumed));
    }

    #[tokio::test]
    async fn interrupted_workflow_resumes_from_checkpoint() {
        let (engine, executor) = engine(Scripted::new().broken(1));
        let tpl = template(3);

        let report = engine.execute(&tpl, "wf").await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Interrupted);
        assert_eq!(report.steps_completed, vec![0]);

        executor.healthy.store(true, Ordering::SeqCst);
        let report = engine.resume(&tpl, "wf").await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Completed);
        assert_eq!(report.executed, vec![1, 2]);
        assert_eq!(report.steps_completed, vec![0, 1, 2]);
        assert!(report.state.metadata.recovered);
        assert!(report.state.metadata.recovery_checkpoint.is_some());

        assert!(matches!(
            engine.resume(&tpl, "wf").await,
            Err(EngineError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn critical_task_interrupts_even_when_recovered() {
        let fallback: RecoveryOperation = Arc::new(|_agent: Option<String>| -> OperationFuture {
            Box::pin(async { Ok(json!({"result": "cached"})) })
        });
        let recovery = ErrorRecoveryFramework::empty(RecoveryConfig::default())
            .with_strategy(Arc::new(FallbackStrategy::new(fallback)));
        let (engine, _) = engine_with(
            Scripted::new().broken(0),
            Arc::new(StateManager::new(InMemoryStateStore::new())),
            recovery,
            EngineConfig::default(),
        );
        let mut tpl = template(2);
        tpl.tasks[0].critical = true;

        let report = engine.execute(&tpl, "wf").await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Interrupted);
        let first = &report.state.task_results[&0];
        assert_eq!(first.status, TaskStatus::Success);
        assert!(first.recovered);
        assert_eq!(first.recovery_attempts[0].strategy, "fallback");
        assert_eq!(first.output, Some(json!({"result": "cached"})));
        assert!(report
            .state
            .interruption_reason
            .as_deref()
            .unwrap()
            .starts_with("critical severity"));
    }

    #[tokio::test]
    async fn optional_task_is_skipped_by_recovery() {
        // "task" in the message makes this a workflow error.
        let executor = Scripted {
            message: "task output rejected".to_string(),
            ..Scripted::new().broken(1)
        };
        let (engine, _) = engine(executor);
        let mut tpl = template(3);
        tpl.tasks[1].optional = true;
        tpl.tasks[1].agent = Some("dev-agent".into());

        let report = engine.execute(&tpl, "wf").await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Completed);
        let second = &report.state.task_results[&1];
        assert!(second.recovered);
        assert_eq!(second.status, TaskStatus::Skipped);
        assert_eq!(second.recovery_attempts[0].strategy, "workflow_skip");
        assert_eq!(report.state.task_results[&2].status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn invalid_template_fails_workflow() {
        let (engine, _) = engine(Scripted::new());
        let mut tpl = template(2);
        tpl.tasks[0].branching = Some(Branching::OnSuccess {
            success_target: BranchTarget::Index(0),
        });

        assert!(matches!(
            engine.execute(&tpl, "wf").await,
            Err(EngineError::Template(_))
        ));
        let state = engine.state_manager().load("wf").await.unwrap().unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert!(state.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_state_is_scoped_to_each_workflow() {
        let (engine, _) = engine(Scripted::new().broken(0));
        let threshold = RecoveryConfig::default().failure_threshold as usize;

        for n in 0..=threshold + 1 {
            let id = format!("wf{n}");
            let report = engine.execute(&template(1), &id).await.unwrap();
            assert_eq!(report.status, WorkflowStatus::Interrupted);
            let strategies: Vec<_> = report.state.task_results[&0]
                .recovery_attempts
                .iter()
                .map(|a| a.strategy.as_str())
                .collect();
            assert!(!strategies.contains(&"circuit_breaker"), "{id}: {strategies:?}");

            let operation = recovery_operation(&id, &TaskSpec::new("x").label(0));
            let status = engine.recovery().circuit_breaker_status(&operation).unwrap();
            assert_eq!(status.failure_count, 1);
            assert!(!engine.recovery().is_circuit_open(&operation));
        }
    }

    #[tokio::test]
    async fn cancel_interrupts_paused_workflow() {
        let manager = Arc::new(StateManager::new(InMemoryStateStore::new()));
        let executor = Scripted {
            pause_after: Some((0, Arc::clone(&manager))),
            ..Scripted::new()
        };
        let (engine, _) = engine_with(
            executor,
            manager,
            ErrorRecoveryFramework::empty(RecoveryConfig::default()),
            EngineConfig::default(),
        );
        engine.execute(&template(2), "wf").await.unwrap();

        let state = engine.cancel("wf", "operator request").await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Interrupted);
        assert_eq!(
            state.interruption_reason.as_deref(),
            Some("Cancelled: operator request")
        );
        assert!(matches!(engine.pause("wf").await, Err(EngineError::Store(_))));
    }
}
