//! High-level workflow state operations over any [`StateStore`].
//!
//! `StateManager` serializes every operation on one workflow id behind a
//! per-id async mutex, so a read-modify-write never interleaves with another
//! on the same workflow. Distinct ids proceed independently; the store's own
//! lock only guards the I/O itself.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use crewflow_types::metrics::{
    AggregatedMetrics, PerformanceEntry, RetentionPolicy, StorageStatus,
};
use crewflow_types::state::{
    HandoffRecord, HandoffValidation, IntegrityReport, ProgressReport, RecoveryAction,
    RecoveryOption, TimelineKind, WorkflowState, WorkflowStatus, WorkflowSummary,
};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::handoff::{record_handoff, validate_handoff};
use super::integrity::integrity_check;
use super::metrics::{aggregate, apply_retention, prune_older_than, validate_policy};
use super::{MetricsStore, StateStore, StoreError};

const STATE_NOT_FOUND: &str = "Workflow state not found";

// ---------------------------------------------------------------------------
// StateManager
// ---------------------------------------------------------------------------

/// Serialized access to durable workflow state.
///
/// Generic over `S: StateStore` so the same logic runs against the
/// filesystem store and the in-memory store used in tests.
pub struct StateManager<S> {
    store: S,
    locks: DashMap<String, Arc<Mutex<()>>>,
    retention: RwLock<RetentionPolicy>,
    last_cleanup: Mutex<DateTime<Utc>>,
}

impl<S: StateStore> StateManager<S> {
    pub fn new(store: S) -> Self {
        Self::with_retention(store, RetentionPolicy::default())
    }

    pub fn with_retention(store: S, retention: RetentionPolicy) -> Self {
        Self {
            store,
            locks: DashMap::new(),
            retention: RwLock::new(retention),
            last_cleanup: Mutex::new(Utc::now()),
        }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(id.to_string()).or_default().clone();
        mutex.lock_owned().await
    }

    // -----------------------------------------------------------------------
    // Basic access
    // -----------------------------------------------------------------------

    /// Persist `state` under `id`, returning the stored document.
    pub async fn persist(&self, id: &str, state: &WorkflowState) -> Result<WorkflowState, StoreError> {
        let _guard = self.lock(id).await;
        self.store.persist(id, state).await
    }

    /// Load the state for `id`.
    pub async fn load(&self, id: &str) -> Result<Option<WorkflowState>, StoreError> {
        let _guard = self.lock(id).await;
        self.store.recover(id).await
    }

    /// Load, mutate and persist the state for `id` as one serialized step.
    ///
    /// Nothing is written when `apply` returns an error.
    pub async fn update<T, F>(&self, id: &str, apply: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut WorkflowState) -> Result<T, StoreError> + Send,
        T: Send,
    {
        let _guard = self.lock(id).await;
        let mut state = self
            .store
            .recover(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let value = apply(&mut state)?;
        self.store.persist(id, &state).await?;
        Ok(value)
    }

    // -----------------------------------------------------------------------
    // Handoffs and integrity
    // -----------------------------------------------------------------------

    /// Record a successful handoff from `from` to `to`.
    pub async fn track_handoff(
        &self,
        id: &str,
        from: &str,
        to: &str,
        data: Value,
    ) -> Result<HandoffRecord, StoreError> {
        let record = self
            .update(id, |state| Ok(record_handoff(state, from, to, data, None)))
            .await?;
        tracing::debug!(workflow_id = %id, from, to, sequence_id = record.sequence_id, "handoff tracked");
        Ok(record)
    }

    /// Validate a prospective handoff. A missing workflow is invalid.
    pub async fn validate_handoff(
        &self,
        id: &str,
        from: &str,
        to: &str,
    ) -> Result<HandoffValidation, StoreError> {
        match self.load(id).await? {
            Some(state) => Ok(validate_handoff(&state, from, to)),
            None => Ok(HandoffValidation {
                is_valid: false,
                errors: vec![STATE_NOT_FOUND.to_string()],
                ..Default::default()
            }),
        }
    }

    /// Audit the stored state for `id`. A missing workflow is invalid.
    pub async fn integrity_check(&self, id: &str) -> Result<IntegrityReport, StoreError> {
        match self.load(id).await? {
            Some(state) => Ok(integrity_check(&state)),
            None => Ok(IntegrityReport {
                is_valid: false,
                issues: vec![STATE_NOT_FOUND.to_string()],
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle transitions
    // -----------------------------------------------------------------------

    /// Mark the workflow interrupted, creating a minimal state if none exists.
    pub async fn mark_interrupted(&self, id: &str, reason: &str) -> Result<WorkflowState, StoreError> {
        let _guard = self.lock(id).await;
        let mut state = match self.store.recover(id).await? {
            Some(state) => state,
            None => WorkflowState::minimal_interrupted(id),
        };
        state.status = WorkflowStatus::Interrupted;
        state.interruption_reason = Some(reason.to_string());
        state.push_timeline(
            TimelineKind::Interrupted,
            format!("Workflow interrupted: {reason}"),
            None,
        );
        tracing::warn!(workflow_id = %id, reason, "workflow interrupted");
        self.store.persist(id, &state).await
    }

    /// Pause a running workflow.
    pub async fn pause(&self, id: &str) -> Result<WorkflowState, StoreError> {
        self.transition(id, WorkflowStatus::Running, WorkflowStatus::Paused, TimelineKind::Paused)
            .await
    }

    /// Resume a paused workflow.
    pub async fn resume(&self, id: &str) -> Result<WorkflowState, StoreError> {
        self.transition(id, WorkflowStatus::Paused, WorkflowStatus::Running, TimelineKind::Resumed)
            .await
    }

    async fn transition(
        &self,
        id: &str,
        from: WorkflowStatus,
        to: WorkflowStatus,
        kind: TimelineKind,
    ) -> Result<WorkflowState, StoreError> {
        let state = self
            .update(id, |state| {
                if state.status != from {
                    return Err(StoreError::InvalidTransition(format!(
                        "workflow {} is {}, expected {from}",
                        state.id, state.status
                    )));
                }
                state.status = to;
                state.push_timeline(kind, format!("Workflow {to}"), None);
                Ok(state.clone())
            })
            .await?;
        tracing::info!(workflow_id = %id, status = %to, "workflow status changed");
        Ok(state)
    }

    /// Interrupt the workflow after an agent failure and list the ways it
    /// can be recovered.
    ///
    /// `alternatives` are candidate replacement agents known to the caller;
    /// agents that previously handed off to the failed agent are added to
    /// them. `skippable` controls whether skipping the step is offered.
    pub async fn recover_from_agent_failure(
        &self,
        id: &str,
        failed_agent: &str,
        error: &str,
        alternatives: &[String],
        skippable: bool,
    ) -> Result<Vec<RecoveryOption>, StoreError> {
        let _guard = self.lock(id).await;
        let mut state = match self.store.recover(id).await? {
            Some(state) => state,
            None => WorkflowState::minimal_interrupted(id),
        };

        let mut candidates: Vec<String> = state
            .agent_dependencies
            .iter()
            .filter(|(_, targets)| targets.contains(failed_agent))
            .map(|(source, _)| source.clone())
            .collect();
        for alternative in alternatives {
            if alternative != failed_agent && !candidates.contains(alternative) {
                candidates.push(alternative.clone());
            }
        }
        candidates.retain(|agent| agent != failed_agent);

        let mut options = vec![RecoveryOption {
            action: RecoveryAction::RetrySameAgent,
            description: format!("Retry the failed operation with {failed_agent}"),
            agent: Some(failed_agent.to_string()),
            checkpoint_id: None,
        }];
        options.extend(candidates.into_iter().map(|agent| RecoveryOption {
            action: RecoveryAction::RerouteAlternative,
            description: format!("Reroute to alternative agent {agent}"),
            agent: Some(agent),
            checkpoint_id: None,
        }));
        if skippable {
            options.push(RecoveryOption {
                action: RecoveryAction::SkipStep,
                description: "Skip the failed step and continue the workflow".to_string(),
                agent: None,
                checkpoint_id: None,
            });
        }
        if let Some(checkpoint) = state.last_checkpoint() {
            options.push(RecoveryOption {
                action: RecoveryAction::RollbackCheckpoint,
                description: format!("Roll back to checkpoint before task {}", checkpoint.task_index),
                agent: None,
                checkpoint_id: Some(checkpoint.id.clone()),
            });
        }

        state.status = WorkflowStatus::Interrupted;
        state.interruption_reason = Some(format!("Agent failure: {failed_agent}"));
        state.error = Some(error.to_string());
        state.recovery_options = options.clone();
        state.push_timeline(
            TimelineKind::Interrupted,
            format!("Agent failure: {failed_agent}: {error}"),
            None,
        );
        self.store.persist(id, &state).await?;

        tracing::warn!(
            workflow_id = %id,
            agent = failed_agent,
            options = options.len(),
            "agent failure recorded"
        );
        Ok(options)
    }

    /// Restore the latest (or the named) checkpoint and set the workflow
    /// running again.
    pub async fn recover_from_checkpoint(
        &self,
        id: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<WorkflowState, StoreError> {
        let state = self
            .update(id, |state| {
                let checkpoint = match checkpoint_id {
                    Some(wanted) => state.checkpoints.iter().find(|c| c.id == wanted),
                    None => state.last_checkpoint(),
                }
                .cloned()
                .ok_or_else(|| {
                    StoreError::NotFound(format!(
                        "checkpoint {} for workflow {}",
                        checkpoint_id.unwrap_or("latest"),
                        state.id
                    ))
                })?;

                let snapshot = checkpoint.state_snapshot;
                state.status = WorkflowStatus::Running;
                state.current_step = snapshot.current_step;
                state.steps_completed = snapshot.steps_completed;
                state.cursor = snapshot.cursor;
                state.recompute_progress();
                state.interruption_reason = None;
                state.recovery_options.clear();
                state.error = None;
                state.metadata.recovered = true;
                state.metadata.recovery_checkpoint = Some(checkpoint.id.clone());
                state.metadata.recovery_time = Some(Utc::now());
                state.push_timeline(
                    TimelineKind::Recovered,
                    format!("Recovered from checkpoint {}", checkpoint.id),
                    Some(checkpoint.task_index),
                );
                Ok(state.clone())
            })
            .await?;

        tracing::info!(
            workflow_id = %id,
            cursor = state.cursor,
            "workflow recovered from checkpoint"
        );
        Ok(state)
    }

    // -----------------------------------------------------------------------
    // Listing and cleanup
    // -----------------------------------------------------------------------

    /// Progress view of one workflow.
    pub async fn progress(&self, id: &str) -> Result<Option<ProgressReport>, StoreError> {
        Ok(self.load(id).await?.as_ref().map(ProgressReport::from))
    }

    /// Workflows that are not in a terminal status.
    pub async fn list_active(&self) -> Result<Vec<WorkflowSummary>, StoreError> {
        let mut active = Vec::new();
        for id in self.store.list_ids().await? {
            if let Some(state) = self.load(&id).await? {
                if state.status.is_active() {
                    active.push(WorkflowSummary::from(&state));
                }
            }
        }
        Ok(active)
    }

    /// Delete the state for `id`.
    ///
    /// Only terminal workflows are removed unless `force` is set. Returns
    /// `false` when nothing was stored.
    pub async fn cleanup(&self, id: &str, force: bool) -> Result<bool, StoreError> {
        let removed = {
            let _guard = self.lock(id).await;
            match self.store.recover(id).await? {
                None => false,
                Some(state) if !force && !state.status.is_terminal() => {
                    return Err(StoreError::InvalidTransition(format!(
                        "workflow {id} is {}; cleanup requires a terminal status",
                        state.status
                    )));
                }
                Some(_) => self.store.delete(id).await?,
            }
        };
        if removed {
            self.locks.remove(id);
            tracing::info!(workflow_id = %id, "workflow state cleaned up");
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

impl<S: StateStore + MetricsStore> StateManager<S> {
    /// Current retention policy.
    pub async fn retention(&self) -> RetentionPolicy {
        self.retention.read().await.clone()
    }

    /// Replace the retention policy. Every limit must be positive.
    pub async fn configure_retention(&self, policy: RetentionPolicy) -> Result<(), StoreError> {
        validate_policy(&policy)?;
        tracing::info!(?policy, "retention policy updated");
        *self.retention.write().await = policy;
        Ok(())
    }

    /// Append `entry` to the workflow's history and apply retention.
    pub async fn store_metrics(&self, id: &str, entry: PerformanceEntry) -> Result<(), StoreError> {
        let policy = self.retention().await;
        let now = Utc::now();
        {
            let _guard = self.lock(id).await;
            let mut history = self.store.load_metrics(id).await?;
            history.push(entry);
            let outcome = apply_retention(&mut history, &policy, now);
            self.store.save_metrics(id, &history).await?;
            tracing::debug!(
                workflow_id = %id,
                entries = history.len(),
                removed = outcome.removed,
                compressed = outcome.compressed,
                "metrics stored"
            );
        }

        self.maybe_auto_cleanup(&policy, now).await?;

        let status = self.storage_status().await?;
        if status.over_limit {
            tracing::warn!(
                used_bytes = status.used_bytes,
                limit_bytes = status.limit_bytes,
                "metrics storage over limit"
            );
        }
        Ok(())
    }

    async fn maybe_auto_cleanup(
        &self,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut last = self.last_cleanup.lock().await;
        if now - *last < Duration::hours(policy.auto_cleanup_interval_hours as i64) {
            return Ok(());
        }
        *last = now;
        drop(last);

        let mut removed = 0;
        let mut compressed = 0;
        for id in self.store.metrics_ids().await? {
            let _guard = self.lock(&id).await;
            let mut history = self.store.load_metrics(&id).await?;
            let outcome = apply_retention(&mut history, policy, now);
            if outcome.removed > 0 || outcome.compressed > 0 {
                self.store.save_metrics(&id, &history).await?;
            }
            removed += outcome.removed;
            compressed += outcome.compressed;
        }
        tracing::info!(removed, compressed, "automatic metrics cleanup finished");
        Ok(())
    }

    /// History for `id`, oldest first, optionally limited to the newest
    /// `limit` entries.
    pub async fn metrics_history(
        &self,
        id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<PerformanceEntry>, StoreError> {
        let mut history = self.store.load_metrics(id).await?;
        if let Some(limit) = limit {
            let skip = history.len().saturating_sub(limit);
            history.drain(..skip);
        }
        Ok(history)
    }

    /// Aggregate the histories of `ids` (all workflows when `None`).
    pub async fn aggregate_metrics(
        &self,
        ids: Option<&[String]>,
        time_range_hours: Option<u32>,
    ) -> Result<AggregatedMetrics, StoreError> {
        let ids = match ids {
            Some(ids) => ids.to_vec(),
            None => self.store.metrics_ids().await?,
        };
        let mut histories = Vec::with_capacity(ids.len());
        for id in ids {
            let history = self.store.load_metrics(&id).await?;
            histories.push((id, history));
        }
        Ok(aggregate(&histories, time_range_hours, Utc::now()))
    }

    /// Metrics storage footprint against the configured limit.
    pub async fn storage_status(&self) -> Result<StorageStatus, StoreError> {
        let limit_bytes = self.retention().await.storage_limit_mb * 1024 * 1024;
        let ids = self.store.metrics_ids().await?;
        let mut total_entries = 0;
        for id in &ids {
            total_entries += self.store.load_metrics(id).await?.len();
        }
        let used_bytes = self.store.metrics_bytes().await?;
        let usage = if limit_bytes == 0 {
            0.0
        } else {
            used_bytes as f64 / limit_bytes as f64 * 100.0
        };
        Ok(StorageStatus {
            metrics_files: ids.len(),
            total_entries,
            used_bytes,
            limit_bytes,
            usage_percentage: (usage * 100.0).round() / 100.0,
            over_limit: used_bytes > limit_bytes,
        })
    }

    /// Drop metrics entries older than `max_age_days` across all workflows.
    ///
    /// Returns the number of entries removed.
    pub async fn cleanup_old_metrics(&self, max_age_days: u32) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut removed = 0;
        for id in self.store.metrics_ids().await? {
            let _guard = self.lock(&id).await;
            let mut history = self.store.load_metrics(&id).await?;
            let pruned = prune_older_than(&mut history, max_age_days, now);
            if pruned > 0 {
                self.store.save_metrics(&id, &history).await?;
                removed += pruned;
            }
        }
        tracing::info!(removed, max_age_days, "old metrics removed");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryStateStore;
    use crewflow_types::state::{Checkpoint, TimelineKind};
    use crewflow_types::task::TaskSpec;
    use serde_json::json;

    fn manager() -> Arc<StateManager<InMemoryStateStore>> {
        Arc::new(StateManager::new(InMemoryStateStore::new()))
    }

    async fn seed(manager: &StateManager<InMemoryStateStore>, id: &str, status: WorkflowStatus) {
        let mut state = WorkflowState::new(id, 3);
        state.status = status;
        manager.persist(id, &state).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_updates_are_serialized() {
        let manager = manager();
        let mut state = WorkflowState::new("wf", 1);
        state.context.insert("counter".into(), json!(0));
        manager.persist("wf", &state).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager
                    .update("wf", |state| {
                        let current = state.context["counter"].as_u64().unwrap_or(0);
                        state.context.insert("counter".into(), json!(current + 1));
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let state = manager.load("wf").await.unwrap().unwrap();
        assert_eq!(state.context["counter"], json!(5));
    }

    #[tokio::test]
    async fn update_of_missing_workflow_is_not_found() {
        let manager = manager();
        let result = manager.update("nope", |_| Ok(())).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn missing_workflow_fails_validation_and_integrity() {
        let manager = manager();
        let validation = manager.validate_handoff("nope", "a", "b").await.unwrap();
        assert!(!validation.is_valid);
        assert_eq!(validation.errors, vec![STATE_NOT_FOUND.to_string()]);

        let report = manager.integrity_check("nope").await.unwrap();
        assert!(!report.is_valid);
    }

    #[tokio::test]
    async fn tracked_cycle_is_rejected() {
        let manager = manager();
        seed(&manager, "wf", WorkflowStatus::Running).await;
        manager.track_handoff("wf", "A", "B", Value::Null).await.unwrap();
        manager.track_handoff("wf", "B", "C", Value::Null).await.unwrap();

        let validation = manager.validate_handoff("wf", "C", "A").await.unwrap();
        assert!(!validation.is_valid);
        assert!(validation.errors[0].contains("Circular dependency detected"));
    }

    #[tokio::test]
    async fn pause_and_resume_enforce_lifecycle() {
        let manager = manager();
        seed(&manager, "wf", WorkflowStatus::Running).await;

        let paused = manager.pause("wf").await.unwrap();
        assert_eq!(paused.status, WorkflowStatus::Paused);
        assert!(matches!(
            manager.pause("wf").await,
            Err(StoreError::InvalidTransition(_))
        ));

        let resumed = manager.resume("wf").await.unwrap();
        assert_eq!(resumed.status, WorkflowStatus::Running);
        let kinds: Vec<_> = resumed.execution_timeline.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![TimelineKind::Paused, TimelineKind::Resumed]);
        assert!(matches!(
            manager.resume("wf").await,
            Err(StoreError::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn mark_interrupted_creates_missing_state() {
        let manager = manager();
        let state = manager.mark_interrupted("ghost", "operator stop").await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Interrupted);
        assert_eq!(state.interruption_reason.as_deref(), Some("operator stop"));
        assert!(manager.load("ghost").await.unwrap().is_some());
    }

    fn checkpoint(id: &str, state: &WorkflowState, task_index: usize) -> Checkpoint {
        Checkpoint {
            id: id.to_string(),
            timestamp: Utc::now(),
            task_index,
            task_spec: TaskSpec::new("work"),
            state_snapshot: state.snapshot(),
        }
    }

    #[tokio::test]
    async fn agent_failure_lists_recovery_options() {
        let manager = manager();
        let mut state = WorkflowState::new("wf", 3);
        state.status = WorkflowStatus::Running;
        state.checkpoints.push(checkpoint("cp-1", &state, 0));
        manager.persist("wf", &state).await.unwrap();
        manager.track_handoff("wf", "architect", "dev-agent", Value::Null).await.unwrap();

        let options = manager
            .recover_from_agent_failure("wf", "dev-agent", "tool crashed", &["qa-agent".into()], true)
            .await
            .unwrap();
        let actions: Vec<_> = options.iter().map(|o| o.action).collect();
        assert_eq!(
            actions,
            vec![
                RecoveryAction::RetrySameAgent,
                RecoveryAction::RerouteAlternative,
                RecoveryAction::RerouteAlternative,
                RecoveryAction::SkipStep,
                RecoveryAction::RollbackCheckpoint,
            ]
        );
        assert_eq!(options[1].agent.as_deref(), Some("architect"));
        assert_eq!(options[4].checkpoint_id.as_deref(), Some("cp-1"));

        let stored = manager.load("wf").await.unwrap().unwrap();
        assert_eq!(stored.status, WorkflowStatus::Interrupted);
        assert_eq!(stored.recovery_options.len(), 5);
    }

    #[tokio::test]
    async fn checkpoint_recovery_restores_snapshot() {
        let manager = manager();
        let mut state = WorkflowState::new("wf", 3);
        state.status = WorkflowStatus::Running;
        state.mark_step_completed(0);
        state.recompute_progress();
        state.cursor = 1;
        state.checkpoints.push(checkpoint("cp-1", &state, 1));
        state.mark_step_completed(1);
        state.status = WorkflowStatus::Interrupted;
        state.interruption_reason = Some("boom".into());
        manager.persist("wf", &state).await.unwrap();

        let recovered = manager.recover_from_checkpoint("wf", None).await.unwrap();
        assert_eq!(recovered.status, WorkflowStatus::Running);
        assert_eq!(recovered.steps_completed, vec![0]);
        assert_eq!(recovered.cursor, 1);
        assert!(recovered.metadata.recovered);
        assert_eq!(recovered.metadata.recovery_checkpoint.as_deref(), Some("cp-1"));
        assert!(recovered.metadata.recovery_time.is_some());
        assert!(recovered.interruption_reason.is_none());

        assert!(matches!(
            manager.recover_from_checkpoint("wf", Some("missing")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn cleanup_requires_terminal_status_unless_forced() {
        let manager = manager();
        seed(&manager, "running", WorkflowStatus::Running).await;
        seed(&manager, "done", WorkflowStatus::Completed).await;

        assert!(matches!(
            manager.cleanup("running", false).await,
            Err(StoreError::InvalidTransition(_))
        ));
        assert!(manager.cleanup("done", false).await.unwrap());
        assert!(manager.cleanup("running", true).await.unwrap());
        assert!(!manager.cleanup("done", false).await.unwrap());
    }

    #[tokio::test]
    async fn list_active_excludes_terminal_workflows() {
        let manager = manager();
        seed(&manager, "a", WorkflowStatus::Running).await;
        seed(&manager, "b", WorkflowStatus::Completed).await;
        seed(&manager, "c", WorkflowStatus::Interrupted).await;

        let ids: Vec<_> = manager
            .list_active()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
    }

    fn entry(hours_ago: i64, duration: f64) -> PerformanceEntry {
        PerformanceEntry {
            timestamp: Utc::now() - Duration::hours(hours_ago),
            duration,
            success_rate: 1.0,
            efficiency_score: 90.0,
            bottleneck_count: Some(1),
            compressed: false,
        }
    }

    #[tokio::test]
    async fn metrics_are_stored_and_aggregated() {
        let manager = manager();
        manager.store_metrics("a", entry(1, 2.0)).await.unwrap();
        manager.store_metrics("a", entry(0, 4.0)).await.unwrap();
        manager.store_metrics("b", entry(48, 6.0)).await.unwrap();

        assert_eq!(manager.metrics_history("a", Some(1)).await.unwrap()[0].duration, 4.0);

        match manager.aggregate_metrics(None, Some(24)).await.unwrap() {
            AggregatedMetrics::Summary {
                workflow_count,
                avg_duration,
                ..
            } => {
                assert_eq!(workflow_count, 1);
                assert_eq!(avg_duration, 3.0);
            }
            AggregatedMetrics::NoData => panic!("expected data"),
        }
        let only_missing = ["zzz".to_string()];
        assert_eq!(
            manager.aggregate_metrics(Some(&only_missing), None).await.unwrap(),
            AggregatedMetrics::NoData
        );

        let status = manager.storage_status().await.unwrap();
        assert_eq!(status.metrics_files, 2);
        assert_eq!(status.total_entries, 3);
        assert!(!status.over_limit);
    }

    #[tokio::test]
    async fn retention_policy_is_validated_and_applied() {
        let manager = manager();
        let bad = RetentionPolicy {
            storage_limit_mb: 0,
            ..Default::default()
        };
        assert!(manager.configure_retention(bad).await.is_err());

        manager
            .configure_retention(RetentionPolicy {
                max_entries_per_workflow: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        for duration in [1.0, 2.0, 3.0] {
            manager.store_metrics("a", entry(0, duration)).await.unwrap();
        }
        let history = manager.metrics_history("a", None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].duration, 2.0);
    }

    #[tokio::test]
    async fn old_metrics_are_pruned() {
        let manager = manager();
        manager.store_metrics("a", entry(24 * 10, 1.0)).await.unwrap();
        manager.store_metrics("a", entry(0, 2.0)).await.unwrap();

        assert_eq!(manager.cleanup_old_metrics(5).await.unwrap(), 1);
        assert_eq!(manager.metrics_history("a", None).await.unwrap().len(), 1);
    }
}
