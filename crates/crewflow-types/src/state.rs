//! Persisted workflow state.
//!
//! `WorkflowState` is the durable document the engine mutates after every
//! step. It is serialized as one JSON document per workflow id. Lists in the
//! document (checkpoints, handoffs, timeline) are append-only.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::task::{TaskResult, TaskSpec};

/// Document schema version stamped into metadata on every write.
pub const STATE_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow.
///
/// `Completed` and `Failed` are terminal. `Interrupted` is reachable from any
/// failure and can be resumed through explicit checkpoint recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Initialized,
    Running,
    Paused,
    Completed,
    Failed,
    Interrupted,
}

impl WorkflowStatus {
    /// Every recognized status value, in lifecycle order.
    pub const ALL: [WorkflowStatus; 6] = [
        WorkflowStatus::Initialized,
        WorkflowStatus::Running,
        WorkflowStatus::Paused,
        WorkflowStatus::Completed,
        WorkflowStatus::Failed,
        WorkflowStatus::Interrupted,
    ];

    /// Whether no further execution can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    /// Whether the workflow should appear in active listings.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Initialized => "initialized",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkflowStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("invalid workflow status: '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Progress & metadata
// ---------------------------------------------------------------------------

/// Completion progress of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    /// `completed / total * 100`, clamped to 100 and rounded to 2 decimals.
    pub percentage: f64,
}

impl Progress {
    pub fn compute(completed: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            0.0
        } else {
            let raw = (completed as f64 / total as f64 * 100.0).min(100.0);
            (raw * 100.0).round() / 100.0
        };
        Self {
            completed,
            total,
            percentage,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.percentage >= 100.0
    }
}

/// Bookkeeping metadata maintained by the state store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateMetadata {
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: String,
    /// Set when the state was synthesized or restored by a recovery path.
    #[serde(default)]
    pub recovered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_checkpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_time: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Timeline, checkpoints, handoffs
// ---------------------------------------------------------------------------

/// Kind of a timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    Started,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskSkipped,
    Branch,
    Handoff,
    Checkpoint,
    Paused,
    Resumed,
    Interrupted,
    Recovered,
    Completed,
    Failed,
}

/// One entry of the execution timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: TimelineKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_index: Option<usize>,
}

/// Shallow snapshot stored inside a checkpoint.
///
/// Only scalar progress fields are captured so a checkpoint never embeds the
/// rest of the state document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub status: WorkflowStatus,
    pub current_step: String,
    pub steps_completed: Vec<usize>,
    pub progress: Progress,
    /// Index of the task that was about to run.
    #[serde(default)]
    pub cursor: usize,
}

/// Snapshot of progress taken before a task attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub task_index: usize,
    pub task_spec: TaskSpec,
    pub state_snapshot: StateSnapshot,
}

/// Status of a recorded handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    #[default]
    Completed,
    Failed,
}

/// Transfer of execution responsibility between two agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub from_agent: String,
    pub to_agent: String,
    pub timestamp: DateTime<Utc>,
    /// Position in the handoff log; strictly increasing per workflow.
    pub sequence_id: u64,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub status: HandoffStatus,
    /// Error of the task that followed the handoff, if it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Operator-facing action suggested after an unrecovered failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    RetrySameAgent,
    RerouteAlternative,
    SkipStep,
    RollbackCheckpoint,
}

/// A recovery option listed on an interrupted workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryOption {
    pub action: RecoveryAction,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
}

// ---------------------------------------------------------------------------
// WorkflowState
// ---------------------------------------------------------------------------

/// Durable state of one workflow run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowState {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default)]
    pub current_step: String,
    /// Completed task indices, ascending and unique.
    #[serde(default)]
    pub steps_completed: Vec<usize>,
    #[serde(default)]
    pub total_steps: usize,
    /// Index of the next task to run.
    #[serde(default)]
    pub cursor: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default)]
    pub agent_handoffs: Vec<HandoffRecord>,
    /// Adjacency map: agent -> agents it has handed off to.
    #[serde(default)]
    pub agent_dependencies: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub execution_timeline: Vec<TimelineEvent>,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default)]
    pub task_results: BTreeMap<usize, TaskResult>,
    /// Execution context visible to conditions and content templates.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
    /// Monotonic counter merged as `max(incoming, existing + 1)` on write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrent_access_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interruption_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery_options: Vec<RecoveryOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: StateMetadata,
}

impl WorkflowState {
    /// Fresh state for a workflow of `total_steps` tasks.
    pub fn new(id: impl Into<String>, total_steps: usize) -> Self {
        let id = id.into();
        Self {
            metadata: StateMetadata {
                workflow_id: id.clone(),
                ..Default::default()
            },
            id,
            current_step: "initialized".to_string(),
            total_steps,
            progress: Progress::compute(0, total_steps),
            ..Default::default()
        }
    }

    /// Minimal placeholder returned when a stored document cannot be read.
    pub fn minimal_interrupted(id: impl Into<String>) -> Self {
        let id = id.into();
        let now = Utc::now();
        Self {
            status: WorkflowStatus::Interrupted,
            current_step: "recovery".to_string(),
            metadata: StateMetadata {
                workflow_id: id.clone(),
                created_at: Some(now),
                updated_at: Some(now),
                version: STATE_VERSION.to_string(),
                recovered: true,
                ..Default::default()
            },
            id,
            ..Default::default()
        }
    }

    /// Insert `index` into `steps_completed`, keeping it sorted and unique.
    pub fn mark_step_completed(&mut self, index: usize) {
        if let Err(pos) = self.steps_completed.binary_search(&index) {
            self.steps_completed.insert(pos, index);
        }
    }

    pub fn recompute_progress(&mut self) {
        self.progress = Progress::compute(self.steps_completed.len(), self.total_steps);
    }

    pub fn push_timeline(
        &mut self,
        kind: TimelineKind,
        description: impl Into<String>,
        task_index: Option<usize>,
    ) {
        self.execution_timeline.push(TimelineEvent {
            timestamp: Utc::now(),
            kind,
            description: description.into(),
            task_index,
        });
    }

    /// Shallow snapshot of the progress fields.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            status: self.status,
            current_step: self.current_step.clone(),
            steps_completed: self.steps_completed.clone(),
            progress: self.progress,
            cursor: self.cursor,
        }
    }

    pub fn last_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }

    /// Store `result`, replacing any earlier result for the same task.
    pub fn record_result(&mut self, result: TaskResult) {
        self.task_results.insert(result.task_index, result);
    }

    /// Agent of the most recently executed (non-skipped) task.
    pub fn last_agent(&self) -> Option<&str> {
        self.task_results
            .values()
            .filter(|r| r.agent.is_some())
            .max_by_key(|r| r.timestamp)
            .and_then(|r| r.agent.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Validation reports
// ---------------------------------------------------------------------------

/// Result of validating a prospective agent handoff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandoffValidation {
    pub is_valid: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Result of a non-fatal integrity audit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// False only when the document is missing or structurally unusable.
    pub is_valid: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// Compact listing entry for active workflows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: String,
    pub status: WorkflowStatus,
    pub current_step: String,
    pub progress: Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Progress monitoring view of one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    pub status: WorkflowStatus,
    pub current_step: String,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    pub handoff_count: usize,
    pub timeline_entries: usize,
    /// The three most recent timeline entries, oldest first.
    #[serde(default)]
    pub recent_activity: Vec<TimelineEvent>,
}

impl From<&WorkflowState> for ProgressReport {
    fn from(state: &WorkflowState) -> Self {
        let skip = state.execution_timeline.len().saturating_sub(3);
        Self {
            status: state.status,
            current_step: state.current_step.clone(),
            steps_completed: state.steps_completed.len(),
            total_steps: state.total_steps,
            percentage: state.progress.percentage,
            last_updated: state.metadata.updated_at,
            handoff_count: state.agent_handoffs.len(),
            timeline_entries: state.execution_timeline.len(),
            recent_activity: state.execution_timeline[skip..].to_vec(),
        }
    }
}

impl From<&WorkflowState> for WorkflowSummary {
    fn from(state: &WorkflowState) -> Self {
        Self {
            id: state.id.clone(),
            status: state.status,
            current_step: state.current_step.clone(),
            progress: state.progress,
            updated_at: state.metadata.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_clamped_and_rounded() {
        assert_eq!(Progress::compute(1, 3).percentage, 33.33);
        assert_eq!(Progress::compute(5, 3).percentage, 100.0);
        assert_eq!(Progress::compute(0, 0).percentage, 0.0);
        assert!(Progress::compute(3, 3).is_complete());
    }

    #[test]
    fn status_parses_and_displays() {
        for status in WorkflowStatus::ALL {
            assert_eq!(status.to_string().parse::<WorkflowStatus>().unwrap(), status);
        }
        assert!("exploded".parse::<WorkflowStatus>().is_err());
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Interrupted.is_active());
    }

    #[test]
    fn steps_completed_stays_sorted_and_unique() {
        let mut state = WorkflowState::new("wf", 5);
        state.mark_step_completed(3);
        state.mark_step_completed(0);
        state.mark_step_completed(3);
        state.mark_step_completed(1);
        assert_eq!(state.steps_completed, vec![0, 1, 3]);
        state.recompute_progress();
        assert_eq!(state.progress.completed, 3);
        assert_eq!(state.progress.percentage, 60.0);
    }

    #[test]
    fn minimal_state_is_interrupted_and_recovered() {
        let state = WorkflowState::minimal_interrupted("broken");
        assert_eq!(state.status, WorkflowStatus::Interrupted);
        assert_eq!(state.current_step, "recovery");
        assert!(state.metadata.recovered);
        assert!(state.steps_completed.is_empty());
        assert!(state.agent_handoffs.is_empty());
        assert_eq!(state.progress, Progress::default());
    }

    #[test]
    fn partial_document_deserializes_with_defaults() {
        let state: WorkflowState = serde_json::from_str(
            r#"{"status": "running", "current_step": "task_1", "steps_completed": [0]}"#,
        )
        .unwrap();
        assert_eq!(state.status, WorkflowStatus::Running);
        assert!(state.checkpoints.is_empty());
        assert!(state.concurrent_access_count.is_none());
    }
}
