//! Workflow template and task types.
//!
//! A `WorkflowTemplate` is the parsed, typed form of a workflow file: an
//! ordered list of `TaskSpec`s with optional skip conditions, branching,
//! retry policy and artefact output. Conditions and branching are tagged
//! enums so the engine never does runtime key lookups on untyped maps.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a workflow template.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// YAML/JSON parse failure.
    #[error("template parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("invalid template: {0}")]
    Invalid(String),
}

/// A workflow template: the ordered task list a workflow run executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Human-readable template name.
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Tasks in declaration order. Task indices are positions in this list.
    pub tasks: Vec<TaskSpec>,
    /// Initial execution context, visible to conditions and content templates.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
}

impl WorkflowTemplate {
    /// Parse and validate a template from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, TemplateError> {
        let template: WorkflowTemplate =
            serde_yaml_ng::from_str(yaml).map_err(|e| TemplateError::Parse(e.to_string()))?;
        template.validate()?;
        Ok(template)
    }

    /// Parse and validate a template from JSON.
    pub fn from_json(json: &str) -> Result<Self, TemplateError> {
        let template: WorkflowTemplate =
            serde_json::from_str(json).map_err(|e| TemplateError::Parse(e.to_string()))?;
        template.validate()?;
        Ok(template)
    }

    /// Validate structural constraints.
    ///
    /// Checks:
    /// - At least one task exists
    /// - Every retry policy has a finite, non-negative backoff
    /// - Explicit branch targets point strictly forward and stay within `0..=len`
    /// - `previous_result` conditions only reference earlier tasks
    ///
    /// Forward-only targets guarantee every run terminates.
    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.tasks.is_empty() {
            return Err(TemplateError::Invalid(
                "template must have at least one task".to_string(),
            ));
        }

        let total = self.tasks.len();
        for (index, task) in self.tasks.iter().enumerate() {
            if !task.retry.backoff_seconds.is_finite() || task.retry.backoff_seconds < 0.0 {
                return Err(TemplateError::Invalid(format!(
                    "task {index}: backoff_seconds must be a non-negative number"
                )));
            }

            if let Some(TaskCondition::PreviousResult { task_index, .. }) = &task.condition {
                if *task_index >= index {
                    return Err(TemplateError::Invalid(format!(
                        "task {index}: previous_result condition references task {task_index}, which has not run yet"
                    )));
                }
            }

            if let Some(branching) = &task.branching {
                for target in branching.targets() {
                    if let BranchTarget::Index(to) = target {
                        if *to <= index || *to > total {
                            return Err(TemplateError::Invalid(format!(
                                "task {index}: branch target {to} must point forward and be at most {total}"
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Task specification
// ---------------------------------------------------------------------------

/// One task of a workflow template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-text description; also the source for requirement extraction.
    pub description: String,
    /// Explicit agent. When absent the engine assigns one dynamically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Skip condition. A matching condition skips the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<TaskCondition>,
    /// Branching rule applied once the task finishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branching: Option<Branching>,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Artefact produced after a successful run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    /// Workflow phase hint used by context scoring (e.g. "implementation").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Critical tasks escalate any failure to critical severity.
    #[serde(default)]
    pub critical: bool,
    /// Optional tasks may be skipped by recovery when they fail.
    #[serde(default)]
    pub optional: bool,
}

impl TaskSpec {
    /// Create a task with only a description and default policies.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    /// Display label: the explicit name or the task index.
    pub fn label(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| format!("task_{index}"))
    }
}

/// Retry policy for a single task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt (default 3). Retry `k` waits
    /// `backoff_seconds * 2^(k-1)` before running. `0` runs the task once.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff in seconds, doubled after every failed attempt (default 1.0).
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: f64,
    /// Per-attempt timeout. There is no workflow-wide deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_seconds() -> f64 {
    1.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_seconds: default_backoff_seconds(),
            timeout_seconds: None,
        }
    }
}

/// Artefact output declaration for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Artefact kind, e.g. "prd", "architecture", "report".
    pub artefact_type: String,
    /// Content with `{placeholder}` slots; a default body is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_template: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

/// Complexity hint for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Priority hint for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Skip condition attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskCondition {
    /// Compare a context value against a literal.
    ContextCheck {
        key: String,
        operator: ConditionOperator,
        value: Value,
    },
    /// Compare the recorded status of an earlier task.
    PreviousResult { task_index: usize, status: TaskStatus },
    /// Matches while the local hour lies within `start_hour..=end_hour`.
    TimeBased { start_hour: i32, end_hour: i32 },
    /// Matches when the named dependency is present in context or prior results.
    DependencyCheck { dependency: String },
}

/// Comparison operator for context checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    /// List membership, substring, or object key presence.
    Contains,
    GreaterThan,
    LessThan,
}

// ---------------------------------------------------------------------------
// Branching
// ---------------------------------------------------------------------------

/// Branching rule resolved after a task finishes.
///
/// Presence of branching suppresses the default sequential successor when a
/// rule applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Branching {
    /// Jump to `success_target` when the task succeeds.
    OnSuccess { success_target: BranchTarget },
    /// Jump to `failure_target` when the task fails; the workflow keeps running.
    OnFailure { failure_target: BranchTarget },
    /// First matching branch wins, otherwise `default`, otherwise the workflow ends.
    Conditional {
        conditions: Vec<ConditionalBranch>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<BranchTarget>,
    },
}

impl Branching {
    /// Every target this rule can resolve to.
    pub fn targets(&self) -> Vec<&BranchTarget> {
        match self {
            Branching::OnSuccess { success_target } => vec![success_target],
            Branching::OnFailure { failure_target } => vec![failure_target],
            Branching::Conditional {
                conditions,
                default,
            } => conditions
                .iter()
                .map(|b| &b.target)
                .chain(default.iter())
                .collect(),
        }
    }
}

/// One entry of a conditional branching list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalBranch {
    pub condition: BranchCondition,
    pub target: BranchTarget,
}

/// Predicate evaluated against a finished task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BranchCondition {
    StatusCheck { expected_status: TaskStatus },
    /// Compares the task output's `result` field (or the whole output).
    ResultCheck { expected_result: Value },
    ContextCheck {
        key: String,
        operator: ConditionOperator,
        value: Value,
    },
}

/// Where execution continues after a branch.
///
/// Serialized as an integer index or one of the literals `next`, `end`,
/// `task_N`. `task_N` is normalised to `Index(N)` at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBranchTarget", into = "RawBranchTarget")]
pub enum BranchTarget {
    Index(usize),
    Next,
    End,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawBranchTarget {
    Index(usize),
    Label(String),
}

impl TryFrom<RawBranchTarget> for BranchTarget {
    type Error = String;

    fn try_from(raw: RawBranchTarget) -> Result<Self, Self::Error> {
        match raw {
            RawBranchTarget::Index(i) => Ok(BranchTarget::Index(i)),
            RawBranchTarget::Label(label) => label.parse(),
        }
    }
}

impl From<BranchTarget> for RawBranchTarget {
    fn from(target: BranchTarget) -> Self {
        match target {
            BranchTarget::Index(i) => RawBranchTarget::Index(i),
            BranchTarget::Next => RawBranchTarget::Label("next".to_string()),
            BranchTarget::End => RawBranchTarget::Label("end".to_string()),
        }
    }
}

impl FromStr for BranchTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "next" => Ok(BranchTarget::Next),
            "end" => Ok(BranchTarget::End),
            other => other
                .strip_prefix("task_")
                .and_then(|n| n.parse::<usize>().ok())
                .or_else(|| other.parse::<usize>().ok())
                .map(BranchTarget::Index)
                .ok_or_else(|| format!("invalid branch target: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Task results
// ---------------------------------------------------------------------------

/// Outcome status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Success,
    Failed,
    Skipped,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Success => write!(f, "success"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome of the post-success artefact hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtefactOutcome {
    Generated,
    Failed,
    Skipped,
}

/// One recovery episode recorded on a task result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecoveryAttempt {
    /// Strategy that ran: `retry` for in-engine retries, otherwise the
    /// recovery framework's strategy name.
    pub strategy: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Recorded result of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub status: TaskStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Executor invocations made by the engine's own retry loop.
    #[serde(default)]
    pub attempts: u32,
    /// True when the task succeeded only after at least one failure.
    #[serde(default)]
    pub recovered: bool,
    #[serde(default)]
    pub recovery_attempts: Vec<TaskRecoveryAttempt>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artefacts_generated: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artefact_status: Option<ArtefactOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    /// A fresh result in `pending` status.
    pub fn pending(task_index: usize, agent: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            task_index,
            agent,
            status: TaskStatus::Pending,
            timestamp: now,
            started_at: Some(now),
            finished_at: None,
            attempts: 0,
            recovered: false,
            recovery_attempts: Vec::new(),
            artefacts_generated: Vec::new(),
            artefact_status: None,
            output: None,
            error: None,
        }
    }

    /// A result recording that the skip condition matched.
    pub fn skipped(task_index: usize) -> Self {
        let mut result = Self::pending(task_index, None);
        result.status = TaskStatus::Skipped;
        result.finished_at = Some(result.timestamp);
        result
    }

    /// Wall-clock duration in seconds, when both ends are known.
    pub fn duration_secs(&self) -> Option<f64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}
