//! Workflow engine: runs a template's tasks as a checkpointed state machine.
//!
//! # Execution flow
//!
//! 1. Validate the template and persist the initial state.
//! 2. At each task boundary re-read the state; a paused or interrupted
//!    workflow stops here.
//! 3. Evaluate the skip condition, resolve the agent and validate the
//!    handoff from the previous agent.
//! 4. Checkpoint, then run the task with retry and backoff.
//! 5. On exhausted retries hand the failure to the recovery framework.
//! 6. Record the result, persist, and resolve the branching target.

pub mod artefact;
pub mod branching;
pub mod condition;
pub mod executor;
pub mod retry;

use std::future::Future;

use crewflow_types::error::TaskError;
use crewflow_types::state::{WorkflowState, WorkflowStatus};
use crewflow_types::task::{TaskSpec, TemplateError};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::state::StoreError;

pub use artefact::ArtefactGenerator;
pub use executor::WorkflowEngine;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by engine operations.
///
/// Task failures are not errors: they end up in the workflow state as an
/// `interrupted` status with recovery options.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("workflow already exists: {0}")]
    AlreadyExists(String),

    #[error("workflow not found: {0}")]
    NotFound(String),

    /// The workflow's status does not allow the operation.
    #[error("workflow {id} is {status}: {reason}")]
    InvalidState {
        id: String,
        status: WorkflowStatus,
        reason: String,
    },

    #[error("workflow {id} has {expected} steps but the template has {actual} tasks")]
    TemplateMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },
}

// ---------------------------------------------------------------------------
// Task execution port
// ---------------------------------------------------------------------------

/// One task attempt handed to the executor.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub workflow_id: String,
    pub task_index: usize,
    pub task: TaskSpec,
    pub agent: String,
    /// 1-based attempt number within the engine's retry loop; recovery
    /// re-runs continue counting.
    pub attempt: u32,
    pub context: Map<String, Value>,
}

/// Runs a single task attempt as the given agent.
///
/// Uses RPITIT (return-position `impl Trait` in traits) for async methods,
/// consistent with the store traits.
pub trait TaskExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        request: TaskRequest,
    ) -> impl Future<Output = Result<Value, TaskError>> + Send;
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Result of one `execute`/`resume` call.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    /// Task indices that ran during this call, in order.
    pub executed: Vec<usize>,
    pub steps_completed: Vec<usize>,
    pub error: Option<String>,
    pub state: WorkflowState,
}

impl ExecutionReport {
    fn from_state(state: WorkflowState, executed: Vec<usize>) -> Self {
        Self {
            workflow_id: state.id.clone(),
            status: state.status,
            executed,
            steps_completed: state.steps_completed.clone(),
            error: state.error.clone(),
            state,
        }
    }
}
