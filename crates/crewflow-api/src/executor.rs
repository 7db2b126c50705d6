//! Task executors available from the command line.
//!
//! `Command` runs an external program once per attempt. The program gets the
//! task description on stdin and the request fields as `CREWFLOW_*`
//! environment variables. Stdout becomes the task output (parsed as JSON when
//! possible); a non-zero exit fails the attempt with stderr as the message.

use std::process::Stdio;

use crewflow_core::engine::{TaskExecutor, TaskRequest};
use crewflow_types::error::TaskError;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub enum CliExecutor {
    /// Complete every task without doing any work.
    DryRun,
    /// Run `sh -c <command>` for each attempt.
    Command(String),
}

impl CliExecutor {
    pub fn from_arg(command: Option<String>) -> Self {
        match command {
            Some(command) if !command.trim().is_empty() => CliExecutor::Command(command),
            _ => CliExecutor::DryRun,
        }
    }
}

impl TaskExecutor for CliExecutor {
    async fn execute(&self, request: TaskRequest) -> Result<Value, TaskError> {
        match self {
            CliExecutor::DryRun => Ok(json!({
                "result": "completed",
                "agent": request.agent,
                "message": format!("Dry run of task {}: {}", request.task_index, request.task.description),
            })),
            CliExecutor::Command(command) => run_command(command, &request).await,
        }
    }
}

async fn run_command(command: &str, request: &TaskRequest) -> Result<Value, TaskError> {
    let context = Value::Object(request.context.clone()).to_string();
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("CREWFLOW_WORKFLOW_ID", &request.workflow_id)
        .env("CREWFLOW_TASK_INDEX", request.task_index.to_string())
        .env("CREWFLOW_TASK_NAME", request.task.label(request.task_index))
        .env("CREWFLOW_AGENT", &request.agent)
        .env("CREWFLOW_ATTEMPT", request.attempt.to_string())
        .env("CREWFLOW_CONTEXT", context)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TaskError::with_kind("ProcessError", format!("failed to spawn executor: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        // A program that ignores stdin may close it early.
        let _ = stdin.write_all(request.task.description.as_bytes()).await;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| TaskError::with_kind("ProcessError", format!("executor failed: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("executor exited with {}", output.status)
        } else {
            stderr
        };
        tracing::debug!(
            workflow_id = %request.workflow_id,
            task_index = request.task_index,
            status = %output.status,
            "executor command failed"
        );
        return Err(TaskError::new(message));
    }

    Ok(serde_json::from_str(&stdout).unwrap_or(Value::String(stdout)))
}
