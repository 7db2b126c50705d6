//! Resolution of the next task index after a task finishes.

use crewflow_types::task::{BranchCondition, BranchTarget, Branching, TaskSpec, TaskStatus};
use serde_json::{Map, Value};

use super::condition::compare;

/// Where execution goes after a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Run the task at this index (at or past the end completes the workflow).
    Task(usize),
    /// Terminate the workflow as completed.
    End,
}

fn resolve(target: BranchTarget, index: usize) -> NextStep {
    match target {
        BranchTarget::Index(to) => NextStep::Task(to),
        BranchTarget::Next => NextStep::Task(index + 1),
        BranchTarget::End => NextStep::End,
    }
}

fn branch_matches(
    condition: &BranchCondition,
    status: TaskStatus,
    output: Option<&Value>,
    context: &Map<String, Value>,
) -> bool {
    match condition {
        BranchCondition::StatusCheck { expected_status } => status == *expected_status,
        BranchCondition::ResultCheck { expected_result } => output
            .map(|o| o.get("result").unwrap_or(o))
            .is_some_and(|actual| actual == expected_result),
        BranchCondition::ContextCheck {
            key,
            operator,
            value,
        } => context
            .get(key)
            .is_some_and(|actual| compare(actual, *operator, value).unwrap_or(false)),
    }
}

/// First matching conditional branch, if any.
fn first_match(
    branching: &Branching,
    status: TaskStatus,
    output: Option<&Value>,
    context: &Map<String, Value>,
) -> Option<BranchTarget> {
    match branching {
        Branching::Conditional { conditions, .. } => conditions
            .iter()
            .find(|b| branch_matches(&b.condition, status, output, context))
            .map(|b| b.target),
        _ => None,
    }
}

/// Next step after task `index` succeeded with `output`.
///
/// Without branching the next task runs. A conditional rule with no match
/// and no default ends the workflow.
pub fn after_success(
    task: &TaskSpec,
    index: usize,
    output: Option<&Value>,
    context: &Map<String, Value>,
) -> NextStep {
    let Some(branching) = &task.branching else {
        return NextStep::Task(index + 1);
    };
    match branching {
        Branching::OnSuccess { success_target } => resolve(*success_target, index),
        Branching::OnFailure { .. } => NextStep::Task(index + 1),
        Branching::Conditional { default, .. } => {
            match first_match(branching, TaskStatus::Success, output, context).or(*default) {
                Some(target) => resolve(target, index),
                None => NextStep::End,
            }
        }
    }
}

/// Next step after task `index` failed, or `None` when no rule covers the
/// failure and the workflow must be interrupted.
///
/// Only `on_failure` and a matching conditional branch apply; a conditional
/// default never swallows a failure.
pub fn after_failure(task: &TaskSpec, index: usize, context: &Map<String, Value>) -> Option<NextStep> {
    let branching = task.branching.as_ref()?;
    match branching {
        Branching::OnFailure { failure_target } => Some(resolve(*failure_target, index)),
        Branching::OnSuccess { .. } => None,
        Branching::Conditional { .. } => {
            first_match(branching, TaskStatus::Failed, None, context).map(|t| resolve(t, index))
        }
    }
}
