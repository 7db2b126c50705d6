//! Skip-condition evaluation.
//!
//! A matching condition skips its task. Evaluation errors never skip: the
//! engine fails open toward execution.

use std::cmp::Ordering;

use crewflow_types::state::WorkflowState;
use crewflow_types::task::{ConditionOperator, TaskCondition, TaskStatus};
use serde_json::{Map, Value};
use thiserror::Error;

/// Why a condition could not be evaluated.
#[derive(Debug, Error, PartialEq)]
pub enum ConditionError {
    #[error("context key '{0}' is not set")]
    MissingKey(String),

    #[error("cannot apply {operator:?} to {actual} and {expected}")]
    NotComparable {
        operator: ConditionOperator,
        actual: Value,
        expected: Value,
    },

    #[error("hour range {start}..={end} is outside 0..=23")]
    InvalidHours { start: i32, end: i32 },
}

/// Compare `actual` against `expected` with `operator`.
///
/// Numbers compare numerically regardless of integer/float representation.
/// `contains` means list membership, substring, or object key presence.
pub fn compare(
    actual: &Value,
    operator: ConditionOperator,
    expected: &Value,
) -> Result<bool, ConditionError> {
    let not_comparable = || ConditionError::NotComparable {
        operator,
        actual: actual.clone(),
        expected: expected.clone(),
    };

    match operator {
        ConditionOperator::Equals => Ok(values_equal(actual, expected)),
        ConditionOperator::NotEquals => Ok(!values_equal(actual, expected)),
        ConditionOperator::Contains => match (actual, expected) {
            (Value::Array(items), _) => Ok(items.iter().any(|item| values_equal(item, expected))),
            (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
            (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
            _ => Err(not_comparable()),
        },
        ConditionOperator::GreaterThan | ConditionOperator::LessThan => {
            let ordering = order(actual, expected).ok_or_else(not_comparable)?;
            Ok(match operator {
                ConditionOperator::GreaterThan => ordering == Ordering::Greater,
                _ => ordering == Ordering::Less,
            })
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Evaluate `condition` against the workflow state at local hour `hour`.
pub fn evaluate(
    condition: &TaskCondition,
    state: &WorkflowState,
    context: &Map<String, Value>,
    hour: u32,
) -> Result<bool, ConditionError> {
    match condition {
        TaskCondition::ContextCheck {
            key,
            operator,
            value,
        } => {
            let actual = context
                .get(key)
                .ok_or_else(|| ConditionError::MissingKey(key.clone()))?;
            compare(actual, *operator, value)
        }
        TaskCondition::PreviousResult { task_index, status } => Ok(state
            .task_results
            .get(task_index)
            .is_some_and(|result| result.status == *status)),
        TaskCondition::TimeBased {
            start_hour,
            end_hour,
        } => {
            let (start, end) = (*start_hour, *end_hour);
            if !(0..=23).contains(&start) || !(0..=23).contains(&end) {
                return Err(ConditionError::InvalidHours { start, end });
            }
            let hour = hour as i32;
            // A range like 22..=2 wraps past midnight.
            Ok(if start <= end {
                (start..=end).contains(&hour)
            } else {
                hour >= start || hour <= end
            })
        }
        TaskCondition::DependencyCheck { dependency } => {
            Ok(context.contains_key(dependency) || satisfied_by_results(state, dependency))
        }
    }
}

/// Whether a successful earlier task produced or is named `dependency`.
fn satisfied_by_results(state: &WorkflowState, dependency: &str) -> bool {
    state
        .task_results
        .values()
        .filter(|r| r.status == TaskStatus::Success)
        .any(|r| {
            format!("task_{}", r.task_index) == dependency
                || r.output
                    .as_ref()
                    .and_then(Value::as_object)
                    .is_some_and(|o| o.contains_key(dependency))
        })
}

/// Whether the task guarded by `condition` should be skipped.
pub fn should_skip(
    condition: Option<&TaskCondition>,
    state: &WorkflowState,
    context: &Map<String, Value>,
    hour: u32,
) -> bool {
    let Some(condition) = condition else {
        return false;
    };
    match evaluate(condition, state, context, hour) {
        Ok(matched) => matched,
        Err(err) => {
            tracing::warn!(workflow_id = %state.id, error = %err, "condition evaluation failed, running task");
            false
        }
    }
}
