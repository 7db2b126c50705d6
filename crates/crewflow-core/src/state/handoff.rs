//! Agent handoff validation and tracking.
//!
//! The recorded handoffs form a directed graph (agent -> agents it handed
//! off to). A prospective handoff `from -> to` is rejected when `to` can
//! already reach `from`, because recording it would close a cycle.

use chrono::Utc;
use crewflow_types::state::{
    HandoffRecord, HandoffStatus, HandoffValidation, TimelineKind, WorkflowState, WorkflowStatus,
};
use petgraph::algo::has_path_connecting;
use petgraph::graphmap::DiGraphMap;
use serde_json::Value;

/// Repeats of the same transition above which a warning is raised.
pub const REPEATED_HANDOFF_LIMIT: usize = 5;

/// Error message prefix used for cycle rejections.
pub const CIRCULAR_DEPENDENCY: &str = "Circular dependency detected";

/// Whether recording `from -> to` would close a cycle.
pub fn would_create_cycle(state: &WorkflowState, from: &str, to: &str) -> bool {
    if from == to {
        return true;
    }

    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for (source, targets) in &state.agent_dependencies {
        graph.add_node(source.as_str());
        for target in targets {
            graph.add_edge(source.as_str(), target.as_str(), ());
        }
    }

    graph.contains_node(to) && graph.contains_node(from) && has_path_connecting(&graph, to, from, None)
}

/// Validate a prospective handoff against the recorded dependency graph.
///
/// Status and unexpected-target problems are warnings; only a cycle makes
/// the handoff invalid.
pub fn validate_handoff(state: &WorkflowState, from: &str, to: &str) -> HandoffValidation {
    let mut validation = HandoffValidation {
        is_valid: true,
        ..Default::default()
    };

    if !matches!(
        state.status,
        WorkflowStatus::Running | WorkflowStatus::Initialized
    ) {
        validation.warnings.push(format!(
            "Workflow status is '{}'; handoffs are expected while initialized or running",
            state.status
        ));
    }

    if let Some(targets) = state.agent_dependencies.get(from) {
        if !targets.is_empty() && !targets.contains(to) {
            let known: Vec<&str> = targets.iter().map(String::as_str).collect();
            validation.warnings.push(format!(
                "Unexpected handoff target '{to}' for '{from}' (previous targets: {})",
                known.join(", ")
            ));
        }
    }

    if would_create_cycle(state, from, to) {
        validation.is_valid = false;
        validation.errors.push(format!(
            "{CIRCULAR_DEPENDENCY}: '{to}' already depends on '{from}'"
        ));
    }

    let repeats = state
        .agent_handoffs
        .iter()
        .filter(|h| h.from_agent == from && h.to_agent == to)
        .count();
    if repeats > REPEATED_HANDOFF_LIMIT {
        validation.warnings.push(format!(
            "Handoff '{from}' -> '{to}' already recorded {repeats} times"
        ));
    }

    if state.agent_handoffs.is_empty() {
        validation
            .recommendations
            .push("No handoffs recorded yet; this will be the first transition".to_string());
    }

    validation
}

/// Append a handoff, update the adjacency map and timeline, and recompute
/// progress. A running workflow whose progress reaches 100% is completed.
pub fn record_handoff(
    state: &mut WorkflowState,
    from: &str,
    to: &str,
    data: Value,
    error: Option<String>,
) -> HandoffRecord {
    let record = HandoffRecord {
        from_agent: from.to_string(),
        to_agent: to.to_string(),
        timestamp: Utc::now(),
        sequence_id: state.agent_handoffs.len() as u64,
        data,
        status: if error.is_some() {
            HandoffStatus::Failed
        } else {
            HandoffStatus::Completed
        },
        error,
    };

    state.agent_handoffs.push(record.clone());
    state
        .agent_dependencies
        .entry(from.to_string())
        .or_default()
        .insert(to.to_string());
    state.push_timeline(
        TimelineKind::Handoff,
        format!("Handoff from {from} to {to}"),
        None,
    );

    state.recompute_progress();
    if state.status == WorkflowStatus::Running && state.progress.is_complete() {
        state.status = WorkflowStatus::Completed;
    }

    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn running_state() -> WorkflowState {
        let mut state = WorkflowState::new("wf", 4);
        state.status = WorkflowStatus::Running;
        state
    }

    #[test]
    fn closing_a_cycle_is_rejected() {
        let mut state = running_state();
        record_handoff(&mut state, "A", "B", Value::Null, None);
        record_handoff(&mut state, "B", "C", Value::Null, None);

        let validation = validate_handoff(&state, "C", "A");
        assert!(!validation.is_valid);
        assert!(validation.errors[0].starts_with(CIRCULAR_DEPENDENCY));

        let forward = validate_handoff(&state, "A", "C");
        assert!(forward.is_valid);
    }

    #[test]
    fn unrelated_agents_are_valid() {
        let mut state = running_state();
        record_handoff(&mut state, "A", "B", Value::Null, None);
        let validation = validate_handoff(&state, "C", "D");
        assert!(validation.is_valid);
        assert!(validation.errors.is_empty());
    }

    #[test]
    fn unexpected_target_and_status_are_warnings() {
        let mut state = running_state();
        record_handoff(&mut state, "A", "B", Value::Null, None);
        state.status = WorkflowStatus::Paused;

        let validation = validate_handoff(&state, "A", "D");
        assert!(validation.is_valid);
        assert_eq!(validation.warnings.len(), 2);
    }

    #[test]
    fn first_handoff_gets_recommendation() {
        let validation = validate_handoff(&running_state(), "A", "B");
        assert!(validation.is_valid);
        assert_eq!(validation.recommendations.len(), 1);
    }

    #[test]
    fn repeated_transitions_warn() {
        let mut state = running_state();
        for _ in 0..6 {
            record_handoff(&mut state, "A", "B", Value::Null, None);
        }
        let validation = validate_handoff(&state, "A", "B");
        assert!(validation.is_valid);
        assert!(validation.warnings.iter().any(|w| w.contains("6 times")));
    }

    #[test]
    fn records_are_sequenced_and_tracked() {
        let mut state = running_state();
        let first = record_handoff(&mut state, "A", "B", json!({"task_index": 0}), None);
        let second = record_handoff(&mut state, "B", "C", Value::Null, Some("boom".into()));
        assert_eq!(first.sequence_id, 0);
        assert_eq!(second.sequence_id, 1);
        assert_eq!(second.status, HandoffStatus::Failed);
        assert!(state.agent_dependencies["A"].contains("B"));
        assert_eq!(
            state
                .execution_timeline
                .iter()
                .filter(|e| e.kind == TimelineKind::Handoff)
                .count(),
            2
        );
    }

    #[test]
    fn reaching_full_progress_completes_running_workflow() {
        let mut state = running_state();
        state.total_steps = 2;
        state.mark_step_completed(0);
        state.mark_step_completed(1);
        record_handoff(&mut state, "A", "B", Value::Null, None);
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.progress.percentage, 100.0);
    }
}
