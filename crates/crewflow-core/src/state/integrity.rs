//! Non-fatal integrity audit of a workflow state.

use crewflow_types::state::{IntegrityReport, WorkflowState, WorkflowStatus};

/// Audit `state` for internal inconsistencies.
///
/// Issues are reported but never fail the workflow; `is_valid` stays true
/// for any state that could be loaded.
pub fn integrity_check(state: &WorkflowState) -> IntegrityReport {
    let mut issues = Vec::new();

    if state.status == WorkflowStatus::Completed && state.steps_completed.is_empty() {
        issues.push("Workflow marked completed but no steps were completed".to_string());
    }

    if state.total_steps > 0 {
        for step in state.steps_completed.iter().filter(|&&s| s >= state.total_steps) {
            issues.push(format!(
                "Completed step {step} is outside 0..{}",
                state.total_steps
            ));
        }
    }

    if state.progress.completed != state.steps_completed.len() {
        issues.push(format!(
            "Progress reports {} completed steps but {} are recorded",
            state.progress.completed,
            state.steps_completed.len()
        ));
    }

    for handoff in &state.agent_handoffs {
        match state.agent_dependencies.get(&handoff.from_agent) {
            None => issues.push(format!(
                "Missing dependency record for {}",
                handoff.from_agent
            )),
            Some(targets) if !targets.contains(&handoff.to_agent) => issues.push(format!(
                "Inconsistent dependency: {} -> {}",
                handoff.from_agent, handoff.to_agent
            )),
            Some(_) => {}
        }
    }

    for (position, pair) in state.agent_handoffs.windows(2).enumerate() {
        if pair[1].sequence_id <= pair[0].sequence_id {
            issues.push(format!(
                "Handoff sequence out of order at position {}",
                position + 1
            ));
        }
    }

    for pair in state.checkpoints.windows(2) {
        if pair[1].timestamp < pair[0].timestamp {
            issues.push(format!(
                "Checkpoint {} is older than its predecessor {}",
                pair[1].id, pair[0].id
            ));
        }
    }

    IntegrityReport {
        is_valid: true,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::handoff::record_handoff;
    use serde_json::Value;

    #[test]
    fn clean_state_has_no_issues() {
        let mut state = WorkflowState::new("wf", 2);
        state.status = WorkflowStatus::Running;
        state.mark_step_completed(0);
        record_handoff(&mut state, "a", "b", Value::Null, None);
        let report = integrity_check(&state);
        assert!(report.is_valid);
        assert!(report.issues.is_empty(), "{:?}", report.issues);
    }

    #[test]
    fn completed_without_steps_is_flagged() {
        let mut state = WorkflowState::new("wf", 2);
        state.status = WorkflowStatus::Completed;
        let report = integrity_check(&state);
        assert!(report.is_valid);
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn handoffs_without_edges_are_flagged() {
        let mut state = WorkflowState::new("wf", 2);
        record_handoff(&mut state, "a", "b", Value::Null, None);
        record_handoff(&mut state, "b", "c", Value::Null, None);
        state.agent_dependencies.remove("a");
        state
            .agent_dependencies
            .get_mut("b")
            .unwrap()
            .remove("c");

        let report = integrity_check(&state);
        assert!(report.issues.contains(&"Missing dependency record for a".to_string()));
        assert!(report.issues.contains(&"Inconsistent dependency: b -> c".to_string()));
    }

    #[test]
    fn progress_mismatch_is_flagged() {
        let mut state = WorkflowState::new("wf", 3);
        state.mark_step_completed(1);
        let report = integrity_check(&state);
        assert!(report.issues[0].contains("Progress reports 0"));
    }
}
