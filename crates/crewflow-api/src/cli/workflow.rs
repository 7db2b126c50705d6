//! Workflow lifecycle subcommands: run, resume, status, list, pause,
//! interrupt, recover, check and cleanup.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use crewflow_core::engine::ExecutionReport;
use crewflow_types::error::ErrorSummary;
use crewflow_types::state::{RecoveryOption, WorkflowState, WorkflowStatus};
use crewflow_types::task::{TaskStatus, WorkflowTemplate};

use crate::executor::CliExecutor;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Run / resume
// ---------------------------------------------------------------------------

/// Parse a template file; `.json` files are read as JSON, anything else as YAML.
pub async fn load_template(path: &Path) -> Result<WorkflowTemplate> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read template {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let template = if is_json {
        WorkflowTemplate::from_json(&content)
    } else {
        WorkflowTemplate::from_yaml(&content)
    };
    template.with_context(|| format!("Invalid template {}", path.display()))
}

pub async fn run(
    state: &AppState,
    template_path: &Path,
    id: Option<String>,
    executor: Option<String>,
    json: bool,
) -> Result<()> {
    let template = load_template(template_path).await?;
    let id = id.unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
    let engine = state.engine(CliExecutor::from_arg(executor))?;

    let report = engine
        .execute(&template, &id)
        .await
        .with_context(|| format!("Workflow '{id}' could not be started"))?;
    print_report(&report, &engine.recovery().error_summary(None), json)
}

pub async fn resume(
    state: &AppState,
    id: &str,
    template_path: &Path,
    executor: Option<String>,
    json: bool,
) -> Result<()> {
    let template = load_template(template_path).await?;
    let engine = state.engine(CliExecutor::from_arg(executor))?;

    let report = engine
        .resume(&template, id)
        .await
        .with_context(|| format!("Workflow '{id}' could not be resumed"))?;
    print_report(&report, &engine.recovery().error_summary(None), json)
}

fn print_report(report: &ExecutionReport, errors: &ErrorSummary, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "workflow_id": report.workflow_id,
            "status": report.status,
            "executed": report.executed,
            "steps_completed": report.steps_completed,
            "progress": report.state.progress,
            "error": report.error,
            "interruption_reason": report.state.interruption_reason,
            "recovery_options": report.state.recovery_options,
            "errors": errors,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Workflow '{}' {}",
        status_marker(report.status),
        style(&report.workflow_id).cyan(),
        report.status
    );
    println!(
        "  Progress: {}/{} ({:.0}%)",
        report.state.progress.completed, report.state.progress.total, report.state.progress.percentage
    );
    let executed: Vec<String> = report.executed.iter().map(usize::to_string).collect();
    println!("  Executed this run: [{}]", executed.join(", "));
    if let Some(reason) = &report.state.interruption_reason {
        println!("  Reason: {}", style(reason).yellow());
    }
    if let Some(error) = &report.error {
        println!("  Error: {}", style(error).red());
    }
    if errors.total_errors > 0 {
        println!(
            "  Errors handled: {} ({} resolved)",
            errors.total_errors, errors.resolved_errors
        );
    }
    print_recovery_options(&report.state.recovery_options);
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

async fn load_state(state: &AppState, id: &str) -> Result<WorkflowState> {
    match state.manager.load(id).await? {
        Some(workflow) => Ok(workflow),
        None => bail!("Workflow '{id}' not found"),
    }
}

pub async fn status(state: &AppState, id: &str, json: bool) -> Result<()> {
    let workflow = load_state(state, id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Workflow '{}' {}",
        status_marker(workflow.status),
        style(&workflow.id).cyan(),
        workflow.status
    );
    if let Some(name) = &workflow.template_name {
        println!("  Template: {name}");
    }
    println!("  Current step: {}", workflow.current_step);
    println!(
        "  Progress: {}/{} ({:.0}%)",
        workflow.progress.completed, workflow.progress.total, workflow.progress.percentage
    );
    println!("  Checkpoints: {}", workflow.checkpoints.len());
    println!("  Handoffs: {}", workflow.agent_handoffs.len());
    if let Some(updated) = workflow.metadata.updated_at {
        println!("  Updated: {}", updated.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(reason) = &workflow.interruption_reason {
        println!("  Reason: {}", style(reason).yellow());
    }

    if !workflow.task_results.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Task").fg(Color::Cyan),
                Cell::new("Agent"),
                Cell::new("Status"),
                Cell::new("Attempts"),
                Cell::new("Recovered"),
                Cell::new("Error"),
            ]);
        for result in workflow.task_results.values() {
            table.add_row(vec![
                Cell::new(result.task_index),
                Cell::new(result.agent.as_deref().unwrap_or("-")),
                task_status_cell(result.status),
                Cell::new(result.attempts),
                Cell::new(if result.recovered { "yes" } else { "" }),
                Cell::new(result.error.as_deref().unwrap_or("")),
            ]);
        }
        println!();
        println!("{table}");
    }

    print_recovery_options(&workflow.recovery_options);
    println!();
    Ok(())
}

pub async fn list(state: &AppState, json: bool) -> Result<()> {
    let active = state.manager.list_active().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&active)?);
        return Ok(());
    }

    if active.is_empty() {
        println!();
        println!("  No active workflows.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Workflow").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Step"),
            Cell::new("Progress"),
            Cell::new("Updated"),
        ]);
    for summary in &active {
        let updated = summary
            .updated_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(&summary.id),
            workflow_status_cell(summary.status),
            Cell::new(&summary.current_step),
            Cell::new(format!("{:.0}%", summary.progress.percentage)),
            Cell::new(updated),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn check(state: &AppState, id: &str, json: bool) -> Result<()> {
    let report = state.manager.integrity_check(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    if report.is_valid {
        println!("  {} Workflow '{}' is consistent", style("✓").green(), style(id).cyan());
    } else {
        println!("  {} Workflow '{}' has issues:", style("✗").red(), style(id).cyan());
        for issue in &report.issues {
            println!("    - {issue}");
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Lifecycle changes
// ---------------------------------------------------------------------------

pub async fn pause(state: &AppState, id: &str, json: bool) -> Result<()> {
    let workflow = state
        .manager
        .pause(id)
        .await
        .with_context(|| format!("Failed to pause workflow '{id}'"))?;
    print_transition(&workflow, "Paused", json)
}

pub async fn interrupt(state: &AppState, id: &str, reason: &str, json: bool) -> Result<()> {
    let workflow = load_state(state, id).await?;
    if workflow.status.is_terminal() {
        bail!("Workflow '{id}' is already {}", workflow.status);
    }
    let workflow = state.manager.mark_interrupted(id, reason).await?;
    print_transition(&workflow, "Interrupted", json)
}

pub async fn recover(
    state: &AppState,
    id: &str,
    checkpoint: Option<&str>,
    json: bool,
) -> Result<()> {
    let workflow = state
        .manager
        .recover_from_checkpoint(id, checkpoint)
        .await
        .with_context(|| format!("Failed to recover workflow '{id}'"))?;
    print_transition(&workflow, "Recovered", json)?;
    if !json {
        println!(
            "  Continue with: {}",
            style(format!("crewflow resume {id} <template>")).dim()
        );
        println!();
    }
    Ok(())
}

pub async fn cleanup(state: &AppState, id: &str, force: bool, json: bool) -> Result<()> {
    let removed = state
        .manager
        .cleanup(id, force)
        .await
        .with_context(|| format!("Failed to clean up workflow '{id}'"))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({"workflow_id": id, "removed": removed}))?
        );
    } else if removed {
        println!("  {} Removed workflow '{}'", style("*").green().bold(), style(id).cyan());
    } else {
        println!("  Nothing stored for workflow '{id}'");
    }
    Ok(())
}

fn print_transition(workflow: &WorkflowState, verb: &str, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "workflow_id": workflow.id,
            "status": workflow.status,
            "current_step": workflow.current_step,
            "cursor": workflow.cursor,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} {} workflow '{}' ({})",
            style("*").green().bold(),
            verb,
            style(&workflow.id).cyan(),
            workflow.status
        );
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

fn print_recovery_options(options: &[RecoveryOption]) {
    if options.is_empty() {
        return;
    }
    println!();
    println!("  Recovery options:");
    for option in options {
        match &option.checkpoint_id {
            Some(checkpoint) => println!("    - {} ({})", option.description, style(checkpoint).dim()),
            None => println!("    - {}", option.description),
        }
    }
}

fn status_marker(status: WorkflowStatus) -> console::StyledObject<&'static str> {
    match status {
        WorkflowStatus::Completed => style("✓").green().bold(),
        WorkflowStatus::Failed => style("✗").red().bold(),
        WorkflowStatus::Interrupted => style("!").yellow().bold(),
        _ => style("*").cyan().bold(),
    }
}

fn workflow_status_cell(status: WorkflowStatus) -> Cell {
    let color = match status {
        WorkflowStatus::Running => Color::Blue,
        WorkflowStatus::Paused => Color::Yellow,
        WorkflowStatus::Interrupted => Color::Red,
        WorkflowStatus::Completed => Color::Green,
        WorkflowStatus::Failed => Color::Red,
        WorkflowStatus::Initialized => Color::Grey,
    };
    Cell::new(status.as_str()).fg(color)
}

fn task_status_cell(status: TaskStatus) -> Cell {
    let color = match status {
        TaskStatus::Success => Color::Green,
        TaskStatus::Failed => Color::Red,
        TaskStatus::Skipped => Color::Grey,
        TaskStatus::Pending => Color::Yellow,
    };
    Cell::new(status.to_string()).fg(color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn templates_load_from_yaml_and_json() {
        let tmp = TempDir::new().unwrap();
        let yaml = tmp.path().join("flow.yaml");
        tokio::fs::write(
            &yaml,
            "name: demo\ntasks:\n  - description: Design the system\n  - description: Implement it\n",
        )
        .await
        .unwrap();
        let template = load_template(&yaml).await.unwrap();
        assert_eq!(template.name, "demo");
        assert_eq!(template.tasks.len(), 2);

        let json = tmp.path().join("flow.json");
        tokio::fs::write(&json, r#"{"name": "demo", "tasks": [{"description": "Test it"}]}"#)
            .await
            .unwrap();
        assert_eq!(load_template(&json).await.unwrap().tasks.len(), 1);

        assert!(load_template(&tmp.path().join("missing.yaml")).await.is_err());
    }

    #[tokio::test]
    async fn dry_run_completes_and_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let state = AppState::init(Some(tmp.path().to_path_buf())).await.unwrap();
        let template = WorkflowTemplate::from_yaml(
            "name: demo\ntasks:\n  - description: Design the system\n  - description: Implement it\n",
        )
        .unwrap();

        let engine = state.engine(CliExecutor::DryRun).unwrap();
        let report = engine.execute(&template, "wf").await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Completed);
        assert!(tmp.path().join("workflow_states").join("wf.json").exists());
        assert!(state.manager.list_active().await.unwrap().is_empty());

        cleanup(&state, "wf", false, true).await.unwrap();
        assert!(state.manager.load("wf").await.unwrap().is_none());
    }
}
