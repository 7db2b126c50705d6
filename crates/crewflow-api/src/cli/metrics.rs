//! Performance metrics subcommands.

use anyhow::{Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use crewflow_types::metrics::AggregatedMetrics;

use crate::state::AppState;

#[derive(Subcommand)]
pub enum MetricsCommand {
    /// Show the stored performance history of one workflow.
    History {
        /// Workflow id.
        id: String,

        /// Only the newest N entries.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Aggregate metrics across workflows.
    Aggregate {
        /// Workflow ids (all workflows when omitted).
        ids: Vec<String>,

        /// Only entries recorded in the last N hours.
        #[arg(long)]
        hours: Option<u32>,
    },

    /// Show metrics storage usage against the configured limit.
    Storage,

    /// Drop metrics entries older than N days.
    Cleanup {
        /// Maximum entry age in days (retention default when omitted).
        #[arg(long)]
        days: Option<u32>,
    },

    /// Show the active retention policy.
    Retention,
}

pub async fn handle(state: &AppState, action: MetricsCommand, json: bool) -> Result<()> {
    match action {
        MetricsCommand::History { id, limit } => history(state, &id, limit, json).await,
        MetricsCommand::Aggregate { ids, hours } => aggregate(state, ids, hours, json).await,
        MetricsCommand::Storage => storage(state, json).await,
        MetricsCommand::Cleanup { days } => cleanup(state, days, json).await,
        MetricsCommand::Retention => retention(state, json).await,
    }
}

async fn history(state: &AppState, id: &str, limit: Option<usize>, json: bool) -> Result<()> {
    let entries = state.manager.metrics_history(id, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!();
        println!("  No metrics recorded for '{id}'.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Recorded").fg(Color::Cyan),
            Cell::new("Duration (s)"),
            Cell::new("Success"),
            Cell::new("Efficiency"),
            Cell::new("Bottlenecks"),
        ]);
    for entry in &entries {
        let bottlenecks = match entry.bottleneck_count {
            Some(count) => count.to_string(),
            None if entry.compressed => "compressed".to_string(),
            None => "-".to_string(),
        };
        table.add_row(vec![
            Cell::new(entry.timestamp.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(format!("{:.2}", entry.duration)),
            Cell::new(format!("{:.0}%", entry.success_rate * 100.0)),
            Cell::new(format!("{:.1}", entry.efficiency_score)),
            Cell::new(bottlenecks),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn aggregate(
    state: &AppState,
    ids: Vec<String>,
    hours: Option<u32>,
    json: bool,
) -> Result<()> {
    let ids = (!ids.is_empty()).then_some(ids);
    let metrics = state.manager.aggregate_metrics(ids.as_deref(), hours).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
        return Ok(());
    }

    println!();
    match metrics {
        AggregatedMetrics::NoData => println!("  No metrics in range."),
        AggregatedMetrics::Summary {
            workflow_count,
            entry_count,
            avg_duration,
            min_duration,
            max_duration,
            avg_success_rate,
            avg_efficiency_score,
            total_bottlenecks,
            avg_bottlenecks,
        } => {
            println!(
                "  {} across {} workflow(s), {} entries",
                style("Metrics").bold(),
                workflow_count,
                entry_count
            );
            println!(
                "  Duration: avg {avg_duration:.2}s, min {min_duration:.2}s, max {max_duration:.2}s"
            );
            println!("  Success rate: {:.0}%", avg_success_rate * 100.0);
            println!("  Efficiency: {avg_efficiency_score:.1}");
            println!("  Bottlenecks: {total_bottlenecks} total, {avg_bottlenecks:.2} per entry");
        }
    }
    println!();
    Ok(())
}

async fn storage(state: &AppState, json: bool) -> Result<()> {
    let status = state.manager.storage_status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let usage = format!("{:.2}%", status.usage_percentage);
    let usage = if status.over_limit {
        style(usage).red().bold()
    } else {
        style(usage).green()
    };
    println!();
    println!("  Metrics files: {}", status.metrics_files);
    println!("  Entries: {}", status.total_entries);
    println!(
        "  Used: {} of {} bytes ({usage})",
        status.used_bytes, status.limit_bytes
    );
    println!();
    Ok(())
}

async fn cleanup(state: &AppState, days: Option<u32>, json: bool) -> Result<()> {
    let days = match days {
        Some(days) => days,
        None => state.manager.retention().await.max_age_days,
    };
    if days == 0 {
        bail!("--days must be at least 1");
    }
    let removed = state.manager.cleanup_old_metrics(days).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({"max_age_days": days, "removed": removed}))?
        );
    } else {
        println!(
            "  {} Removed {} entries older than {} days",
            style("*").green().bold(),
            removed,
            days
        );
    }
    Ok(())
}

async fn retention(state: &AppState, json: bool) -> Result<()> {
    let policy = state.manager.retention().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&policy)?);
        return Ok(());
    }

    println!();
    println!("  Max age: {} days", policy.max_age_days);
    println!("  Max entries per workflow: {}", policy.max_entries_per_workflow);
    println!("  Compress after: {} days", policy.compression_threshold_days);
    println!("  Cleanup interval: {} hours", policy.auto_cleanup_interval_hours);
    println!("  Storage limit: {} MB", policy.storage_limit_mb);
    println!();
    Ok(())
}
