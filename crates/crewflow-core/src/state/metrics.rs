//! Performance history: execution metric collection, retention and
//! aggregation.
//!
//! All functions here are pure; the state manager loads and saves histories
//! through a [`MetricsStore`](super::MetricsStore).

use chrono::{DateTime, Duration, Utc};
use crewflow_types::metrics::{
    AggregatedMetrics, ExecutionMetrics, PerformanceEntry, RetentionPolicy,
};
use crewflow_types::state::WorkflowState;
use crewflow_types::task::TaskStatus;

use super::StoreError;

/// Histories at or below this size are never compressed.
pub const COMPRESSION_MIN_ENTRIES: usize = 10;

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// Compute execution metrics for a finished run.
///
/// Duration spans from the earliest task start (or workflow creation) to the
/// latest task finish. Efficiency is `max(0, 100 - cv * 50)` where `cv` is
/// the coefficient of variation of task durations; tasks taking more than
/// twice the average are bottlenecks.
pub fn collect_execution_metrics(state: &WorkflowState) -> ExecutionMetrics {
    let executed: Vec<_> = state
        .task_results
        .values()
        .filter(|r| r.status != TaskStatus::Skipped)
        .collect();

    let completed_tasks = executed
        .iter()
        .filter(|r| r.status == TaskStatus::Success)
        .count();
    let failed_tasks = executed
        .iter()
        .filter(|r| r.status == TaskStatus::Failed)
        .count();
    let success_rate = if executed.is_empty() {
        0.0
    } else {
        completed_tasks as f64 / executed.len() as f64
    };

    let start = executed
        .iter()
        .filter_map(|r| r.started_at)
        .min()
        .or(state.metadata.created_at);
    let end = executed.iter().filter_map(|r| r.finished_at).max();
    let duration = match (start, end) {
        (Some(start), Some(end)) if end >= start => {
            (end - start).num_milliseconds() as f64 / 1000.0
        }
        _ => 0.0,
    };

    let timed: Vec<(usize, f64)> = executed
        .iter()
        .filter_map(|r| r.duration_secs().map(|d| (r.task_index, d)))
        .collect();
    let durations: Vec<f64> = timed.iter().map(|(_, d)| *d).collect();
    let (efficiency_score, variability_coefficient) = efficiency(&durations);

    let mean = mean(&durations);
    let bottlenecks = timed
        .iter()
        .filter(|(_, d)| mean > 0.0 && *d > mean * 2.0)
        .map(|(index, _)| *index)
        .collect();

    ExecutionMetrics {
        workflow_id: state.id.clone(),
        duration,
        total_tasks: state.total_steps,
        completed_tasks,
        failed_tasks,
        success_rate,
        efficiency_score,
        variability_coefficient,
        bottlenecks,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Returns `(efficiency_score, coefficient_of_variation)`.
fn efficiency(durations: &[f64]) -> (f64, f64) {
    if durations.is_empty() {
        return (0.0, 0.0);
    }
    let mean = mean(durations);
    let std_dev = if durations.len() > 1 {
        let variance = durations.iter().map(|d| (d - mean).powi(2)).sum::<f64>()
            / (durations.len() - 1) as f64;
        variance.sqrt()
    } else {
        0.0
    };
    let cv = if mean > 0.0 { std_dev / mean } else { 0.0 };
    ((100.0 - cv * 50.0).max(0.0), cv)
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// What a retention pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionOutcome {
    pub removed: usize,
    pub compressed: usize,
}

/// Reject policies with non-positive limits.
pub fn validate_policy(policy: &RetentionPolicy) -> Result<(), StoreError> {
    let checks = [
        ("max_age_days", policy.max_age_days as u64),
        ("max_entries_per_workflow", policy.max_entries_per_workflow as u64),
        ("compression_threshold_days", policy.compression_threshold_days as u64),
        ("auto_cleanup_interval_hours", policy.auto_cleanup_interval_hours as u64),
        ("storage_limit_mb", policy.storage_limit_mb),
    ];
    for (name, value) in checks {
        if value == 0 {
            return Err(StoreError::Validation(format!(
                "retention policy field '{name}' must be positive"
            )));
        }
    }
    Ok(())
}

/// Apply `policy` to one workflow's history in place.
///
/// Entries older than `max_age_days` are dropped, only the newest
/// `max_entries_per_workflow` are kept, and when more than
/// [`COMPRESSION_MIN_ENTRIES`] remain, entries older than
/// `compression_threshold_days` lose their bottleneck detail.
pub fn apply_retention(
    entries: &mut Vec<PerformanceEntry>,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> RetentionOutcome {
    let before = entries.len();
    let max_age = now - Duration::days(policy.max_age_days as i64);
    entries.retain(|e| e.timestamp >= max_age);
    entries.sort_by_key(|e| e.timestamp);

    if entries.len() > policy.max_entries_per_workflow {
        let excess = entries.len() - policy.max_entries_per_workflow;
        entries.drain(..excess);
    }
    let removed = before - entries.len();

    let mut compressed = 0;
    if entries.len() > COMPRESSION_MIN_ENTRIES {
        let threshold = now - Duration::days(policy.compression_threshold_days as i64);
        for entry in entries
            .iter_mut()
            .filter(|e| e.timestamp < threshold && !e.compressed)
        {
            entry.bottleneck_count = None;
            entry.compressed = true;
            compressed += 1;
        }
    }

    RetentionOutcome {
        removed,
        compressed,
    }
}

/// Drop entries older than `max_age_days`; returns how many were removed.
pub fn prune_older_than(
    entries: &mut Vec<PerformanceEntry>,
    max_age_days: u32,
    now: DateTime<Utc>,
) -> usize {
    let cutoff = now - Duration::days(max_age_days as i64);
    let before = entries.len();
    entries.retain(|e| e.timestamp >= cutoff);
    before - entries.len()
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Aggregate histories of several workflows, optionally restricted to the
/// last `time_range_hours`.
pub fn aggregate(
    histories: &[(String, Vec<PerformanceEntry>)],
    time_range_hours: Option<u32>,
    now: DateTime<Utc>,
) -> AggregatedMetrics {
    let cutoff = time_range_hours.map(|h| now - Duration::hours(h as i64));

    let mut workflow_count = 0;
    let mut entries: Vec<&PerformanceEntry> = Vec::new();
    for (_, history) in histories {
        let before = entries.len();
        entries.extend(
            history
                .iter()
                .filter(|e| cutoff.is_none_or(|c| e.timestamp >= c)),
        );
        if entries.len() > before {
            workflow_count += 1;
        }
    }

    if entries.is_empty() {
        return AggregatedMetrics::NoData;
    }

    let n = entries.len() as f64;
    let durations: Vec<f64> = entries.iter().map(|e| e.duration).collect();
    let total_bottlenecks: u64 = entries
        .iter()
        .filter_map(|e| e.bottleneck_count)
        .map(u64::from)
        .sum();

    AggregatedMetrics::Summary {
        workflow_count,
        entry_count: entries.len(),
        avg_duration: durations.iter().sum::<f64>() / n,
        min_duration: durations.iter().copied().fold(f64::INFINITY, f64::min),
        max_duration: durations.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        avg_success_rate: entries.iter().map(|e| e.success_rate).sum::<f64>() / n,
        avg_efficiency_score: entries.iter().map(|e| e.efficiency_score).sum::<f64>() / n,
        total_bottlenecks,
        avg_bottlenecks: total_bottlenecks as f64 / n,
    }
}
