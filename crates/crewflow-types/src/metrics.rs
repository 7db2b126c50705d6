//! Workflow performance history and retention policy types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in a workflow's performance history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceEntry {
    pub timestamp: DateTime<Utc>,
    /// Total run duration in seconds.
    pub duration: f64,
    /// Fraction of executed tasks that succeeded, 0.0..=1.0.
    pub success_rate: f64,
    /// 0..=100, higher means more uniform task durations.
    pub efficiency_score: f64,
    /// Dropped when the entry is compressed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottleneck_count: Option<u32>,
    #[serde(default)]
    pub compressed: bool,
}

/// Retention policy for performance history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    #[serde(default = "default_max_entries")]
    pub max_entries_per_workflow: usize,
    #[serde(default = "default_compression_threshold_days")]
    pub compression_threshold_days: u32,
    #[serde(default = "default_cleanup_interval_hours")]
    pub auto_cleanup_interval_hours: u32,
    #[serde(default = "default_storage_limit_mb")]
    pub storage_limit_mb: u64,
}

fn default_max_age_days() -> u32 {
    30
}

fn default_max_entries() -> usize {
    100
}

fn default_compression_threshold_days() -> u32 {
    7
}

fn default_cleanup_interval_hours() -> u32 {
    24
}

fn default_storage_limit_mb() -> u64 {
    100
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            max_entries_per_workflow: default_max_entries(),
            compression_threshold_days: default_compression_threshold_days(),
            auto_cleanup_interval_hours: default_cleanup_interval_hours(),
            storage_limit_mb: default_storage_limit_mb(),
        }
    }
}

/// Aggregates over performance entries, possibly across workflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregatedMetrics {
    NoData,
    Summary {
        workflow_count: usize,
        entry_count: usize,
        avg_duration: f64,
        min_duration: f64,
        max_duration: f64,
        avg_success_rate: f64,
        avg_efficiency_score: f64,
        total_bottlenecks: u64,
        avg_bottlenecks: f64,
    },
}

/// Metrics computed from one finished run before they are appended to history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub workflow_id: String,
    pub duration: f64,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub success_rate: f64,
    pub efficiency_score: f64,
    pub variability_coefficient: f64,
    /// Indices of tasks that took more than twice the average duration.
    pub bottlenecks: Vec<usize>,
}

impl ExecutionMetrics {
    pub fn to_entry(&self, timestamp: DateTime<Utc>) -> PerformanceEntry {
        PerformanceEntry {
            timestamp,
            duration: self.duration,
            success_rate: self.success_rate,
            efficiency_score: self.efficiency_score,
            bottleneck_count: Some(self.bottlenecks.len() as u32),
            compressed: false,
        }
    }
}

/// Storage footprint of the metrics documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageStatus {
    pub metrics_files: usize,
    pub total_entries: usize,
    pub used_bytes: u64,
    pub limit_bytes: u64,
    /// Used / limit * 100, rounded to 2 decimals.
    pub usage_percentage: f64,
    pub over_limit: bool,
}
