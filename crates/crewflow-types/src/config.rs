//! Configuration types for crewflow.
//!
//! `CrewflowConfig` represents the top-level `config.toml` that tunes the
//! engine, agent assignment weights, the recovery framework and metrics
//! retention.

use serde::{Deserialize, Serialize};

use crate::metrics::RetentionPolicy;

/// Top-level configuration.
///
/// Loaded from `~/.crewflow/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrewflowConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub assignment: AssignmentConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub retention: RetentionPolicy,
}

/// Engine behaviour switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Route exhausted retries through the recovery framework.
    #[serde(default = "default_true")]
    pub use_advanced_recovery: bool,
    /// Record a performance entry when a run reaches a terminal status.
    #[serde(default = "default_true")]
    pub collect_metrics: bool,
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_advanced_recovery: true,
            collect_metrics: true,
        }
    }
}

/// Weights and thresholds for agent scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentConfig {
    #[serde(default = "default_capability_weight")]
    pub capability_weight: f64,
    #[serde(default = "default_performance_weight")]
    pub performance_weight: f64,
    #[serde(default = "default_load_weight")]
    pub load_weight: f64,
    #[serde(default = "default_context_weight")]
    pub context_weight: f64,
    /// Minimum total score for a scored pick to be accepted.
    #[serde(default = "default_viability_threshold")]
    pub viability_threshold: f64,
    /// Recent assignments at which the load component reaches zero.
    #[serde(default = "default_load_threshold")]
    pub load_threshold: u32,
    /// Number of most recent handoffs inspected for load.
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,
}

fn default_capability_weight() -> f64 {
    0.4
}

fn default_performance_weight() -> f64 {
    0.3
}

fn default_load_weight() -> f64 {
    0.2
}

fn default_context_weight() -> f64 {
    0.1
}

fn default_viability_threshold() -> f64 {
    0.3
}

fn default_load_threshold() -> u32 {
    5
}

fn default_recent_window() -> usize {
    10
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            capability_weight: default_capability_weight(),
            performance_weight: default_performance_weight(),
            load_weight: default_load_weight(),
            context_weight: default_context_weight(),
            viability_threshold: default_viability_threshold(),
            load_threshold: default_load_threshold(),
            recent_window: default_recent_window(),
        }
    }
}

/// Recovery framework defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Consecutive unrecovered failures before an operation's breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds an open breaker waits before allowing a probe.
    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: f64,
    #[serde(default = "default_retry_max")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: f64,
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_secs: f64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_secs() -> f64 {
    300.0
}

fn default_retry_max() -> u32 {
    3
}

fn default_retry_base_delay() -> f64 {
    1.0
}

fn default_retry_max_delay() -> f64 {
    60.0
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout_secs(),
            retry_max_attempts: default_retry_max(),
            retry_base_delay_secs: default_retry_base_delay(),
            retry_max_delay_secs: default_retry_max_delay(),
        }
    }
}
