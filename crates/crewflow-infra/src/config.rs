//! Configuration loader for crewflow.
//!
//! Reads `config.toml` from the data directory (`~/.crewflow/` in
//! production) into [`CrewflowConfig`]. Falls back to defaults when the file
//! is missing or malformed.

use std::path::{Path, PathBuf};

use crewflow_core::recovery::{ErrorRecoveryFramework, RecoveryError};
use crewflow_core::state::metrics::validate_policy;
use crewflow_types::config::CrewflowConfig;
use thiserror::Error;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "CREWFLOW_DATA_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Path of the config file inside `data_dir`.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

/// Read and validate `{data_dir}/config.toml`.
///
/// Returns `Ok(None)` when the file does not exist.
pub async fn try_load_config(data_dir: &Path) -> Result<Option<CrewflowConfig>, ConfigError> {
    let path = config_path(data_dir);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(ConfigError::Read { path, source }),
    };

    let config: CrewflowConfig =
        toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })?;
    validate(&config)?;
    Ok(Some(config))
}

/// Load configuration, falling back to defaults on any problem.
pub async fn load_config(data_dir: &Path) -> CrewflowConfig {
    match try_load_config(data_dir).await {
        Ok(Some(config)) => config,
        Ok(None) => {
            tracing::debug!(
                "No config.toml found at {}, using defaults",
                config_path(data_dir).display()
            );
            CrewflowConfig::default()
        }
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            CrewflowConfig::default()
        }
    }
}

/// Reject values the components would refuse at construction time.
pub fn validate(config: &CrewflowConfig) -> Result<(), ConfigError> {
    validate_policy(&config.retention).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    ErrorRecoveryFramework::new(config.recovery.clone()).map_err(|e| match e {
        RecoveryError::InvalidConfig(msg) => ConfigError::Invalid(msg),
    })?;

    let a = &config.assignment;
    let weights = [
        a.capability_weight,
        a.performance_weight,
        a.load_weight,
        a.context_weight,
    ];
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(ConfigError::Invalid(
            "assignment weights must be non-negative numbers".to_string(),
        ));
    }
    if a.load_threshold == 0 {
        return Err(ConfigError::Invalid(
            "assignment.load_threshold must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `CREWFLOW_DATA_DIR` environment variable
/// 2. `~/.crewflow`
/// 3. `.crewflow` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".crewflow");
    }

    PathBuf::from(".crewflow")
}
