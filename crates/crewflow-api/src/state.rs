//! Application state wiring the engine to the filesystem.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use crewflow_core::assignment::{AgentAssignment, StaticAgentDirectory};
use crewflow_core::engine::WorkflowEngine;
use crewflow_core::recovery::ErrorRecoveryFramework;
use crewflow_core::state::StateManager;
use crewflow_infra::{FileStateStore, FsArtefactGenerator, load_config, resolve_data_dir};
use crewflow_types::config::CrewflowConfig;

use crate::executor::CliExecutor;

pub type Manager = StateManager<FileStateStore>;
pub type Engine = WorkflowEngine<FileStateStore, CliExecutor>;

/// Shared state for CLI commands.
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: CrewflowConfig,
    pub manager: Arc<Manager>,
    pub assignment: Arc<AgentAssignment>,
}

impl AppState {
    /// Resolve the data directory, load `config.toml` and open the store.
    pub async fn init(data_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let data_dir = data_dir.unwrap_or_else(resolve_data_dir);
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let config = load_config(&data_dir).await;
        let store = FileStateStore::open(&data_dir)
            .await
            .context("Failed to open workflow state directory")?;
        let manager = Arc::new(StateManager::with_retention(store, config.retention.clone()));
        let assignment = Arc::new(AgentAssignment::new(
            Arc::new(StaticAgentDirectory::bmad_default()),
            config.assignment.clone(),
        ));

        tracing::debug!(data_dir = %data_dir.display(), "application state initialized");
        Ok(Self {
            data_dir,
            config,
            manager,
            assignment,
        })
    }

    /// Engine running tasks through `executor`, with the workflow-aware
    /// recovery strategies registered.
    pub fn engine(&self, executor: CliExecutor) -> anyhow::Result<Engine> {
        let recovery = ErrorRecoveryFramework::new(self.config.recovery.clone())
            .context("Invalid [recovery] configuration")?
            .with_workflow_strategies(Arc::clone(&self.assignment));
        let artefacts = FsArtefactGenerator::new(self.data_dir.join("artefacts"));

        Ok(WorkflowEngine::new(
            Arc::clone(&self.manager),
            Arc::new(executor),
            Arc::clone(&self.assignment),
            Arc::new(recovery),
            self.config.engine.clone(),
        )
        .with_artefact_generator(Arc::new(artefacts)))
    }
}
