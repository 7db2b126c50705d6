//! Business logic and store trait definitions for crewflow.
//!
//! This crate defines the "ports" (`StateStore`, `MetricsStore`,
//! `AgentDirectory`, `TaskExecutor`, `ArtefactGenerator`) that the
//! infrastructure layer implements, plus the engine, the error recovery
//! framework and agent assignment. It depends only on `crewflow-types` --
//! never on `crewflow-infra` or any filesystem code.

pub mod assignment;
pub mod engine;
pub mod recovery;
pub mod state;
