//! Shared domain types for crewflow.
//!
//! This crate contains the data model used across the workflow engine:
//! persisted workflow state, task templates, error records, metrics history,
//! agent descriptions and configuration.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod agent;
pub mod config;
pub mod error;
pub mod metrics;
pub mod state;
pub mod task;
