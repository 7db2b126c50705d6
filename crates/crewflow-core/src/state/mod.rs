//! Durable workflow state: store ports, document rules, handoff tracking,
//! integrity auditing and metrics retention.
//!
//! The infrastructure layer implements [`StateStore`] and [`MetricsStore`];
//! [`StateManager`] layers per-workflow serialization and the higher-level
//! operations on top of any implementation.

pub mod document;
pub mod handoff;
pub mod integrity;
pub mod manager;
pub mod memory;
pub mod metrics;

use crewflow_types::metrics::PerformanceEntry;
use crewflow_types::state::WorkflowState;
use thiserror::Error;

pub use manager::StateManager;
pub use memory::InMemoryStateStore;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised by state stores and the state manager.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem or backend I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The document could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The state violates a schema rule and was not written.
    #[error("validation error: {0}")]
    Validation(String),

    /// No state exists for the workflow id.
    #[error("workflow not found: {0}")]
    NotFound(String),

    /// A status change that the lifecycle does not allow.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}

// ---------------------------------------------------------------------------
// Store ports
// ---------------------------------------------------------------------------

/// Durable per-workflow state persistence.
///
/// Implementations must run the read-merge-write of `persist` under a single
/// store-wide lock so monotonic counters never go backwards.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait StateStore: Send + Sync {
    /// Fill defaults, validate, enrich metadata and write the state atomically.
    ///
    /// Returns the document as stored.
    fn persist(
        &self,
        id: &str,
        state: &WorkflowState,
    ) -> impl std::future::Future<Output = Result<WorkflowState, StoreError>> + Send;

    /// Load the state for `id`.
    ///
    /// Returns `Ok(None)` when nothing is stored. Unreadable documents are
    /// backed up and replaced by a minimal `interrupted` state instead of
    /// surfacing an error.
    fn recover(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowState>, StoreError>> + Send;

    /// Remove the state for `id`. Returns `true` if it existed.
    fn delete(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Ids of every stored workflow, excluding diagnostic backups.
    fn list_ids(&self)
    -> impl std::future::Future<Output = Result<Vec<String>, StoreError>> + Send;
}

/// Append-only performance history, one document per workflow.
pub trait MetricsStore: Send + Sync {
    /// Load the history for `id` (empty when none exists).
    fn load_metrics(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<PerformanceEntry>, StoreError>> + Send;

    /// Replace the history for `id`. An empty slice removes the document.
    fn save_metrics(
        &self,
        id: &str,
        entries: &[PerformanceEntry],
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Ids that have a metrics document.
    fn metrics_ids(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Bytes currently used by all metrics documents.
    fn metrics_bytes(&self) -> impl std::future::Future<Output = Result<u64, StoreError>> + Send;
}
