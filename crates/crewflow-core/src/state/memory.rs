//! In-memory state store.
//!
//! Keeps encoded documents rather than typed values so the write and read
//! paths (validation, metadata enrichment, corruption handling) are the same
//! ones the filesystem store uses. Used by tests and by embedders that do
//! not need durability.

use std::collections::HashMap;

use chrono::Utc;
use crewflow_types::metrics::PerformanceEntry;
use crewflow_types::state::WorkflowState;
use serde_json::Value;
use tokio::sync::Mutex;

use super::document::{
    Decoded, backup_document, backup_name, decode_document, encode_document, prepare_for_write,
};
use super::{MetricsStore, StateStore, StoreError};

#[derive(Debug, Default)]
struct Inner {
    documents: HashMap<String, String>,
    metrics: HashMap<String, String>,
    backups: Vec<(String, Value)>,
}

/// Volatile [`StateStore`] and [`MetricsStore`] backed by a single mutex.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    inner: Mutex<Inner>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw text for `id` without any validation.
    pub async fn insert_raw(&self, id: &str, raw: impl Into<String>) {
        self.inner
            .lock()
            .await
            .documents
            .insert(id.to_string(), raw.into());
    }

    /// Raw stored text for `id`.
    pub async fn raw(&self, id: &str) -> Option<String> {
        self.inner.lock().await.documents.get(id).cloned()
    }

    /// Number of diagnostic backups taken for `id`.
    pub async fn backup_count(&self, id: &str) -> usize {
        self.inner
            .lock()
            .await
            .backups
            .iter()
            .filter(|(_, doc)| doc["workflow_id"] == id)
            .count()
    }
}

impl StateStore for InMemoryStateStore {
    async fn persist(&self, id: &str, state: &WorkflowState) -> Result<WorkflowState, StoreError> {
        let mut inner = self.inner.lock().await;

        let existing = match inner.documents.get(id).map(|raw| decode_document(raw.as_bytes())) {
            Some(Decoded::Valid(state)) => Some(*state),
            _ => None,
        };
        let prepared = prepare_for_write(id, state, existing.as_ref())?;
        let text = encode_document(&prepared)?;
        inner.documents.insert(id.to_string(), text);

        tracing::debug!(workflow_id = %id, status = %prepared.status, "state persisted");
        Ok(prepared)
    }

    async fn recover(&self, id: &str) -> Result<Option<WorkflowState>, StoreError> {
        let mut inner = self.inner.lock().await;

        let Some(raw) = inner.documents.get(id) else {
            return Ok(None);
        };

        match decode_document(raw.as_bytes()) {
            Decoded::Valid(state) => Ok(Some(*state)),
            Decoded::Corrupted { raw, reason } => {
                tracing::warn!(workflow_id = %id, reason = %reason, "corrupted state document, backing up");
                let name = backup_name(id, Utc::now());
                inner.backups.push((name, backup_document(id, &raw, &reason)));

                let minimal = WorkflowState::minimal_interrupted(id);
                let text = encode_document(&minimal)?;
                inner.documents.insert(id.to_string(), text);
                Ok(Some(minimal))
            }
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().await.documents.remove(id).is_some())
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        let mut ids: Vec<String> = inner.documents.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

impl MetricsStore for InMemoryStateStore {
    async fn load_metrics(&self, id: &str) -> Result<Vec<PerformanceEntry>, StoreError> {
        let inner = self.inner.lock().await;
        match inner.metrics.get(id) {
            Some(raw) => match serde_json::from_str(raw) {
                Ok(entries) => Ok(entries),
                Err(err) => {
                    tracing::warn!(workflow_id = %id, error = %err, "unreadable metrics history, starting fresh");
                    Ok(Vec::new())
                }
            },
            None => Ok(Vec::new()),
        }
    }

    async fn save_metrics(&self, id: &str, entries: &[PerformanceEntry]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if entries.is_empty() {
            inner.metrics.remove(id);
            return Ok(());
        }
        let text = serde_json::to_string(entries)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        inner.metrics.insert(id.to_string(), text);
        Ok(())
    }

    async fn metrics_ids(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        let mut ids: Vec<String> = inner.metrics.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn metrics_bytes(&self) -> Result<u64, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.metrics.values().map(|raw| raw.len() as u64).sum())
    }
}
