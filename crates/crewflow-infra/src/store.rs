//! JSON-file implementation of the state and metrics store ports.
//!
//! Layout under the data directory:
//!
//! ```text
//! workflow_states/
//!   {id}.json                       workflow state (pretty JSON)
//!   {id}_metrics.json               performance history
//!   {id}_corrupted_{ts}[_n].json    diagnostic backups of unreadable state
//! ```
//!
//! All file I/O runs under one store-wide async mutex; writes go to a
//! temporary file that is renamed over the target.

use std::path::{Path, PathBuf};

use chrono::Utc;
use crewflow_core::state::document::{
    Decoded, backup_document, backup_name, decode_document, encode_document, is_backup_name,
    prepare_for_write,
};
use crewflow_core::state::{MetricsStore, StateStore, StoreError};
use crewflow_types::metrics::PerformanceEntry;
use crewflow_types::state::WorkflowState;
use tokio::sync::Mutex;

const STATE_DIR: &str = "workflow_states";
const METRICS_SUFFIX: &str = "_metrics";
const TMP_EXTENSION: &str = "tmp";

/// File-backed [`StateStore`] and [`MetricsStore`].
#[derive(Debug)]
pub struct FileStateStore {
    dir: PathBuf,
    io_lock: Mutex<()>,
}

impl FileStateStore {
    /// Store rooted at `{data_dir}/workflow_states`. The directory is created
    /// on first write.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join(STATE_DIR),
            io_lock: Mutex::new(()),
        }
    }

    /// Like [`FileStateStore::new`], creating the directory up front.
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let store = Self::new(data_dir);
        tokio::fs::create_dir_all(&store.dir).await?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn metrics_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}{METRICS_SUFFIX}.json"))
    }

    /// Paths of every diagnostic backup taken for `id`.
    pub async fn backups(&self, id: &str) -> Result<Vec<PathBuf>, StoreError> {
        let _guard = self.io_lock.lock().await;
        let prefix = format!("{id}_corrupted_");
        let mut paths: Vec<PathBuf> = self
            .json_stems()
            .await?
            .into_iter()
            .filter(|stem| stem.starts_with(&prefix))
            .map(|stem| self.dir.join(format!("{stem}.json")))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Stems of every `.json` file in the store directory.
    async fn json_stems(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut stems = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(stem) = name.strip_suffix(".json") {
                stems.push(stem.to_string());
            }
        }
        Ok(stems)
    }

    /// Write `content` to `path` via a temporary sibling and a rename.
    async fn write_atomic(&self, path: &Path, content: &str) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension(TMP_EXTENSION);
        tokio::fs::write(&tmp, content).await?;
        if let Err(err) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// First free backup path for `id`; same-second collisions get `_n`.
    async fn free_backup_path(&self, id: &str) -> PathBuf {
        let stem = backup_name(id, Utc::now());
        let mut path = self.dir.join(format!("{stem}.json"));
        let mut n = 1;
        while tokio::fs::try_exists(&path).await.unwrap_or(false) {
            path = self.dir.join(format!("{stem}_{n}.json"));
            n += 1;
        }
        path
    }

    /// Read an existing document for the merge step of `persist`.
    async fn read_existing(&self, path: &Path) -> Option<WorkflowState> {
        let bytes = tokio::fs::read(path).await.ok()?;
        match decode_document(&bytes) {
            Decoded::Valid(state) => Some(*state),
            Decoded::Corrupted { .. } => None,
        }
    }
}

/// Reject ids that would escape the store directory or collide with
/// reserved file names.
fn check_id(id: &str) -> Result<(), StoreError> {
    let bad = id.is_empty()
        || id.contains(['/', '\\'])
        || id.starts_with('.')
        || id.ends_with(METRICS_SUFFIX)
        || is_backup_name(id);
    if bad {
        return Err(StoreError::Validation(format!("invalid workflow id: {id:?}")));
    }
    Ok(())
}

impl StateStore for FileStateStore {
    async fn persist(&self, id: &str, state: &WorkflowState) -> Result<WorkflowState, StoreError> {
        check_id(id)?;
        let _guard = self.io_lock.lock().await;
        let path = self.state_path(id);

        let existing = self.read_existing(&path).await;
        let prepared = prepare_for_write(id, state, existing.as_ref())?;
        let text = encode_document(&prepared)?;
        self.write_atomic(&path, &text).await?;

        tracing::debug!(workflow_id = %id, status = %prepared.status, path = %path.display(), "state persisted");
        Ok(prepared)
    }

    async fn recover(&self, id: &str) -> Result<Option<WorkflowState>, StoreError> {
        check_id(id)?;
        let _guard = self.io_lock.lock().await;
        let path = self.state_path(id);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        match decode_document(&bytes) {
            Decoded::Valid(state) => Ok(Some(*state)),
            Decoded::Corrupted { raw, reason } => {
                let backup = self.free_backup_path(id).await;
                tracing::warn!(
                    workflow_id = %id,
                    reason = %reason,
                    backup = %backup.display(),
                    "corrupted state document, backing up"
                );
                let body = serde_json::to_string_pretty(&backup_document(id, &raw, &reason))
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                self.write_atomic(&backup, &body).await?;

                let minimal = WorkflowState::minimal_interrupted(id);
                self.write_atomic(&path, &encode_document(&minimal)?).await?;
                Ok(Some(minimal))
            }
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        check_id(id)?;
        let _guard = self.io_lock.lock().await;
        match tokio::fs::remove_file(self.state_path(id)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let _guard = self.io_lock.lock().await;
        let mut ids: Vec<String> = self
            .json_stems()
            .await?
            .into_iter()
            .filter(|stem| !stem.ends_with(METRICS_SUFFIX) && !is_backup_name(stem))
            .collect();
        ids.sort();
        Ok(ids)
    }
}

impl MetricsStore for FileStateStore {
    async fn load_metrics(&self, id: &str) -> Result<Vec<PerformanceEntry>, StoreError> {
        check_id(id)?;
        let _guard = self.io_lock.lock().await;
        let text = match tokio::fs::read_to_string(self.metrics_path(id)).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_str(&text) {
            Ok(entries) => Ok(entries),
            Err(err) => {
                tracing::warn!(workflow_id = %id, error = %err, "unreadable metrics history, starting fresh");
                Ok(Vec::new())
            }
        }
    }

    async fn save_metrics(&self, id: &str, entries: &[PerformanceEntry]) -> Result<(), StoreError> {
        check_id(id)?;
        let _guard = self.io_lock.lock().await;
        let path = self.metrics_path(id);
        if entries.is_empty() {
            return match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            };
        }
        let text = serde_json::to_string_pretty(entries)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.write_atomic(&path, &text).await
    }

    async fn metrics_ids(&self) -> Result<Vec<String>, StoreError> {
        let _guard = self.io_lock.lock().await;
        let mut ids: Vec<String> = self
            .json_stems()
            .await?
            .into_iter()
            .filter_map(|stem| stem.strip_suffix(METRICS_SUFFIX).map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn metrics_bytes(&self) -> Result<u64, StoreError> {
        let _guard = self.io_lock.lock().await;
        let mut total = 0;
        for stem in self.json_stems().await? {
            if stem.ends_with(METRICS_SUFFIX) {
                let meta = tokio::fs::metadata(self.dir.join(format!("{stem}.json"))).await?;
                total += meta.len();
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crewflow_core::state::StateManager;
    use crewflow_types::state::WorkflowStatus;
    use tempfile::TempDir;

    fn entry(success_rate: f64) -> PerformanceEntry {
        PerformanceEntry {
            timestamp: Utc::now(),
            duration: 2.5,
            success_rate,
            efficiency_score: 90.0,
            bottleneck_count: Some(0),
            compressed: false,
        }
    }

    #[tokio::test]
    async fn persist_writes_pretty_json_at_expected_path() {
        let tmp = TempDir::new().unwrap();
        let store = FileStateStore::new(tmp.path());
        let mut state = WorkflowState::new("wf-1", 3);
        state.status = WorkflowStatus::Running;
        state.mark_step_completed(0);

        store.persist("wf-1", &state).await.unwrap();

        let path = tmp.path().join("workflow_states").join("wf-1.json");
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(text.contains("\n  \"status\": \"running\""));
        assert!(!path.with_extension("tmp").exists());

        let loaded = store.recover("wf-1").await.unwrap().unwrap();
        assert_eq!(loaded.steps_completed, vec![0]);
        assert_eq!(loaded.metadata.workflow_id, "wf-1");
        assert_eq!(loaded.metadata.version, "1.0");
    }

    #[tokio::test]
    async fn persisting_twice_only_moves_metadata() {
        let tmp = TempDir::new().unwrap();
        let store = FileStateStore::new(tmp.path());
        let mut state = WorkflowState::new("wf", 2);
        state.context.insert("k".into(), serde_json::json!([1, 2]));

        let first = store.persist("wf", &state).await.unwrap();
        let second = store.persist("wf", &first).await.unwrap();

        assert_eq!(first.metadata.created_at, second.metadata.created_at);
        assert!(second.metadata.updated_at > first.metadata.updated_at);
        let mut a = serde_json::to_value(&first).unwrap();
        let mut b = serde_json::to_value(&second).unwrap();
        a["metadata"]["updated_at"] = serde_json::Value::Null;
        b["metadata"]["updated_at"] = serde_json::Value::Null;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn invalid_bytes_yield_interrupted_state_and_one_backup() {
        let tmp = TempDir::new().unwrap();
        let store = FileStateStore::open(tmp.path()).await.unwrap();
        tokio::fs::write(store.state_path("wf"), [0xff, 0xfe, b'{', 0x00])
            .await
            .unwrap();

        let state = store.recover("wf").await.unwrap().unwrap();
        assert_eq!(state.status, WorkflowStatus::Interrupted);
        assert!(state.metadata.recovered);
        assert_eq!(state.current_step, "recovery");

        // The replacement document is readable, so no second backup.
        let again = store.recover("wf").await.unwrap().unwrap();
        assert_eq!(again.status, WorkflowStatus::Interrupted);
        let backups = store.backups("wf").await.unwrap();
        assert_eq!(backups.len(), 1);

        let backup: serde_json::Value =
            serde_json::from_str(&tokio::fs::read_to_string(&backups[0]).await.unwrap()).unwrap();
        assert_eq!(backup["workflow_id"], "wf");
        assert!(backup["raw"].is_string());
    }

    #[tokio::test]
    async fn structurally_invalid_document_is_replaced() {
        let tmp = TempDir::new().unwrap();
        let store = FileStateStore::open(tmp.path()).await.unwrap();
        tokio::fs::write(store.state_path("wf"), r#"{"status": "exploded"}"#)
            .await
            .unwrap();

        let state = store.recover("wf").await.unwrap().unwrap();
        assert_eq!(state.status, WorkflowStatus::Interrupted);
        assert_eq!(store.backups("wf").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listing_skips_metrics_and_backups() {
        let tmp = TempDir::new().unwrap();
        let store = FileStateStore::new(tmp.path());
        assert!(store.list_ids().await.unwrap().is_empty());

        for id in ["b", "a"] {
            store.persist(id, &WorkflowState::new(id, 1)).await.unwrap();
        }
        store.save_metrics("a", &[entry(1.0)]).await.unwrap();
        tokio::fs::write(store.state_path("c"), "garbage").await.unwrap();
        store.recover("c").await.unwrap();

        assert_eq!(store.list_ids().await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.metrics_ids().await.unwrap(), vec!["a"]);

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.list_ids().await.unwrap(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn metrics_files_round_trip_and_empty_history_removes_file() {
        let tmp = TempDir::new().unwrap();
        let store = FileStateStore::new(tmp.path());
        assert!(store.load_metrics("wf").await.unwrap().is_empty());

        store.save_metrics("wf", &[entry(1.0), entry(0.5)]).await.unwrap();
        let loaded = store.load_metrics("wf").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].success_rate, 0.5);
        assert!(store.metrics_bytes().await.unwrap() > 0);
        assert!(store.metrics_path("wf").exists());

        store.save_metrics("wf", &[]).await.unwrap();
        assert!(!store.metrics_path("wf").exists());
        assert_eq!(store.metrics_bytes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unsafe_ids_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = FileStateStore::new(tmp.path());
        for id in ["../escape", "a/b", "", ".hidden", "x_metrics"] {
            assert!(matches!(
                store.persist(id, &WorkflowState::new(id, 1)).await,
                Err(StoreError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let tmp = TempDir::new().unwrap();
        let manager = Arc::new(StateManager::new(FileStateStore::new(tmp.path())));
        let mut state = WorkflowState::new("wf", 1);
        state.concurrent_access_count = Some(0);
        manager.persist("wf", &state).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager
                    .update("wf", |s| {
                        s.concurrent_access_count = Some(s.concurrent_access_count.unwrap_or(0) + 1);
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let state = manager.load("wf").await.unwrap().unwrap();
        assert_eq!(state.concurrent_access_count, Some(10));
    }
}
