//! Rules for writing and reading workflow state documents.
//!
//! Every store implementation funnels writes through [`prepare_for_write`]
//! and [`encode_document`], and reads through [`decode_document`], so default
//! filling, metadata enrichment, counter merging and corruption handling
//! behave identically regardless of the backend.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use crewflow_types::state::{STATE_VERSION, WorkflowState, WorkflowStatus};
use serde::Serialize;
use serde_json::{Map, Value, json};

use super::StoreError;

/// Placeholder written when a state has no current step.
pub const UNKNOWN_STEP: &str = "unknown";

// ---------------------------------------------------------------------------
// Write path
// ---------------------------------------------------------------------------

/// Fill required defaults, enrich metadata, merge monotonic counters and
/// validate `state` for storage under `id`.
///
/// `existing` is the document currently stored, read under the store-wide
/// lock. When both it and the incoming state carry a
/// `concurrent_access_count`, the stored value becomes
/// `max(incoming, existing + 1)`.
pub fn prepare_for_write(
    id: &str,
    state: &WorkflowState,
    existing: Option<&WorkflowState>,
) -> Result<WorkflowState, StoreError> {
    let mut state = state.clone();
    let now = Utc::now();

    state.id = id.to_string();
    if state.current_step.trim().is_empty() {
        state.current_step = UNKNOWN_STEP.to_string();
    }
    state.steps_completed.sort_unstable();
    state.steps_completed.dedup();

    if let (Some(existing), Some(incoming)) = (existing, state.concurrent_access_count) {
        let floor = existing.concurrent_access_count.unwrap_or(0) + 1;
        state.concurrent_access_count = Some(incoming.max(floor));
    }

    let created_at = existing
        .and_then(|e| e.metadata.created_at)
        .or(state.metadata.created_at)
        .unwrap_or(now);
    state.metadata.workflow_id = id.to_string();
    state.metadata.created_at = Some(created_at);
    state.metadata.updated_at = Some(monotonic_now(now, existing));
    state.metadata.version = STATE_VERSION.to_string();

    validate_state(&state)?;
    Ok(state)
}

/// Never stamp an update earlier than the previous one.
fn monotonic_now(now: DateTime<Utc>, existing: Option<&WorkflowState>) -> DateTime<Utc> {
    match existing.and_then(|e| e.metadata.updated_at) {
        Some(previous) if previous >= now => previous + chrono::Duration::microseconds(1),
        _ => now,
    }
}

/// Schema checks applied to every typed state before it is written.
pub fn validate_state(state: &WorkflowState) -> Result<(), StoreError> {
    if state.id.is_empty() {
        return Err(StoreError::Validation("workflow id must not be empty".to_string()));
    }
    if state.current_step.is_empty() {
        return Err(StoreError::Validation("current_step must be set".to_string()));
    }
    if state.metadata.workflow_id != state.id {
        return Err(StoreError::Validation(format!(
            "metadata.workflow_id '{}' does not match id '{}'",
            state.metadata.workflow_id, state.id
        )));
    }
    if state.metadata.version.is_empty() || state.metadata.updated_at.is_none() {
        return Err(StoreError::Validation("metadata is incomplete".to_string()));
    }
    if state.total_steps > 0 {
        if let Some(out_of_range) = state
            .steps_completed
            .iter()
            .find(|&&i| i >= state.total_steps)
        {
            return Err(StoreError::Validation(format!(
                "completed step {out_of_range} is outside 0..{}",
                state.total_steps
            )));
        }
    }
    Ok(())
}

/// Encode a prepared state as a pretty-printed JSON document.
///
/// Falls back to a sanitized document if any nested value refuses to
/// serialize, so a write always succeeds in degraded form.
pub fn encode_document(state: &WorkflowState) -> Result<String, StoreError> {
    let document = match serde_json::to_value(state) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(
                workflow_id = %state.id,
                error = %err,
                "state serialization failed, writing sanitized document"
            );
            sanitized_document(state)
        }
    };
    serde_json::to_string_pretty(&document).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Serialize `value`, replacing it with its debug string if serialization fails.
pub fn sanitize<T: Serialize + Debug + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| Value::String(format!("{value:?}")))
}

/// Serialize each element of a sequence on its own.
fn sanitize_seq<'a, T, I>(items: I) -> Value
where
    T: Serialize + Debug + 'a,
    I: IntoIterator<Item = &'a T>,
{
    Value::Array(items.into_iter().map(sanitize).collect())
}

/// Field-by-field rendering of a state where every failing piece degrades
/// to its string form instead of aborting the write.
pub fn sanitized_document(state: &WorkflowState) -> Value {
    let mut doc = Map::new();
    doc.insert("id".into(), sanitize(&state.id));
    doc.insert("status".into(), sanitize(&state.status));
    doc.insert("current_step".into(), sanitize(&state.current_step));
    doc.insert("steps_completed".into(), sanitize(&state.steps_completed));
    doc.insert("total_steps".into(), sanitize(&state.total_steps));
    doc.insert("cursor".into(), sanitize(&state.cursor));
    doc.insert("checkpoints".into(), sanitize_seq(&state.checkpoints));
    doc.insert("agent_handoffs".into(), sanitize_seq(&state.agent_handoffs));
    doc.insert("agent_dependencies".into(), sanitize(&state.agent_dependencies));
    doc.insert("execution_timeline".into(), sanitize_seq(&state.execution_timeline));
    doc.insert("progress".into(), sanitize(&state.progress));
    let results: Map<String, Value> = state
        .task_results
        .iter()
        .map(|(index, result)| (index.to_string(), sanitize(result)))
        .collect();
    doc.insert("task_results".into(), Value::Object(results));
    let context: Map<String, Value> = state
        .context
        .iter()
        .map(|(key, value)| (key.clone(), sanitize(value)))
        .collect();
    doc.insert("context".into(), Value::Object(context));
    if let Some(count) = state.concurrent_access_count {
        doc.insert("concurrent_access_count".into(), json!(count));
    }
    if let Some(reason) = &state.interruption_reason {
        doc.insert("interruption_reason".into(), sanitize(reason));
    }
    doc.insert("recovery_options".into(), sanitize_seq(&state.recovery_options));
    if let Some(error) = &state.error {
        doc.insert("error".into(), sanitize(error));
    }
    doc.insert("metadata".into(), sanitize(&state.metadata));
    Value::Object(doc)
}

// ---------------------------------------------------------------------------
// Read path
// ---------------------------------------------------------------------------

/// Outcome of decoding stored bytes.
#[derive(Debug)]
pub enum Decoded {
    Valid(Box<WorkflowState>),
    /// Content that must be backed up and replaced.
    Corrupted { raw: String, reason: String },
}

/// Parse stored bytes into a state, classifying anything unusable as corrupted.
pub fn decode_document(bytes: &[u8]) -> Decoded {
    let raw = String::from_utf8_lossy(bytes).into_owned();

    let value: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            return Decoded::Corrupted {
                reason: format!("invalid JSON: {err}"),
                raw,
            };
        }
    };

    if !validate_structure(&value) {
        return Decoded::Corrupted {
            reason: "invalid state structure".to_string(),
            raw,
        };
    }

    match serde_json::from_value::<WorkflowState>(value) {
        Ok(state) => Decoded::Valid(Box::new(state)),
        Err(err) => Decoded::Corrupted {
            reason: format!("schema mismatch: {err}"),
            raw,
        },
    }
}

/// Check required top-level and metadata fields and that `status` is a
/// recognized value.
pub fn validate_structure(document: &Value) -> bool {
    let Some(doc) = document.as_object() else {
        return false;
    };

    let status_ok = doc
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|s| s.parse::<WorkflowStatus>().is_ok());
    let step_ok = doc.get("current_step").is_some_and(Value::is_string);
    let steps_ok = doc.get("steps_completed").is_some_and(Value::is_array);

    let metadata_ok = doc
        .get("metadata")
        .and_then(Value::as_object)
        .is_some_and(|meta| {
            meta.get("workflow_id").is_some_and(Value::is_string)
                && meta.get("updated_at").is_some_and(Value::is_string)
                && meta.get("version").is_some_and(Value::is_string)
        });

    status_ok && step_ok && steps_ok && metadata_ok
}

/// Body of a diagnostic backup for unreadable content.
pub fn backup_document(id: &str, raw: &str, reason: &str) -> Value {
    json!({
        "workflow_id": id,
        "reason": reason,
        "detected_at": Utc::now().to_rfc3339(),
        "raw": raw,
    })
}

/// Backup file stem: `{id}_corrupted_{YYYYMMDD_HHMMSS}`.
pub fn backup_name(id: &str, at: DateTime<Utc>) -> String {
    format!("{id}_corrupted_{}", at.format("%Y%m%d_%H%M%S"))
}

/// Whether a stored name belongs to a diagnostic backup.
pub fn is_backup_name(name: &str) -> bool {
    name.contains("_corrupted_")
}
