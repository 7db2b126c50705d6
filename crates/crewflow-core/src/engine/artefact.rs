//! Post-success artefact hook.
//!
//! The engine renders the task's content template and hands it to an
//! [`ArtefactGenerator`]. The hook reports an outcome but never fails the
//! task.

use chrono::{DateTime, Utc};
use crewflow_types::task::{ArtefactOutcome, OutputSpec};
use serde_json::{Map, Value, json};

/// Collaborator that turns rendered content into a stored artefact.
pub trait ArtefactGenerator: Send + Sync {
    /// Store `content` as an artefact of `artefact_type`. Returns `false`
    /// when nothing was written.
    fn generate(
        &self,
        content: &str,
        artefact_type: &str,
        context: &Map<String, Value>,
        params: &Map<String, Value>,
    ) -> bool;
}

/// Values substituted into a content template.
#[derive(Debug, Clone)]
pub struct Placeholders<'a> {
    pub workflow_id: &'a str,
    pub task_index: usize,
    pub agent: &'a str,
    pub timestamp: DateTime<Utc>,
    pub status: &'a str,
    pub message: String,
}

impl Placeholders<'_> {
    fn pairs(&self) -> [(&'static str, String); 6] {
        [
            ("workflow_id", self.workflow_id.to_string()),
            ("task_index", self.task_index.to_string()),
            ("agent", self.agent.to_string()),
            ("timestamp", self.timestamp.to_rfc3339()),
            ("status", self.status.to_string()),
            ("message", self.message.clone()),
        ]
    }

    /// Context map passed to the generator.
    pub fn to_context(&self) -> Map<String, Value> {
        self.pairs()
            .into_iter()
            .map(|(key, value)| (key.to_string(), Value::String(value)))
            .collect()
    }
}

/// Body used when the output spec has no content template.
pub const DEFAULT_CONTENT: &str = "# {artefact_type}\n\n\
Workflow: {workflow_id}\n\
Task: {task_index}\n\
Agent: {agent}\n\
Status: {status}\n\
Generated: {timestamp}\n\n\
{message}\n";

/// Substitute `{name}` placeholders. Unknown placeholders are left as is.
pub fn render(template: &str, values: &Placeholders<'_>, artefact_type: &str) -> String {
    let mut content = template.replace("{artefact_type}", artefact_type);
    for (key, value) in values.pairs() {
        content = content.replace(&format!("{{{key}}}"), &value);
    }
    content
}

/// Message placeholder derived from a task output.
pub fn message_from_output(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("message").or_else(|| map.get("result")) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => output.to_string(),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Run the hook for one successful task.
///
/// Returns the outcome and the artefact types that were produced.
pub fn run_hook(
    generator: Option<&dyn ArtefactGenerator>,
    spec: &OutputSpec,
    values: &Placeholders<'_>,
) -> (ArtefactOutcome, Vec<String>) {
    let Some(generator) = generator else {
        return (ArtefactOutcome::Skipped, Vec::new());
    };

    let template = spec.content_template.as_deref().unwrap_or(DEFAULT_CONTENT);
    let content = render(template, values, &spec.artefact_type);
    let mut context = values.to_context();
    context.insert("artefact_type".into(), json!(spec.artefact_type));

    if generator.generate(&content, &spec.artefact_type, &context, &spec.params) {
        tracing::debug!(
            workflow_id = %values.workflow_id,
            task_index = values.task_index,
            artefact_type = %spec.artefact_type,
            "artefact generated"
        );
        (ArtefactOutcome::Generated, vec![spec.artefact_type.clone()])
    } else {
        tracing::warn!(
            workflow_id = %values.workflow_id,
            task_index = values.task_index,
            artefact_type = %spec.artefact_type,
            "artefact generation failed"
        );
        (ArtefactOutcome::Failed, Vec::new())
    }
}
