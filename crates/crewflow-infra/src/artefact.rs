//! Filesystem artefact generator.
//!
//! Writes rendered artefacts to `{root}/{artefact_type}/{name}.md`. The name
//! comes from the `name` param when present, otherwise
//! `{workflow_id}_task_{task_index}`.

use std::path::{Path, PathBuf};

use crewflow_core::engine::ArtefactGenerator;
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct FsArtefactGenerator {
    root: PathBuf,
}

impl FsArtefactGenerator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Target path for an artefact, or `None` when a path component is unsafe.
    pub fn artefact_path(
        &self,
        artefact_type: &str,
        context: &Map<String, Value>,
        params: &Map<String, Value>,
    ) -> Option<PathBuf> {
        let name = match params.get("name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => {
                let workflow = context.get("workflow_id").and_then(Value::as_str)?;
                let index = context.get("task_index").and_then(Value::as_str)?;
                format!("{workflow}_task_{index}")
            }
        };
        if !safe_component(artefact_type) || !safe_component(&name) {
            return None;
        }
        Some(self.root.join(artefact_type).join(format!("{name}.md")))
    }
}

fn safe_component(part: &str) -> bool {
    !part.is_empty() && part != "." && part != ".." && !part.contains(['/', '\\'])
}

impl ArtefactGenerator for FsArtefactGenerator {
    fn generate(
        &self,
        content: &str,
        artefact_type: &str,
        context: &Map<String, Value>,
        params: &Map<String, Value>,
    ) -> bool {
        let Some(path) = self.artefact_path(artefact_type, context, params) else {
            tracing::warn!(artefact_type, "refusing to write artefact with unsafe name");
            return false;
        };

        let written = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| std::fs::write(&path, content));
        match written {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "artefact written");
                true
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to write artefact");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn context() -> Map<String, Value> {
        json!({"workflow_id": "wf-1", "task_index": "2"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn writes_under_type_directory() {
        let tmp = TempDir::new().unwrap();
        let generator = FsArtefactGenerator::new(tmp.path());

        assert!(generator.generate("# PRD", "prd", &context(), &Map::new()));
        let path = tmp.path().join("prd").join("wf-1_task_2.md");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# PRD");

        let params = json!({"name": "architecture"}).as_object().cloned().unwrap();
        assert!(generator.generate("body", "docs", &context(), &params));
        assert!(tmp.path().join("docs").join("architecture.md").exists());
    }

    #[test]
    fn unsafe_names_are_refused() {
        let tmp = TempDir::new().unwrap();
        let generator = FsArtefactGenerator::new(tmp.path());
        let params = json!({"name": "../escape"}).as_object().cloned().unwrap();

        assert!(!generator.generate("x", "prd", &context(), &params));
        assert!(!generator.generate("x", "..", &context(), &Map::new()));
        assert!(!generator.generate("x", "prd", &Map::new(), &Map::new()));
    }
}
