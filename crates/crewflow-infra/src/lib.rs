//! Infrastructure layer for crewflow.
//!
//! Implements the ports defined in `crewflow-core` against the local
//! filesystem: the JSON state and metrics store, configuration loading and
//! the artefact generator.

pub mod artefact;
pub mod config;
pub mod store;

pub use artefact::FsArtefactGenerator;
pub use config::{ConfigError, load_config, resolve_data_dir};
pub use store::FileStateStore;
