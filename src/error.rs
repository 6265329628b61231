use std::path::PathBuf;
use thiserror::Error;

use crate::domain::PayloadKind;

/// A single transform stage could not produce output from its input.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("stage '{stage_name}' failed: {reason} (at {offending_fragment:?})")]
pub struct StageError {
    pub stage_name: String,
    pub reason: String,
    pub offending_fragment: String,
}

impl StageError {
    pub fn new(stage_name: impl Into<String>, reason: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            reason: reason.into(),
            offending_fragment: fragment.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("pipeline aborted at stage {failed_stage_index} ('{failed_stage_name}'): {cause}")]
    Stage {
        failed_stage_index: usize,
        failed_stage_name: String,
        cause: StageError,
    },

    #[error("stage {index} ('{stage}') cannot accept {found:?} input")]
    IncompatibleStage {
        index: usize,
        stage: String,
        found: PayloadKind,
    },

    #[error("pipeline finished on {found:?} input; a normalized record was expected ({stage_count} stages registered)")]
    Unshaped { found: PayloadKind, stage_count: usize },

    #[error("pipeline cancelled before stage {index}")]
    Cancelled { index: usize },
}

impl PipelineError {
    /// Name of the stage the pipeline died in, when there is one.
    pub fn stage_name(&self) -> Option<&str> {
        match self {
            PipelineError::Stage { failed_stage_name, .. } => Some(failed_stage_name),
            PipelineError::IncompatibleStage { stage, .. } => Some(stage),
            PipelineError::Unshaped { .. } | PipelineError::Cancelled { .. } => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExportError {
    #[error("destination {destination:?} is not writable: {reason}")]
    DestinationUnwritable { destination: PathBuf, reason: String },

    #[error("{format} serialization failed: {reason}")]
    SerializationFailure { format: String, reason: String },

    #[error("write to {destination:?} aborted: {reason}")]
    PartialWriteAborted { destination: PathBuf, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("no sink registered for format '{format}'")]
    UnregisteredSink { format: String },

    #[error("export of '{format}' cancelled before it started")]
    Cancelled { format: String },

    #[error(transparent)]
    Export(#[from] ExportError),
}

#[derive(Error, Debug)]
pub enum FileStoreError {
    #[error("file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported file type {extension:?}; supported: {supported}")]
    UnsupportedFileType { extension: String, supported: String },

    #[error("{0:?} already exists and overwrite is false")]
    AlreadyExists(PathBuf),

    #[error("invalid path key: '{0}'")]
    InvalidConfigKey(String),

    #[error("JSON error on {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{handler} handler cannot save {found} data")]
    WrongDataShape { handler: &'static str, found: &'static str },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing configuration file: {0:?}")]
    NotFound(PathBuf),

    #[error("failed to read configuration {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization failed: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot create directory {path:?} for '{key}': {source}")]
    InvalidPath {
        key: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid path key: '{0}'")]
    UnknownPathKey(String),

    #[error("configuration has not been installed")]
    NotInitialized,
}

/// Errors surfaced by a flow run. Cloned into the outcome, so sources are
/// flattened to strings where the underlying error is not `Clone`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    #[error("source {locator} unavailable: {reason}")]
    SourceUnavailable { locator: String, reason: String },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("export '{format}' failed: {source}")]
    Dispatch {
        format: String,
        #[source]
        source: DispatchError,
    },

    #[error("{phase} phase aborted: {reason}")]
    Aborted {
        phase: crate::pipeline::orchestrator::Phase,
        reason: String,
    },

    #[error("run cancelled before {phase}")]
    Cancelled { phase: crate::pipeline::orchestrator::Phase },

    #[error("provenance recording failed: {0}")]
    Provenance(String),
}

pub type StoreResult<T> = std::result::Result<T, FileStoreError>;
