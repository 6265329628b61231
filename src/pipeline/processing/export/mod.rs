use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::domain::NormalizedRecord;
use crate::error::ExportError;

pub mod registry;
pub mod sinks;

pub use registry::{DispatchReport, ExportTarget, FormatResult, SinkRegistry};
pub use sinks::{CsvSink, JsonSink, SqliteSink};

/// The file a sink produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub format: String,
    pub path: PathBuf,
    pub bytes_written: u64,
}

/// Serializes a normalized record into one output format.
///
/// On error the destination must be left absent or exactly as it was before
/// the call.
pub trait ExportSink: Send + Sync {
    fn format(&self) -> &str;

    /// File extension (without the dot) for destinations of this format.
    fn extension(&self) -> &str;

    fn export(&self, record: &NormalizedRecord, destination: &Path) -> Result<Artifact, ExportError>;
}

/// Create the parent of `destination` and return it. A destination that is
/// itself a directory can never be replaced by a file.
pub(crate) fn prepare_destination(destination: &Path) -> Result<PathBuf, ExportError> {
    let unwritable = |reason: String| ExportError::DestinationUnwritable {
        destination: destination.to_path_buf(),
        reason,
    };

    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| unwritable(e.to_string()))?;
    if destination.is_dir() {
        return Err(unwritable("destination is a directory".to_string()));
    }
    Ok(dir)
}

/// A uniquely named temp file in `dir`, deleted on drop unless persisted.
/// Concurrent writers of the same destination each get their own.
pub(crate) fn temp_file_for(destination: &Path, dir: &Path) -> Result<NamedTempFile, ExportError> {
    let prefix = format!(
        ".{}.",
        destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| ExportError::DestinationUnwritable {
            destination: destination.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Move a completed temp file into place. On failure the temp file is
/// dropped, which removes it.
pub(crate) fn persist_temp(tmp: NamedTempFile, destination: &Path) -> Result<(), ExportError> {
    tmp.persist(destination)
        .map(|_| ())
        .map_err(|e| ExportError::PartialWriteAborted {
            destination: destination.to_path_buf(),
            reason: e.error.to_string(),
        })
}

/// Write `data` to `destination` via a temp file, fsync and rename.
///
/// `destination` is either the complete new content or untouched, and no
/// temp file outlives the call.
pub fn atomic_write(destination: &Path, data: &[u8]) -> Result<u64, ExportError> {
    let dir = prepare_destination(destination)?;
    let mut tmp = temp_file_for(destination, &dir)?;

    tmp.write_all(data)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| ExportError::PartialWriteAborted {
            destination: destination.to_path_buf(),
            reason: e.to_string(),
        })?;

    persist_temp(tmp, destination)?;
    Ok(data.len() as u64)
}
