use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::app::ports::{ProvenanceEntry, ProvenancePort};

/// Appends one JSON line per run to a ledger file.
pub struct JsonlProvenanceRecorder {
    path: PathBuf,
}

impl JsonlProvenanceRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl ProvenancePort for JsonlProvenanceRecorder {
    async fn record(&self, entry: &ProvenanceEntry) -> Result<(), String> {
        let mut line = serde_json::to_string(entry).map_err(|e| e.to_string())?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| e.to_string())?;
        file.write_all(line.as_bytes()).await.map_err(|e| e.to_string())?;
        file.flush().await.map_err(|e| e.to_string())?;
        debug!("Recorded provenance for run {} in {}", entry.run_id, self.path.display());
        Ok(())
    }
}

/// Keeps entries in memory; useful in tests and dry runs.
#[derive(Default)]
pub struct InMemoryProvenanceRecorder {
    entries: Mutex<Vec<ProvenanceEntry>>,
}

impl InMemoryProvenanceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ProvenanceEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ProvenancePort for InMemoryProvenanceRecorder {
    async fn record(&self, entry: &ProvenanceEntry) -> Result<(), String> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry.clone());
        Ok(())
    }
}
