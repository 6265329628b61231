use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::FileStoreError;

/// Names a file either relative to a configured directory or by path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locator {
    Keyed { dir_key: String, file_name: String },
    Path(PathBuf),
}

impl Locator {
    pub fn keyed(dir_key: impl Into<String>, file_name: impl Into<String>) -> Self {
        Locator::Keyed {
            dir_key: dir_key.into(),
            file_name: file_name.into(),
        }
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Locator::Path(path.into())
    }

    /// File name without extension, used to name export artifacts.
    pub fn stem(&self) -> String {
        let file = match self {
            Locator::Keyed { file_name, .. } => Path::new(file_name),
            Locator::Path(path) => path.as_path(),
        };
        file.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "record".to_string())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Keyed { dir_key, file_name } => write!(f, "{}/{}", dir_key, file_name),
            Locator::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Data accepted by [`FileStorePort::save`].
#[derive(Debug, Clone, PartialEq)]
pub enum SaveData {
    Text(String),
    Json(serde_json::Value),
}

#[async_trait]
pub trait FileStorePort: Send + Sync {
    async fn load_text(&self, locator: &Locator) -> Result<String, FileStoreError>;

    async fn save(&self, data: &SaveData, locator: &Locator, overwrite: bool) -> Result<PathBuf, FileStoreError>;
}

/// What produced a set of artifacts, appended after each successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub run_id: String,
    pub app_name: String,
    pub app_version: String,
    pub source: String,
    pub stages: Vec<String>,
    pub record_sha256: String,
    pub artifacts: Vec<PathBuf>,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait ProvenancePort: Send + Sync {
    async fn record(&self, entry: &ProvenanceEntry) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stem_and_display() {
        let keyed = Locator::keyed("raw_data_dir", "e1.txt");
        assert_eq!(keyed.stem(), "e1");
        assert_eq!(keyed.to_string(), "raw_data_dir/e1.txt");

        let path = Locator::path("/tmp/logs/game-7.log");
        assert_eq!(path.stem(), "game-7");
        assert_eq!(Locator::path("/").stem(), "record");
    }
}
