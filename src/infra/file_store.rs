use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::ports::{FileStorePort, Locator, SaveData};
use crate::config::AppConfig;
use crate::error::{ConfigError, FileStoreError, StoreResult};

/// How a file's contents are read and written, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileHandler {
    Text,
    Json,
}

const HANDLERS: [(&str, FileHandler); 4] = [
    ("evn", FileHandler::Text),
    ("json", FileHandler::Json),
    ("log", FileHandler::Text),
    ("txt", FileHandler::Text),
];

impl FileHandler {
    fn for_path(path: &Path) -> StoreResult<Self> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        HANDLERS
            .iter()
            .find(|(ext, _)| *ext == extension)
            .map(|(_, handler)| *handler)
            .ok_or_else(|| FileStoreError::UnsupportedFileType {
                extension: format!(".{}", extension),
                supported: HANDLERS
                    .iter()
                    .map(|(ext, _)| format!(".{}", ext))
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    fn name(self) -> &'static str {
        match self {
            FileHandler::Text => "text",
            FileHandler::Json => "json",
        }
    }
}

/// Filesystem-backed file access rooted at the configured directories.
pub struct FsFileStore {
    config: Arc<AppConfig>,
}

impl FsFileStore {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }

    pub fn resolve(&self, locator: &Locator) -> StoreResult<PathBuf> {
        match locator {
            Locator::Keyed { dir_key, file_name } => {
                let base = self.config.get_path(dir_key).map_err(|e| match e {
                    ConfigError::UnknownPathKey(key) => FileStoreError::InvalidConfigKey(key),
                    other => FileStoreError::InvalidConfigKey(other.to_string()),
                })?;
                Ok(base.join(file_name))
            }
            Locator::Path(path) => Ok(path.clone()),
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> FileStoreError {
    if source.kind() == ErrorKind::NotFound {
        FileStoreError::NotFound(path.to_path_buf())
    } else {
        FileStoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
impl FileStorePort for FsFileStore {
    async fn load_text(&self, locator: &Locator) -> StoreResult<String> {
        let path = self.resolve(locator)?;
        let handler = FileHandler::for_path(&path)?;

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            warn!("Failed to load file {}: {}", path.display(), e);
            io_error(&path, e)
        })?;

        let text = match handler {
            FileHandler::Text => content,
            FileHandler::Json => {
                let value: serde_json::Value = serde_json::from_str(&content).map_err(|source| FileStoreError::Json {
                    path: path.clone(),
                    source,
                })?;
                value.to_string()
            }
        };
        info!("Loaded file: {}", path.display());
        Ok(text)
    }

    async fn save(&self, data: &SaveData, locator: &Locator, overwrite: bool) -> StoreResult<PathBuf> {
        let path = self.resolve(locator)?;

        if !overwrite && tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!("File exists and overwrite is false: {}", path.display());
            return Err(FileStoreError::AlreadyExists(path));
        }

        let handler = FileHandler::for_path(&path)?;
        let bytes = match (handler, data) {
            (FileHandler::Text, SaveData::Text(text)) => text.clone().into_bytes(),
            (FileHandler::Json, SaveData::Json(value)) => {
                serde_json::to_vec_pretty(value).map_err(|source| FileStoreError::Json {
                    path: path.clone(),
                    source,
                })?
            }
            (handler, SaveData::Text(_)) => {
                return Err(FileStoreError::WrongDataShape { handler: handler.name(), found: "text" })
            }
            (handler, SaveData::Json(_)) => {
                return Err(FileStoreError::WrongDataShape { handler: handler.name(), found: "json" })
            }
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| io_error(parent, e))?;
        }
        tokio::fs::write(&path, bytes).await.map_err(|e| io_error(&path, e))?;
        info!("Saved file: {}", path.display());
        Ok(path)
    }
}
