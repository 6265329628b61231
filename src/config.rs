use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::error::ConfigError;

const ENV_PREFIX: &str = "DIAMOND_";
const ENV_LOG_LEVEL: &str = "DIAMOND_LOG_LEVEL";

#[derive(Debug, Clone, Deserialize)]
pub struct AppMetadata {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file_name: String,
    #[serde(default = "default_json")]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "diamond_parser.log".to_string()
}

fn default_json() -> bool {
    true
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_name: default_log_file(),
            json: default_json(),
        }
    }
}

/// Raw shape of `settings.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub app: AppMetadata,
    #[serde(default)]
    pub paths: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Resolved application configuration: metadata plus absolute, existing
/// directories keyed by name.
#[derive(Debug, Clone)]
pub struct AppConfig {
    app: AppMetadata,
    logging: LoggingSettings,
    paths: BTreeMap<String, PathBuf>,
}

impl AppConfig {
    /// Load settings from a TOML file, applying `DIAMOND_*` environment
    /// overrides. Relative paths resolve against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_with_overrides(path, std::env::vars())
    }

    pub fn load_with_overrides<I>(path: impl AsRef<Path>, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings: Settings = toml::from_str(&content)?;
        apply_overrides(&mut settings, vars);

        let root = path.parent().unwrap_or(Path::new("."));
        Self::from_settings(settings, root)
    }

    /// Resolve and create every configured directory under `root`.
    pub fn from_settings(settings: Settings, root: &Path) -> Result<Self, ConfigError> {
        let mut paths = BTreeMap::new();
        for (key, value) in settings.paths {
            let resolved = if value.is_absolute() { value } else { root.join(value) };
            fs::create_dir_all(&resolved).map_err(|source| ConfigError::InvalidPath {
                key: key.clone(),
                path: resolved.clone(),
                source,
            })?;
            debug!("Resolved path {} -> {}", key, resolved.display());
            paths.insert(key, resolved);
        }

        Ok(Self {
            app: settings.app,
            logging: settings.logging,
            paths,
        })
    }

    pub fn app_name(&self) -> &str {
        &self.app.name
    }

    pub fn app_version(&self) -> &str {
        &self.app.version
    }

    pub fn logging(&self) -> &LoggingSettings {
        &self.logging
    }

    pub fn paths(&self) -> &BTreeMap<String, PathBuf> {
        &self.paths
    }

    pub fn get_path(&self, key: &str) -> Result<&Path, ConfigError> {
        self.paths
            .get(key)
            .map(PathBuf::as_path)
            .ok_or_else(|| ConfigError::UnknownPathKey(key.to_string()))
    }
}

fn apply_overrides<I>(settings: &mut Settings, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (name, value) in vars {
        if name == ENV_LOG_LEVEL {
            settings.logging.level = value;
            continue;
        }
        let Some(suffix) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let key = suffix.to_lowercase();
        if let Some(slot) = settings.paths.get_mut(&key) {
            *slot = PathBuf::from(value);
        }
    }
}

static CURRENT: Lazy<RwLock<Option<Arc<AppConfig>>>> = Lazy::new(|| RwLock::new(None));

/// Install the process-wide configuration. Call once at startup.
pub fn install(config: AppConfig) -> Arc<AppConfig> {
    let config = Arc::new(config);
    let mut slot = CURRENT.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = Some(config.clone());
    info!("Configuration installed for {} v{}", config.app_name(), config.app_version());
    config
}

pub fn current() -> Result<Arc<AppConfig>, ConfigError> {
    CURRENT
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
        .ok_or(ConfigError::NotInitialized)
}

/// Drop the installed configuration. Intended for tests.
pub fn reset() {
    let mut slot = CURRENT.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = None;
}
