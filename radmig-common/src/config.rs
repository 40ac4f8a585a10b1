//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable consulted for the data root
pub const ROOT_ENV_VAR: &str = "RADMIG_ROOT";

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Data root (database, blob store, scratch space)
    pub root_folder: Option<PathBuf>,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub ingestion: IngestionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// File name of the SQLite database, relative to the root folder
    pub file_name: String,
    /// Maximum time a job write retries on "database is locked"
    pub max_lock_wait_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            file_name: "radmig.db".to_string(),
            max_lock_wait_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Blob store directory, relative to the root folder unless absolute
    pub media_dir: PathBuf,
    /// Scratch directory for archive extraction
    pub scratch_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            media_dir: PathBuf::from("media"),
            scratch_dir: PathBuf::from("scratch"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Concurrent media downloads (clamped to 1..=12)
    pub concurrency: usize,
    /// Per-fetch timeout for source calls
    pub fetch_timeout_secs: u64,
    /// Bounded progress queue between a run and its persister
    pub progress_queue_capacity: usize,
    /// Recent progress steps retained for replay
    pub progress_history: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            concurrency: 12,
            fetch_timeout_secs: 30,
            progress_queue_capacity: 64,
            progress_history: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing filter directive used when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Load a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Write a TOML config file, creating parent directories as needed
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Load the config from an explicit path, else the platform default location,
/// else built-in defaults
pub fn load_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = explicit {
        return load_toml_config(path);
    }
    match default_config_file() {
        Some(path) if path.exists() => load_toml_config(&path),
        _ => Ok(TomlConfig::default()),
    }
}

/// Root folder resolution priority:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&str>,
    env_var_name: &str,
    config: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(root) = &config.root_folder {
        return root.clone();
    }

    default_root_folder()
}

/// Resolve `path` against `root` unless it is already absolute
pub fn under_root(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// `<config dir>/radmig/config.toml`, or `/etc/radmig/config.toml` on Linux when
/// no user file exists
pub fn default_config_file() -> Option<PathBuf> {
    let user = dirs::config_dir().map(|d| d.join("radmig").join("config.toml"));
    if cfg!(target_os = "linux") {
        if let Some(path) = &user {
            if path.exists() {
                return user;
            }
        }
        return Some(PathBuf::from("/etc/radmig/config.toml"));
    }
    user
}

fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("radmig"))
        .unwrap_or_else(|| PathBuf::from("./radmig_data"))
}
