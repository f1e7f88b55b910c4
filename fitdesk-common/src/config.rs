//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration comes from a small TOML file. Everything in it is
//! optional; when it is missing the compiled defaults apply.
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable `FITDESK_ROOT_FOLDER`
//! 3. `root_folder` key in the TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "FITDESK_ROOT_FOLDER";

/// Default SQLite file name inside the root folder
pub const DEFAULT_DATABASE_FILE: &str = "fitdesk.db";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Database file name, relative to the root folder unless absolute
    #[serde(default)]
    pub database_file: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Tunables for the username index engine
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Canonical usernames shorter than this are skipped by migration
    #[serde(default = "default_min_username_len")]
    pub min_username_len: usize,

    /// Highest numeric suffix tried before falling back to a timestamp
    #[serde(default = "default_suffix_search_limit")]
    pub suffix_search_limit: u32,

    /// Upper bound on documents written in one atomic batch
    #[serde(default = "default_max_batch_ops")]
    pub max_batch_ops: usize,

    /// Sustained write rate for sequential batch runs
    #[serde(default = "default_writes_per_second")]
    pub writes_per_second: u32,

    /// Burst allowance on top of the sustained rate
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_username_len: default_min_username_len(),
            suffix_search_limit: default_suffix_search_limit(),
            max_batch_ops: default_max_batch_ops(),
            writes_per_second: default_writes_per_second(),
            burst: default_burst(),
        }
    }
}

impl EngineConfig {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.min_username_len == 0 {
            return Err(Error::Config("engine.min_username_len must be at least 1".to_string()));
        }
        if self.max_batch_ops < 4 {
            // A duplicate-resolution rename needs up to four documents in one batch
            return Err(Error::Config("engine.max_batch_ops must be at least 4".to_string()));
        }
        if self.writes_per_second == 0 || self.burst == 0 {
            return Err(Error::Config(
                "engine.writes_per_second and engine.burst must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_min_username_len() -> usize {
    3
}

fn default_suffix_search_limit() -> u32 {
    999
}

fn default_max_batch_ops() -> usize {
    20
}

fn default_writes_per_second() -> u32 {
    10
}

fn default_burst() -> u32 {
    1
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    ///
    /// A missing file is not an error: defaults are returned and the caller
    /// reports it once logging is up. An unreadable or malformed file is an
    /// error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Database path, resolved against the root folder
    pub fn database_path(&self, root_folder: &Path) -> PathBuf {
        match &self.database_file {
            Some(file) if file.is_absolute() => file.clone(),
            Some(file) => root_folder.join(file),
            None => root_folder.join(DEFAULT_DATABASE_FILE),
        }
    }
}

/// Default config file location for a module: `<config dir>/fitdesk/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("fitdesk").join(format!("{}.toml", module_name)))
}

/// Resolves the root folder following the documented priority order
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
        }
    }

    /// Resolve the root folder
    pub fn resolve(&self, cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        // Priority 3: TOML config file
        if let Some(path) = &config.root_folder {
            return path.clone();
        }

        // Priority 4: OS-dependent compiled default
        let default = default_root_folder();
        info!(
            module = %self.module_name,
            "No root folder configured, using default {}",
            default.display()
        );
        default
    }
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("fitdesk"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\fitdesk"))
    } else {
        dirs::data_local_dir()
            .map(|d| d.join("fitdesk"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/fitdesk"))
    }
}

/// Create the root folder if needed
pub fn ensure_root_folder(root_folder: &Path) -> Result<()> {
    if !root_folder.exists() {
        std::fs::create_dir_all(root_folder)?;
        info!("Created root folder {}", root_folder.display());
    }
    Ok(())
}
