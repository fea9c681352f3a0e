//! Configuration loading and root folder resolution
//!
//! Root folder priority:
//! 1. Command-line argument (highest priority)
//! 2. `LINGO_ROOT_FOLDER` environment variable
//! 3. `LINGO_ROOT` environment variable
//! 4. `root_folder` in the TOML config file
//! 5. OS-dependent compiled default
//!
//! A missing or unreadable TOML file is not fatal: defaults are used and a
//! warning is logged.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::retry::DEFAULT_MAX_LOCK_WAIT_MS;
use crate::sync::ConflictPolicy;
use crate::{Error, Result};

const APP_DIR: &str = "lingo";
const LOCAL_DB_FILE: &str = "projects.db";
const SHARED_DB_FILE: &str = "shared.db";

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    /// Absent means machine translation is disabled
    pub translator: Option<TranslatorConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
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

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// Total time to keep retrying a locked database
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
    /// Shared database location; defaults to `shared.db` in the root folder
    pub shared_database: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            lock_wait_ms: default_lock_wait_ms(),
            shared_database: None,
        }
    }
}

fn default_lock_wait_ms() -> u64 {
    DEFAULT_MAX_LOCK_WAIT_MS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatorConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    #[serde(default = "default_translator_timeout")]
    pub timeout_secs: u64,
}

fn default_translator_timeout() -> u64 {
    30
}

impl TomlConfig {
    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load a config file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from the platform config location, falling back to defaults on
    /// any error
    pub fn load_default() -> Self {
        match default_config_path() {
            Some(path) => Self::load(&path).unwrap_or_else(|e| {
                warn!("Ignoring config file {}: {}", path.display(), e);
                Self::default()
            }),
            None => {
                warn!("Could not determine config directory, using defaults");
                Self::default()
            }
        }
    }
}

/// `~/.config/lingo/config.toml` or the platform equivalent
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

/// OS-dependent fallback values
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let root_folder = dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("./lingo_data"));
        Self {
            root_folder,
            log_level: default_log_level(),
        }
    }
}

/// Resolves the profile's data folder
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new() -> Self {
        Self {
            cli_arg: None,
            toml_root: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }
        for var in ["LINGO_ROOT_FOLDER", "LINGO_ROOT"] {
            if let Ok(path) = std::env::var(var) {
                if !path.trim().is_empty() {
                    return PathBuf::from(path);
                }
            }
        }
        if let Some(path) = &self.toml_root {
            return path.clone();
        }
        CompiledDefaults::for_current_platform().root_folder
    }
}

impl Default for RootFolderResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates the root folder and names the database files inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Local project store database
    pub fn local_database_path(&self) -> PathBuf {
        self.root_folder.join(LOCAL_DB_FILE)
    }

    /// Shared store database unless configured elsewhere
    pub fn shared_database_path(&self, config: &SyncConfig) -> PathBuf {
        config
            .shared_database
            .clone()
            .unwrap_or_else(|| self.root_folder.join(SHARED_DB_FILE))
    }
}
