//! Persistent configuration for the `caravel` CLI
//!
//! Settings live in a TOML file under the platform config directory. The
//! per-branch install state (version stamp, HD content flag) is persisted
//! here too; [`SettingsHooks`] exposes it to the orchestrator through the
//! [`LauncherHooks`] trait.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use caravel_sync::{LauncherHooks, SyncConfig};
use caravel_transfer::TransferOptions;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("TOML deserialization error: {0}")]
    TomlDeserialize(#[from] toml::de::Error),
    #[error("configuration key '{key}' not found")]
    KeyNotFound { key: String },
    #[error("invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: String },
}

/// Install state persisted per branch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchState {
    /// Version stamped by the last successful operation.
    pub version: Option<String>,
    /// Whether optional HD content is installed.
    #[serde(default)]
    pub optional: bool,
}

/// Everything the CLI persists between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Channel base URL the sync commands talk to.
    pub channel_url: String,
    /// Directory holding one subdirectory per installed branch.
    pub library_root: String,
    /// Branch sync commands operate on by default.
    pub branch: String,
    /// Files in flight at once during transfers.
    pub concurrent_downloads: usize,
    /// Download speed limit in KiB/s; 0 means unlimited.
    pub speed_limit_kbps: u64,
    /// Whether optional HD content is wanted.
    pub include_optional: bool,
    /// Language tags whose localized audio is wanted.
    pub languages: Vec<String>,
    /// Path substrings local scans skip.
    pub exclude_patterns: Vec<String>,
    /// Per-branch install state.
    #[serde(default)]
    pub branches: HashMap<String, BranchState>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            channel_url: String::new(),
            library_root: String::new(),
            branch: "live".to_string(),
            concurrent_downloads: 16,
            speed_limit_kbps: 0,
            include_optional: false,
            languages: Vec::new(),
            exclude_patterns: vec![
                "cfg/user".to_string(),
                "screenshots/".to_string(),
                "logs/".to_string(),
            ],
            branches: HashMap::new(),
        }
    }
}

impl CliConfig {
    /// Derive the orchestrator configuration for one branch.
    pub fn sync_config(&self, branch: &str) -> SyncConfig {
        let mut config = SyncConfig::new(&self.library_root, branch);
        config.include_optional = self
            .branches
            .get(branch)
            .map_or(self.include_optional, |state| state.optional);
        config.languages = self.languages.clone();
        config.exclude_patterns = self.exclude_patterns.clone();
        config.scan_concurrency = self.concurrent_downloads.max(1);
        config.speed_limit_kbps = self.speed_limit_kbps;
        config.transfer = TransferOptions {
            concurrency: self.concurrent_downloads.max(1),
            ..TransferOptions::default()
        };
        config
    }
}

/// Loads, edits and saves the TOML configuration file.
pub struct ConfigManager {
    config_path: PathBuf,
    config: CliConfig,
}

impl ConfigManager {
    /// Load the configuration from the platform config directory, creating
    /// a default file on first run.
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("caravel");
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
        }
        Self::at_path(config_dir.join("config.toml"))
    }

    /// Load (or create) the configuration at an explicit path.
    pub fn at_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        let config = if config_path.exists() {
            toml::from_str(&fs::read_to_string(&config_path)?)?
        } else {
            let config = CliConfig::default();
            Self::save_to(&config_path, &config)?;
            config
        };
        Ok(Self {
            config_path,
            config,
        })
    }

    fn save_to(path: &Path, config: &CliConfig) -> Result<(), ConfigError> {
        fs::write(path, toml::to_string_pretty(config)?)?;
        Ok(())
    }

    /// Write the current configuration back to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        Self::save_to(&self.config_path, &self.config)
    }

    /// Where the configuration file lives.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// The loaded configuration.
    pub fn config(&self) -> &CliConfig {
        &self.config
    }

    /// The loaded configuration, for editing. Call [`save`](Self::save)
    /// afterwards.
    pub fn config_mut(&mut self) -> &mut CliConfig {
        &mut self.config
    }

    /// Get a configuration value by key, rendered as a string.
    pub fn get(&self, key: &str) -> Result<String, ConfigError> {
        let c = &self.config;
        Ok(match key {
            "channel_url" => c.channel_url.clone(),
            "library_root" => c.library_root.clone(),
            "branch" => c.branch.clone(),
            "concurrent_downloads" => c.concurrent_downloads.to_string(),
            "speed_limit_kbps" => c.speed_limit_kbps.to_string(),
            "include_optional" => c.include_optional.to_string(),
            "languages" => c.languages.join(","),
            "exclude_patterns" => c.exclude_patterns.join(","),
            _ => {
                return Err(ConfigError::KeyNotFound {
                    key: key.to_string(),
                });
            }
        })
    }

    /// Set a configuration value by key from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        let c = &mut self.config;
        match key {
            "channel_url" => c.channel_url = value.to_string(),
            "library_root" => c.library_root = value.to_string(),
            "branch" => c.branch = value.to_string(),
            "concurrent_downloads" => {
                c.concurrent_downloads = value.parse().map_err(|_| invalid())?;
            }
            "speed_limit_kbps" => c.speed_limit_kbps = value.parse().map_err(|_| invalid())?,
            "include_optional" => c.include_optional = value.parse().map_err(|_| invalid())?,
            "languages" => c.languages = split_list(value),
            "exclude_patterns" => c.exclude_patterns = split_list(value),
            _ => {
                return Err(ConfigError::KeyNotFound {
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Every key [`get`](Self::get) and [`set`](Self::set) understand.
    pub fn keys() -> &'static [&'static str] {
        &[
            "branch",
            "channel_url",
            "concurrent_downloads",
            "exclude_patterns",
            "include_optional",
            "languages",
            "library_root",
            "speed_limit_kbps",
        ]
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Adapts the persisted configuration to the orchestrator's hook trait.
///
/// Version stamps and the HD flag are written back to the config file as
/// the orchestrator persists them; a failed save is logged rather than
/// failing the operation that already completed.
pub struct SettingsHooks {
    manager: Mutex<ConfigManager>,
}

impl SettingsHooks {
    /// Wrap a loaded configuration manager.
    pub fn new(manager: ConfigManager) -> Self {
        Self {
            manager: Mutex::new(manager),
        }
    }
}

impl LauncherHooks for SettingsHooks {
    fn installed_version(&self, branch: &str) -> Option<String> {
        self.manager
            .lock()
            .config()
            .branches
            .get(branch)
            .and_then(|state| state.version.clone())
    }

    fn persist_installed(&self, branch: &str, version: Option<&str>) {
        let mut manager = self.manager.lock();
        let branches = &mut manager.config_mut().branches;
        match version {
            Some(version) => {
                branches.entry(branch.to_string()).or_default().version =
                    Some(version.to_string());
            }
            None => {
                branches.remove(branch);
            }
        }
        if let Err(e) = manager.save() {
            warn!(branch, error = %e, "could not persist install state");
        }
    }

    fn persist_optional(&self, branch: &str, enabled: bool) {
        let mut manager = self.manager.lock();
        manager
            .config_mut()
            .branches
            .entry(branch.to_string())
            .or_default()
            .optional = enabled;
        if let Err(e) = manager.save() {
            warn!(branch, error = %e, "could not persist optional flag");
        }
    }
}
