//! Agentsched configuration management

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db::filesystem::FsKind;
use crate::db::JournalMode;

/// Agentsched configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Lifetime of overrides created from the command line, in minutes
    #[serde(default = "default_override_minutes")]
    pub default_override_minutes: i64,
}

fn default_override_minutes() -> i64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            default_override_minutes: default_override_minutes(),
        }
    }
}

/// How a per-project store is opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store filename inside each project directory
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// How long a write waits on another writer's lock before failing
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,

    /// Journal mode; `auto` picks from the filesystem classification
    #[serde(default)]
    pub journal_mode: JournalModeSetting,

    /// Pooled connections per store handle
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_database_file() -> String {
    "features.db".to_string()
}

fn default_busy_timeout_secs() -> u64 {
    30
}

fn default_pool_size() -> u32 {
    4
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_file: default_database_file(),
            busy_timeout_secs: default_busy_timeout_secs(),
            journal_mode: JournalModeSetting::default(),
            pool_size: default_pool_size(),
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalModeSetting {
    #[default]
    Auto,
    Wal,
    Delete,
}

impl JournalModeSetting {
    /// Network mounts get the rollback journal, everything else WAL.
    pub fn resolve(&self, kind: FsKind) -> JournalMode {
        match (self, kind) {
            (JournalModeSetting::Wal, _) => JournalMode::Wal,
            (JournalModeSetting::Delete, _) => JournalMode::Delete,
            (JournalModeSetting::Auto, FsKind::Network) => JournalMode::Delete,
            (JournalModeSetting::Auto, FsKind::Local) => JournalMode::Wal,
        }
    }
}

impl Config {
    /// Load config from the default location or specified path
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = Self::config_path(path)?;

        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Config::default();
            config.save(path)?;
            return Ok(config);
        }

        let raw = fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Config = serde_yaml::from_str(&raw).context("Failed to parse config file")?;

        debug!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    /// Save config to the default location or specified path
    pub fn save(&self, path: Option<&str>) -> Result<()> {
        let config_path = Self::config_path(path)?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(&self)?;
        fs::write(&config_path, content).context("Failed to write config file")?;

        info!("Saved config to {:?}", config_path);
        Ok(())
    }

    /// Get the config file path
    fn config_path(path: Option<&str>) -> Result<PathBuf> {
        // Check env override first
        if let Ok(env_path) = std::env::var("AGENTSCHED_CONFIG") {
            return Ok(PathBuf::from(env_path));
        }

        if let Some(p) = path {
            return Ok(PathBuf::from(p));
        }

        let home = dirs::home_dir().context("Cannot find home directory")?;
        Ok(home.join(".agentsched").join("config.yml"))
    }
}
