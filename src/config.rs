use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chat::SyncConfig;

const APP_DIR: &str = "draconic-chat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoint: String,
    pub project: String,
    pub database: String,
    pub messages_collection: String,
    pub accounts_collection: String,
    pub history_limit: usize,
    pub poll_interval_secs: u64,
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "https://fra.cloud.appwrite.io/v1".to_string(),
            project: "draconic-chatroom".to_string(),
            database: "database".to_string(),
            messages_collection: "messages".to_string(),
            accounts_collection: "accounts".to_string(),
            history_limit: 50,
            poll_interval_secs: 5,
            log_file: None,
        }
    }
}

impl Config {
    /// `<config dir>/draconic-chat/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Load from an explicit path (which must exist), or from the default
    /// location if a file is there, or fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.endpoint.trim().is_empty(), "endpoint must not be empty");
        ensure!(!self.project.trim().is_empty(), "project must not be empty");
        ensure!(self.history_limit > 0, "history_limit must be at least 1");
        ensure!(self.poll_interval_secs > 0, "poll_interval_secs must be at least 1");
        Ok(())
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            history_limit: self.history_limit,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        }
    }

    /// Configured log file, else `<cache dir>/draconic-chat/draconic.log`.
    pub fn log_path(&self) -> PathBuf {
        if let Some(path) = &self.log_file {
            return path.clone();
        }

        let cache_dir = dirs::cache_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
            .unwrap_or_else(|| PathBuf::from(".cache"));
        cache_dir.join(APP_DIR).join("draconic.log")
    }
}
