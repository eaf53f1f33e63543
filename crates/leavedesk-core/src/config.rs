//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! API base URL, where the session record is persisted, timeouts and the
//! last used username.
//!
//! Configuration is stored at `~/.config/leavedesk/config.json`. The
//! `LEAVEDESK_API_BASE_URL` and `LEAVEDESK_SESSION_STORAGE` environment
//! variables override the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::{FileStorage, KeyringStorage, MemoryStorage, SessionStorage};
use crate::guard::{GuardConfig, DEFAULT_LOGIN_PATH};
use crate::notify::DEFAULT_NOTIFICATION_CAPACITY;

/// Application name used for config/cache directory paths and the keychain service
pub const APP_NAME: &str = "leavedesk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_API_BASE_URL: &str = "https://platform.ezeas.com/";

pub const ENV_API_BASE_URL: &str = "LEAVEDESK_API_BASE_URL";
pub const ENV_SESSION_STORAGE: &str = "LEAVEDESK_SESSION_STORAGE";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_HYDRATION_TIMEOUT_MS: u64 = 1000;

/// Where the session record is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl StorageBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Some(StorageBackend::File),
            "keyring" | "keychain" => Some(StorageBackend::Keyring),
            "memory" => Some(StorageBackend::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub storage: StorageBackend,
    pub request_timeout_secs: u64,
    pub hydration_timeout_ms: u64,
    pub login_path: String,
    pub notification_capacity: usize,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            storage: StorageBackend::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            hydration_timeout_ms: DEFAULT_HYDRATION_TIMEOUT_MS,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            last_username: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply environment overrides, looked up through `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(ENV_API_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(value) = lookup(ENV_SESSION_STORAGE) {
            match StorageBackend::parse(&value) {
                Some(backend) => self.storage = backend,
                None => warn!(value = %value, "Unknown session storage backend, keeping configured one"),
            }
        }
        self
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn guard_config(&self) -> GuardConfig {
        GuardConfig {
            login_path: self.login_path.clone(),
            hydration_timeout: Duration::from_millis(self.hydration_timeout_ms),
        }
    }

    /// Build the configured session storage backend
    pub fn session_storage(&self) -> Result<Arc<dyn SessionStorage>> {
        Ok(match self.storage {
            StorageBackend::File => Arc::new(FileStorage::new(self.cache_dir()?)),
            StorageBackend::Keyring => Arc::new(KeyringStorage::new(APP_NAME)),
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        })
    }
}
