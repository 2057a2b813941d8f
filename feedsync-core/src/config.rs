use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{redirect, Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

const APP_DIR: &str = "feedsync";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Which remote the local cache follows.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    #[default]
    Standalone,
    Miniflux {
        url: String,
        username: String,
        password: String,
    },
    Nextcloud {
        url: String,
        username: String,
        password: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpConfig {
    pub request_timeout_seconds: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// Page size for snapshot fetches.
    pub batch_size: usize,
    pub include_read_on_initial_sync: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 10,
            user_agent: concat!("feedsync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 250,
            include_read_on_initial_sync: true,
        }
    }
}

impl HttpConfig {
    /// Shared HTTP client for every backend.
    pub fn build_client(&self) -> Result<Client, reqwest::Error> {
        ClientBuilder::new()
            .redirect(redirect::Policy::limited(5))
            .timeout(Duration::from_secs(self.request_timeout_seconds))
            .user_agent(self.user_agent.clone())
            .build()
    }
}

impl AppConfig {
    /// Path of the configuration file, creating its directory if needed.
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        let app_config_dir = config_dir.join(APP_DIR);
        std::fs::create_dir_all(&app_config_dir)?;
        Ok(app_config_dir.join("config.json"))
    }

    /// Default location of the local store.
    pub fn store_file_path() -> Result<PathBuf, ConfigError> {
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(data_dir.join(APP_DIR).join("store.json"))
    }

    /// Loads the configuration from the default location, or falls back to
    /// (and saves) the defaults.
    pub fn load() -> Self {
        match Self::config_file_path().and_then(|path| Self::load_from(&path)) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "can't load configuration, using defaults");
                let default_config = Self::default();
                if let Err(save_err) = default_config.save() {
                    warn!(error = %save_err, "can't save default configuration");
                }
                default_config
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config_content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&config_content)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let config_json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, config_json)?;
        Ok(())
    }

    /// Switches backend and saves.
    pub fn update_backend(&mut self, backend: BackendConfig) -> Result<(), ConfigError> {
        self.backend = backend;
        self.save()
    }
}
