//! Application configuration management.
//!
//! Two files are involved:
//!
//! - `web.config.json`: where the API lives and what the app is called. A
//!   missing or broken file falls back to `http://localhost:5140/api`.
//! - `config.json` under `~/.config/phatso-admin/`: local preferences such
//!   as the last username and which credential store to use.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::credentials::DEFAULT_SERVICE_NAME;
use crate::auth::{CredentialStore, FileCredentialStore, KeyringCredentialStore};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "phatso-admin";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Web config file name
pub const WEB_CONFIG_FILE: &str = "web.config.json";

/// Base URL used when no web config can be loaded
pub const DEFAULT_BASE_URL: &str = "http://localhost:5140/api";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSettings {
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            name: APP_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebConfig {
    pub api: ApiSettings,
    #[serde(default)]
    pub app: AppInfo,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            api: ApiSettings {
                base_url: DEFAULT_BASE_URL.to_string(),
            },
            app: AppInfo::default(),
        }
    }
}

impl WebConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Load the web config, falling back to defaults on any error
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => {
                info!(base_url = %config.api.base_url, "Web config loaded");
                config
            }
            Err(e) => {
                warn!(error = %e, base_url = DEFAULT_BASE_URL, "Failed to load web config, using fallback");
                Self::default()
            }
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.api.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.api.base_url
    }
}

/// Where the bearer credential is kept between runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Keyring,
    File,
}

impl std::str::FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(StoreKind::Keyring),
            "file" => Ok(StoreKind::File),
            other => Err(anyhow::anyhow!("Unknown credential store: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub last_username: Option<String>,
    #[serde(default)]
    pub credential_store: StoreKind,
    pub web_config_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Explicit web config path, else `web.config.json` in the config dir
    pub fn web_config_path(&self) -> Result<PathBuf> {
        match self.web_config_path {
            Some(ref path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join(WEB_CONFIG_FILE)),
        }
    }

    pub fn open_credential_store(&self) -> Result<Arc<dyn CredentialStore>> {
        let store: Arc<dyn CredentialStore> = match self.credential_store {
            StoreKind::Keyring => Arc::new(KeyringCredentialStore::new(DEFAULT_SERVICE_NAME)?),
            StoreKind::File => Arc::new(FileCredentialStore::new(Self::cache_dir()?)),
        };
        Ok(store)
    }
}
