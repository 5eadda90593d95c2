//! Client configuration.
//!
//! Reads/writes `~/.storefront/config.toml`. `STOREFRONT_URL` and
//! `STOREFRONT_ANON_KEY` override the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use storefront_client::BackendConfig;
use storefront_session::SessionConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Backend base URL (e.g. "https://xyz.supabase.co").
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backend_url: String,

    /// Public anonymous key sent with every request.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub anon_key: String,

    /// Local state directory (default: ~/.storefront/data).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    #[serde(default)]
    pub session: SessionConfig,
}

impl ClientConfig {
    /// Default config file path: ~/.storefront/config.toml.
    pub fn default_path() -> PathBuf {
        dirs_path().join("config.toml")
    }

    /// Load config from disk, or return defaults if the file is missing.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save config to disk.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `STOREFRONT_URL` / `STOREFRONT_ANON_KEY` when set.
    pub fn with_env(mut self) -> Self {
        self.apply_env(|k| std::env::var(k).ok());
        self
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("STOREFRONT_URL").filter(|v| !v.is_empty()) {
            self.backend_url = url;
        }
        if let Some(key) = var("STOREFRONT_ANON_KEY").filter(|v| !v.is_empty()) {
            self.anon_key = key;
        }
    }

    pub fn backend(&self) -> anyhow::Result<BackendConfig> {
        if self.backend_url.is_empty() {
            anyhow::bail!("No backend URL configured. Run `storefront config set --url <url>`.");
        }
        if self.anon_key.is_empty() {
            anyhow::bail!("No anon key configured. Run `storefront config set --anon-key <key>`.");
        }
        Ok(BackendConfig::new(&self.backend_url, &self.anon_key))
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| dirs_path().join("data"))
    }
}

/// Return the storefront config directory (~/.storefront).
fn dirs_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".storefront")
}
