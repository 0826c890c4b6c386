//! Application configuration management.
//!
//! This module handles loading and saving the client configuration, which
//! includes the server base URL, the token renewal buffer, where the session
//! is persisted, and the last used email.
//!
//! Configuration is stored at `~/.config/taskrs/config.json`. Environment
//! variables (`TASKRS_*`) override the file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::client::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::api::{ApiClient, HttpPipeline, RequestStage, RequestTracing};
use crate::auth::{
    FileBackend, KeyValueSessionStore, KeyringBackend, MemorySessionStore, Navigator,
    RequestAuthenticator, SessionManager, SessionStore, DEFAULT_REFRESH_BUFFER_SECS,
};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "taskrs";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api/v1/";

pub const ENV_BASE_URL: &str = "TASKRS_BASE_URL";
pub const ENV_REFRESH_BUFFER_SECS: &str = "TASKRS_REFRESH_BUFFER_SECS";
pub const ENV_SESSION_BACKEND: &str = "TASKRS_SESSION_BACKEND";
pub const ENV_EMAIL: &str = "TASKRS_EMAIL";

/// Where the session tokens are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl FromStr for SessionBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(SessionBackend::File),
            "keyring" => Ok(SessionBackend::Keyring),
            "memory" => Ok(SessionBackend::Memory),
            other => Err(anyhow::anyhow!("Unknown session backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub refresh_buffer_secs: i64,
    pub request_timeout_secs: u64,
    pub session_backend: SessionBackend,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            refresh_buffer_secs: DEFAULT_REFRESH_BUFFER_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            session_backend: SessionBackend::default(),
            last_email: None,
        }
    }
}

impl Config {
    /// Load from the default location and apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let mut config: Self =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            if config.refresh_buffer_secs < 0 {
                warn!(
                    value = config.refresh_buffer_secs,
                    "Ignoring negative refresh_buffer_secs in config file"
                );
                config.refresh_buffer_secs = DEFAULT_REFRESH_BUFFER_SECS;
            }
            Ok(config)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
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

    /// Record the last used email, leaving the rest of the file as stored.
    /// Environment and command-line overrides are never written back.
    pub fn save_last_email(email: &str) -> Result<()> {
        Self::save_last_email_to(&Self::config_path()?, email)
    }

    pub fn save_last_email_to(path: &Path, email: &str) -> Result<()> {
        let mut stored = Self::load_from(path)?;
        stored.last_email = Some(email.to_string());
        stored.save_to(path)
    }

    /// Apply `TASKRS_*` overrides. Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(raw) = lookup(ENV_REFRESH_BUFFER_SECS) {
            match raw.trim().parse::<i64>() {
                Ok(secs) if secs >= 0 => self.refresh_buffer_secs = secs,
                _ => warn!(value = %raw, "Ignoring invalid {}", ENV_REFRESH_BUFFER_SECS),
            }
        }
        if let Some(raw) = lookup(ENV_SESSION_BACKEND) {
            match raw.parse() {
                Ok(backend) => self.session_backend = backend,
                Err(e) => warn!(error = %e, "Ignoring invalid {}", ENV_SESSION_BACKEND),
            }
        }
        if let Some(email) = lookup(ENV_EMAIL) {
            self.last_email = Some(email);
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn refresh_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_buffer_secs)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    /// Open the configured session store
    pub fn session_store(&self) -> Result<Arc<dyn SessionStore>> {
        let store: Arc<dyn SessionStore> = match self.session_backend {
            SessionBackend::File => {
                let dir = Self::cache_dir()?;
                Arc::new(KeyValueSessionStore::new(FileBackend::in_dir(&dir)))
            }
            SessionBackend::Keyring => {
                Arc::new(KeyValueSessionStore::new(KeyringBackend::default()))
            }
            SessionBackend::Memory => Arc::new(MemorySessionStore::in_memory()),
        };
        Ok(store)
    }

    /// Wire store, pipeline, API client and session manager together.
    ///
    /// Must be called within a tokio runtime when `eager_refresh` is set.
    pub fn session_manager(
        &self,
        store: Arc<dyn SessionStore>,
        navigator: Arc<dyn Navigator>,
        eager_refresh: bool,
    ) -> Result<SessionManager> {
        let stages: Vec<Arc<dyn RequestStage>> = vec![
            Arc::new(RequestAuthenticator::new(Arc::clone(&store), Arc::clone(&navigator))),
            Arc::new(RequestTracing),
        ];
        let http = ApiClient::http_client(self.request_timeout())
            .context("Failed to build HTTP client")?;
        let api = ApiClient::new(&self.base_url, HttpPipeline::new(http, stages));

        Ok(SessionManager::builder(api, store)
            .navigator(navigator)
            .refresh_buffer(self.refresh_buffer())
            .eager_refresh(eager_refresh)
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.refresh_buffer_secs, 60);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskrs").join("config.json");

        let config = Config {
            base_url: "https://tasks.example.com/api/v1/".to_string(),
            session_backend: SessionBackend::Keyring,
            last_email: Some("admin@example.com".to_string()),
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"session_backend":"memory"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.session_backend, SessionBackend::Memory);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_negative_buffer_in_file_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"refresh_buffer_secs":-30,"request_timeout_secs":5}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.refresh_buffer_secs, DEFAULT_REFRESH_BUFFER_SECS);
        assert_eq!(config.request_timeout_secs, 5);
    }

    #[test]
    fn test_save_last_email_keeps_overrides_out_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let stored = Config {
            base_url: "https://tasks.example.com/api/v1/".to_string(),
            ..Default::default()
        };
        stored.save_to(&path).unwrap();

        let mut effective = Config::load_from(&path).unwrap();
        effective.apply_overrides(|name| match name {
            ENV_BASE_URL => Some("http://one-off/api/".to_string()),
            ENV_SESSION_BACKEND => Some("memory".to_string()),
            _ => None,
        });
        assert_eq!(effective.base_url, "http://one-off/api/");

        Config::save_last_email_to(&path, "admin@example.com").unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.base_url, "https://tasks.example.com/api/v1/");
        assert_eq!(reloaded.session_backend, SessionBackend::File);
        assert_eq!(reloaded.last_email.as_deref(), Some("admin@example.com"));
    }

    #[test]
    fn test_save_last_email_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskrs").join("config.json");

        Config::save_last_email_to(&path, "admin@example.com").unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.base_url, DEFAULT_BASE_URL);
        assert_eq!(reloaded.last_email.as_deref(), Some("admin@example.com"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_BASE_URL, "http://other/api/"),
            (ENV_REFRESH_BUFFER_SECS, "120"),
            (ENV_SESSION_BACKEND, "Keyring"),
            (ENV_EMAIL, "me@example.com"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.base_url, "http://other/api/");
        assert_eq!(config.refresh_buffer_secs, 120);
        assert_eq!(config.session_backend, SessionBackend::Keyring);
        assert_eq!(config.last_email.as_deref(), Some("me@example.com"));
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|name| match name {
            ENV_REFRESH_BUFFER_SECS => Some("-5".to_string()),
            ENV_SESSION_BACKEND => Some("cloud".to_string()),
            _ => None,
        });
        assert_eq!(config, Config::default());
    }
}
