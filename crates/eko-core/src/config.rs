//! Configuration management.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable holding the default storage definition.
pub const STORAGE_ENV: &str = "EKO_STORAGE";
/// Environment variable holding the default Docker endpoint.
pub const DOCKER_ENV: &str = "EKO_DOCKER";
/// Environment variable holding the HTTP API bearer token.
pub const API_TOKEN_ENV: &str = "EKO_API_TOKEN";

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default storage definition, e.g. `fs::./logs`.
    pub storage: Option<String>,
    /// Default Docker endpoint, e.g. `local::/var/run/docker.sock`.
    pub docker: Option<String>,
    /// Delay between reconciliation cycles in milliseconds.
    pub observation_interval_ms: u64,
    /// Upper bound for a single runtime or storage call in milliseconds.
    pub call_timeout_ms: u64,
    /// Poll interval of the file tailer in milliseconds.
    pub tail_poll_interval_ms: u64,
    /// Address the HTTP API binds to.
    pub listen_addr: String,
    /// Bearer token expected by the HTTP API.
    pub api_token: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: None,
            docker: None,
            observation_interval_ms: 5_000,
            call_timeout_ms: 10_000,
            tail_poll_interval_ms: 1_000,
            listen_addr: "0.0.0.0:3000".to_string(),
            api_token: "token".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from disk or create default, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = serde_json::from_str(&content)?;
            config.validate()?;
            config
        } else {
            let config = Self::default();
            config.save()?;
            config
        };

        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// Save configuration to disk.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Apply overrides read through `lookup` (normally the process environment).
    #[must_use]
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(storage) = lookup(STORAGE_ENV).filter(|v| !v.is_empty()) {
            self.storage = Some(storage);
        }
        if let Some(docker) = lookup(DOCKER_ENV).filter(|v| !v.is_empty()) {
            self.docker = Some(docker);
        }
        if let Some(token) = lookup(API_TOKEN_ENV).filter(|v| !v.is_empty()) {
            self.api_token = token;
        }
        self
    }

    /// Reject settings the processor cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("observation_interval_ms", self.observation_interval_ms),
            ("call_timeout_ms", self.call_timeout_ms),
            ("tail_poll_interval_ms", self.tail_poll_interval_ms),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{field} must be greater than zero")));
            }
        }
        Ok(())
    }

    /// Delay between reconciliation cycles.
    pub const fn observation_interval(&self) -> Duration {
        Duration::from_millis(self.observation_interval_ms)
    }

    /// Upper bound for a single I/O call.
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Poll interval of the file tailer.
    pub const fn tail_poll_interval(&self) -> Duration {
        Duration::from_millis(self.tail_poll_interval_ms)
    }

    /// Get configuration file path.
    fn config_path() -> Result<PathBuf> {
        ProjectDirs::from("", "", "eko")
            .map(|dirs| dirs.config_dir().join("config.json"))
            .ok_or_else(|| Error::Config("could not determine config directory".into()))
    }
}
