//! Runtime configuration for the `vitalog` binary.
//!
//! Values come from an optional TOML file, then environment variables, then
//! command-line flags, later sources winning.
//!
//! # Example
//!
//! ```toml
//! [server]
//! port = 8080
//! rate_limit = 60
//!
//! [storage]
//! database = "/var/lib/vitalog/vitalog.db"
//!
//! [provider]
//! model = "claude-sonnet-4-20250514"
//!
//! [pipeline]
//! client_timeout_secs = 120
//! stale_in_flight_secs = 120
//! minimum_sample = 3
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use vitalog_pipeline::PipelineConfig;

pub(crate) const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("could not read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {name}: '{value}'")]
    InvalidEnv { name: &'static str, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub(crate) server: ServerConfig,
    pub(crate) storage: StorageConfig,
    pub(crate) provider: ProviderConfig,
    pub(crate) pipeline: PipelineConfig,
}

/// `[server]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ServerConfig {
    pub(crate) port: u16,
    /// Requests per minute per client IP.
    pub(crate) rate_limit: u64,
    /// When set, every route except `/health` requires this key.
    pub(crate) api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            rate_limit: 60,
            api_key: None,
        }
    }
}

/// `[storage]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct StorageConfig {
    pub(crate) database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("vitalog.db"),
        }
    }
}

/// `[provider]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct ProviderConfig {
    /// Anthropic API key. Without one the offline mock provider is used.
    pub(crate) api_key: Option<String>,
    pub(crate) model: String,
    pub(crate) max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 2048,
        }
    }
}

impl AppConfig {
    /// Read `path` (if any) and apply environment overrides.
    pub(crate) fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(db) = var("VITALOG_DB") {
            self.storage.database = PathBuf::from(db);
        }
        if let Some(port) = var("VITALOG_PORT") {
            self.server.port = parse_env("VITALOG_PORT", port)?;
        }
        if let Some(key) = var("VITALOG_API_KEY") {
            self.server.api_key = Some(key);
        }
        if let Some(limit) = var("VITALOG_RATE_LIMIT") {
            self.server.rate_limit = parse_env("VITALOG_RATE_LIMIT", limit)?;
        }
        if let Some(key) = var("ANTHROPIC_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(model) = var("VITALOG_MODEL") {
            self.provider.model = model;
        }
        if let Some(secs) = var("VITALOG_CLIENT_TIMEOUT_SECS") {
            self.pipeline.client_timeout_secs = parse_env("VITALOG_CLIENT_TIMEOUT_SECS", secs)?;
        }
        if let Some(secs) = var("VITALOG_STALE_IN_FLIGHT_SECS") {
            self.pipeline.stale_in_flight_secs = parse_env("VITALOG_STALE_IN_FLIGHT_SECS", secs)?;
        }
        if let Some(n) = var("VITALOG_MINIMUM_SAMPLE") {
            self.pipeline.minimum_sample = parse_env("VITALOG_MINIMUM_SAMPLE", n)?;
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}
