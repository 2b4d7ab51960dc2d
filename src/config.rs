//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` into strongly-typed structs. Every section is
//! optional and falls back to built-in defaults. Provider credentials are
//! referenced by env-var name and resolved at runtime, never stored here.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::engine::predictor::DEFAULT_BATCH_SIZE;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Env var overriding [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "CTR_STUDIO_CONFIG";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub identity: IdentityConfig,
    pub predictor: PredictorDefaults,
    /// `[providers.<name>]` tables, keyed by registry name.
    pub providers: HashMap<String, ProviderSettings>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IdentityConfig {
    /// Identity bank JSON used when a request does not name one.
    pub bank_path: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            bank_path: "data/identity_bank.json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PredictorDefaults {
    pub batch_size: usize,
    /// Cap on concurrent provider calls in concurrent mode.
    pub max_in_flight: Option<usize>,
}

impl Default for PredictorDefaults {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_in_flight: None,
        }
    }
}

/// Per-provider overrides. Unset fields use the registry defaults.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProviderSettings {
    pub api_key_env: Option<String>,
    pub default_model: Option<String>,
    pub base_url: Option<String>,
    pub base_url_env: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        if config.predictor.batch_size == 0 {
            anyhow::bail!("predictor.batch_size must be at least 1");
        }
        Ok(config)
    }

    /// Load from `$CTR_STUDIO_CONFIG` or `config.toml`. A missing default
    /// file yields the built-in defaults; a missing explicit file is an error.
    pub fn load_default() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load(path),
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load(DEFAULT_CONFIG_PATH),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
