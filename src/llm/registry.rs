//! Provider registry: provider name → transport constructor.
//!
//! Adding a vendor means writing a `ChatBackend` and adding one entry here.

use anyhow::Result;
use std::sync::Arc;

use super::deepseek::DeepSeekClient;
use super::openai::OpenAiClient;
use super::{ChatBackend, ProviderConfig};
use crate::types::ConfigError;

/// Static description of one LLM vendor.
#[derive(Debug)]
pub struct ProviderEntry {
    pub name: &'static str,
    pub description: &'static str,
    /// Env var holding the API key.
    pub api_key_env: &'static str,
    pub default_model: &'static str,
    pub default_base_url: &'static str,
    /// Env var that overrides the base URL.
    pub base_url_env: &'static str,
    /// Construct the vendor transport for a resolved config.
    pub build: fn(&ProviderConfig) -> Result<Arc<dyn ChatBackend>>,
}

pub const PROVIDERS: &[ProviderEntry] = &[
    ProviderEntry {
        name: "openai",
        description: "OpenAI GPT models",
        api_key_env: "OPENAI_API_KEY",
        default_model: "gpt-4o-mini",
        default_base_url: "https://api.openai.com/v1",
        base_url_env: "OPENAI_API_BASE",
        build: OpenAiClient::connect,
    },
    ProviderEntry {
        name: "deepseek",
        description: "DeepSeek models",
        api_key_env: "DEEPSEEK_API_KEY",
        default_model: "deepseek-chat",
        default_base_url: "https://api.deepseek.com",
        base_url_env: "DEEPSEEK_API_BASE",
        build: DeepSeekClient::connect,
    },
];

/// Find a provider by name (case-insensitive).
pub fn lookup(name: &str) -> Result<&'static ProviderEntry, ConfigError> {
    let wanted = name.trim();
    PROVIDERS
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(wanted))
        .ok_or_else(|| ConfigError::UnknownProvider(name.to_string(), provider_names()))
}

pub fn provider_names() -> Vec<String> {
    PROVIDERS.iter().map(|p| p.name.to_string()).collect()
}
