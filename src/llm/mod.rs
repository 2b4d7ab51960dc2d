//! LLM integration for per-profile click decisions.
//!
//! Defines the `ChatBackend` transport trait, implemented once per vendor
//! (OpenAI, DeepSeek), and `ProviderClient`, which runs the shared
//! per-batch protocol: credential check, transport call, response repair,
//! with the mock oracle as the landing spot for every failure.

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod parse;
pub mod prompt;
pub mod registry;

use anyhow::Result;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{AppConfig, ProviderSettings};
use crate::types::{BatchOutcome, ConfigError, FailureReason, IdentityProfile, Platform};
use registry::ProviderEntry;

/// Per-call timeout when neither the config nor the caller sets one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

// ---------------------------------------------------------------------------
// Transport abstraction
// ---------------------------------------------------------------------------

/// One message of a chat exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Vendor transport: turns a chat exchange into raw model output text.
///
/// Implementors hold no per-call mutable state, so one instance serves
/// any number of concurrent batches.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Run one deterministic (temperature 0, non-streaming) completion.
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Provider configuration
// ---------------------------------------------------------------------------

/// Fully resolved settings for one provider in one prediction run.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: String,
    pub model: String,
    /// Explicit override, else the provider's env var. Empty keys are `None`.
    pub credential: Option<SecretString>,
    pub base_url: String,
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Resolve a provider's settings from the registry defaults, the
    /// `[providers.<name>]` config section and per-request overrides.
    pub fn resolve(
        entry: &ProviderEntry,
        settings: Option<&ProviderSettings>,
        model: Option<&str>,
        api_key: Option<&str>,
    ) -> Self {
        let key_env = settings
            .and_then(|s| s.api_key_env.as_deref())
            .unwrap_or(entry.api_key_env);
        let credential = api_key
            .filter(|k| !k.trim().is_empty())
            .map(str::to_string)
            .or_else(|| AppConfig::resolve_env(key_env).ok())
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::new);

        let model = model
            .filter(|m| !m.trim().is_empty())
            .map(str::to_string)
            .or_else(|| settings.and_then(|s| s.default_model.clone()))
            .unwrap_or_else(|| entry.default_model.to_string());

        let base_url_env = settings
            .and_then(|s| s.base_url_env.as_deref())
            .unwrap_or(entry.base_url_env);
        let base_url = settings
            .and_then(|s| s.base_url.clone())
            .or_else(|| AppConfig::resolve_env(base_url_env).ok())
            .unwrap_or_else(|| entry.default_base_url.to_string());

        let timeout = Duration::from_secs(
            settings
                .and_then(|s| s.timeout_secs)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        );

        Self {
            provider: entry.name.to_string(),
            model,
            credential,
            base_url,
            timeout,
        }
    }

    /// Look up `provider` in the registry and resolve it.
    pub fn for_provider(
        provider: &str,
        settings: &HashMap<String, ProviderSettings>,
        model: Option<&str>,
        api_key: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let entry = registry::lookup(provider)?;
        Ok(Self::resolve(entry, settings.get(entry.name), model, api_key))
    }

    pub fn has_credential(&self) -> bool {
        self.credential
            .as_ref()
            .is_some_and(|k| !k.expose_secret().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Provider client
// ---------------------------------------------------------------------------

enum Transport {
    NoCredential,
    InitFailed(String),
    Ready(Arc<dyn ChatBackend>),
}

/// Runs the per-batch protocol against one provider.
///
/// Never fails: every error path returns mock-oracle decisions tagged with
/// the reason.
pub struct ProviderClient {
    provider: String,
    model: String,
    transport: Transport,
}

impl ProviderClient {
    /// Build the vendor transport once for the whole run.
    ///
    /// Without a credential no transport is constructed at all.
    pub fn connect(entry: &ProviderEntry, config: &ProviderConfig) -> Self {
        let transport = if !config.has_credential() {
            Transport::NoCredential
        } else {
            match (entry.build)(config) {
                Ok(backend) => Transport::Ready(backend),
                Err(e) => {
                    warn!(provider = entry.name, error = %e, "Provider client init failed");
                    Transport::InitFailed(e.to_string())
                }
            }
        };

        Self {
            provider: config.provider.clone(),
            model: config.model.clone(),
            transport,
        }
    }

    /// Wrap an already-constructed backend.
    pub fn with_backend(provider: &str, model: &str, backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            transport: Transport::Ready(backend),
        }
    }

    /// A client whose credential could not be resolved.
    pub fn without_credential(provider: &str, model: &str) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            transport: Transport::NoCredential,
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.provider
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// True when batches will actually reach the vendor.
    pub fn is_live(&self) -> bool {
        matches!(self.transport, Transport::Ready(_))
    }

    /// Predict one batch. The result always has `batch.len()` decisions.
    pub async fn predict_batch(
        &self,
        ad_text: &str,
        batch: &[IdentityProfile],
        platform: Platform,
    ) -> BatchOutcome {
        let backend = match &self.transport {
            Transport::Ready(backend) => backend,
            Transport::NoCredential => {
                return mock::fallback(ad_text, batch, FailureReason::ApiKeyMissing);
            }
            Transport::InitFailed(error) => {
                debug!(provider = %self.provider, %error, "No transport, using mock oracle");
                return mock::fallback(ad_text, batch, FailureReason::ClientInitFailed);
            }
        };

        let user_prompt = prompt::build_prompt(ad_text, batch, platform);
        let messages = prompt::build_messages(&user_prompt);

        debug!(
            provider = %self.provider,
            model = %self.model,
            batch_size = batch.len(),
            "Requesting click decisions"
        );

        let content = match backend.complete(&self.model, &messages).await {
            Ok(content) => content,
            Err(e) => {
                warn!(provider = %self.provider, error = %e, "Provider call failed");
                return mock::fallback(ad_text, batch, FailureReason::ApiCallFailed);
            }
        };

        parse::parse_and_validate(&content, ad_text, batch)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
