//! DeepSeek transport.
//!
//! DeepSeek exposes an OpenAI-compatible Chat Completions endpoint, so this
//! reuses the OpenAI wire types with a different base URL. There is no
//! secondary endpoint: a failed chat call is final.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

use super::openai::{build_http, endpoint, send_chat, ChatRequest}; // Reuse OpenAI wire format
use super::{ChatBackend, ChatMessage, ProviderConfig};

pub struct DeepSeekClient {
    http: Client,
    api_key: SecretString,
    base_url: Url,
}

impl DeepSeekClient {
    pub fn new(api_key: SecretString, base_url: &str, timeout: Duration) -> Result<Self> {
        let (http, base_url) =
            build_http(base_url, timeout).context("Failed to build DeepSeek HTTP client")?;
        Ok(Self {
            http,
            api_key,
            base_url,
        })
    }

    /// Registry constructor.
    pub fn connect(config: &ProviderConfig) -> Result<Arc<dyn ChatBackend>> {
        let api_key = config
            .credential
            .clone()
            .context("DeepSeek API key missing")?;
        Ok(Arc::new(Self::new(api_key, &config.base_url, config.timeout)?))
    }

    pub fn completions_url(&self) -> String {
        endpoint(&self.base_url, "chat/completions")
    }
}

#[async_trait]
impl ChatBackend for DeepSeekClient {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatRequest {
            model,
            messages,
            temperature: 0.0,
            stream: false,
        };
        send_chat(&self.http, &self.completions_url(), &self.api_key, &request)
            .await
            .context("DeepSeek API call failed")
    }
}
