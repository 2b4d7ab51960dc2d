//! OpenAI-compatible transport.
//!
//! Implements `ChatBackend` against the Chat Completions API. When a chat
//! call fails, the same exchange is tried once more through the Responses
//! API before giving up, which tolerates accounts and models that only
//! expose the newer endpoint.
//!
//! The request/response types and `send_chat` are shared with the
//! DeepSeek client, which speaks the same wire format.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ChatBackend, ChatMessage, ProviderConfig};

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Choice {
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: &'a str,
    instructions: &'a str,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<ResponsesOutput>,
}

#[derive(Debug, Deserialize)]
struct ResponsesOutput {
    #[serde(default)]
    content: Vec<ResponsesContent>,
}

#[derive(Debug, Deserialize)]
struct ResponsesContent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl ChatResponse {
    /// Text of the first choice. An empty envelope is an error.
    pub(crate) fn into_content(self) -> Result<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .context("Chat completion response has no message content")
    }
}

impl ResponsesResponse {
    fn into_text(self) -> Result<String> {
        if let Some(text) = self.output_text.filter(|t| !t.is_empty()) {
            return Ok(text);
        }
        let text: String = self
            .output
            .into_iter()
            .flat_map(|o| o.content)
            .filter(|c| c.kind == "output_text")
            .filter_map(|c| c.text)
            .collect();
        if text.is_empty() {
            bail!("Responses API returned no output text");
        }
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Validate a base URL and build a reqwest client with the per-call timeout.
pub(crate) fn build_http(base_url: &str, timeout: Duration) -> Result<(Client, Url)> {
    let url = Url::parse(base_url.trim_end_matches('/'))
        .with_context(|| format!("Malformed API base URL: {base_url}"))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        bail!("Unsupported API base URL: {base_url}");
    }
    let http = Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")?;
    Ok((http, url))
}

/// `{base}/{path}` without doubling slashes.
pub(crate) fn endpoint(base: &Url, path: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), path)
}

/// POST a chat completion request and return the first choice's text.
pub(crate) async fn send_chat(
    http: &Client,
    url: &str,
    api_key: &SecretString,
    request: &ChatRequest<'_>,
) -> Result<String> {
    let response = http
        .post(url)
        .bearer_auth(api_key.expose_secret())
        .json(request)
        .send()
        .await
        .context("Chat completion request failed")?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        bail!("API error {status}: {error_text}");
    }

    let body: ChatResponse = response
        .json()
        .await
        .context("Failed to parse chat completion response")?;
    body.into_content()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenAiClient {
    http: Client,
    api_key: SecretString,
    base_url: Url,
}

impl OpenAiClient {
    pub fn new(api_key: SecretString, base_url: &str, timeout: Duration) -> Result<Self> {
        let (http, base_url) =
            build_http(base_url, timeout).context("Failed to build OpenAI HTTP client")?;
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
            .context("OpenAI API key missing")?;
        Ok(Arc::new(Self::new(api_key, &config.base_url, config.timeout)?))
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    async fn chat_completion(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatRequest {
            model,
            messages,
            temperature: 0.0,
            stream: false,
        };
        send_chat(
            &self.http,
            &endpoint(&self.base_url, "chat/completions"),
            &self.api_key,
            &request,
        )
        .await
    }

    /// Secondary path through the Responses API.
    async fn responses(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let instructions = messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let input = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let request = ResponsesRequest {
            model,
            input,
            instructions,
            temperature: 0.0,
        };

        let response = self
            .http
            .post(endpoint(&self.base_url, "responses"))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .context("Responses request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            bail!("Responses API error {status}: {error_text}");
        }

        let body: ResponsesResponse = response
            .json()
            .await
            .context("Failed to parse Responses API response")?;
        body.into_text()
    }
}

#[async_trait]
impl ChatBackend for OpenAiClient {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        match self.chat_completion(model, messages).await {
            Ok(text) => Ok(text),
            Err(chat_err) => {
                warn!(model, error = %chat_err, "Chat completion failed, trying Responses API");
                let text = self.responses(model, messages).await.with_context(|| {
                    format!("Both chat completions and responses failed. Chat error: {chat_err}")
                })?;
                debug!(model, "Responses API fallback succeeded");
                Ok(text)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
