//! Local stand-in for an OpenAI-compatible vendor.
//!
//! Serves `/v1/chat/completions`, `/chat/completions` and `/v1/responses`
//! on an ephemeral port so the real reqwest transports can be exercised
//! without leaving the machine.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ctr_studio::llm::{registry, ProviderClient, ProviderConfig};
use ctr_studio::types::{BatchOutcome, FailureReason, IdentityProfile, Platform};

/// Behaviour of the chat completions endpoint.
#[derive(Debug, Clone)]
pub enum ChatMode {
    Reply(String),
    Status(u16),
    Hang(Duration),
}

pub struct VendorState {
    chat_mode: ChatMode,
    responses_text: String,
    chat_calls: AtomicUsize,
    responses_calls: AtomicUsize,
    last_auth: Mutex<Option<String>>,
    last_chat_body: Mutex<Option<Value>>,
}

pub struct FakeVendor {
    pub addr: SocketAddr,
    pub state: Arc<VendorState>,
}

impl FakeVendor {
    pub async fn start(chat_mode: ChatMode, responses_text: &str) -> Self {
        let state = Arc::new(VendorState {
            chat_mode,
            responses_text: responses_text.to_string(),
            chat_calls: AtomicUsize::new(0),
            responses_calls: AtomicUsize::new(0),
            last_auth: Mutex::new(None),
            last_chat_body: Mutex::new(None),
        });
        let app = Router::new()
            .route("/v1/chat/completions", post(chat))
            .route("/chat/completions", post(chat))
            .route("/v1/responses", post(responses))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub fn chat_calls(&self) -> usize {
        self.state.chat_calls.load(Ordering::SeqCst)
    }

    pub fn responses_calls(&self) -> usize {
        self.state.responses_calls.load(Ordering::SeqCst)
    }

    /// Resolved config pointing `provider` at this server.
    pub fn config(&self, provider: &str, path: &str, key: Option<&str>, timeout: Duration) -> ProviderConfig {
        let entry = registry::lookup(provider).unwrap();
        ProviderConfig {
            provider: entry.name.to_string(),
            model: entry.default_model.to_string(),
            credential: key.map(|k| SecretString::new(k.to_string())),
            base_url: format!("http://{}{}", self.addr, path),
            timeout,
        }
    }

    pub fn client(&self, provider: &str, path: &str, key: Option<&str>, timeout: Duration) -> ProviderClient {
        let entry = registry::lookup(provider).unwrap();
        ProviderClient::connect(entry, &self.config(provider, path, key, timeout))
    }
}

async fn chat(
    State(state): State<Arc<VendorState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.chat_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_auth.lock().unwrap() = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    *state.last_chat_body.lock().unwrap() = Some(body);

    match &state.chat_mode {
        ChatMode::Reply(text) => Json(json!({
            "id": "chatcmpl-test",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": text}}]
        }))
        .into_response(),
        ChatMode::Status(code) => {
            let status = StatusCode::from_u16(*code).unwrap();
            (status, Json(json!({"error": {"message": "scripted failure"}}))).into_response()
        }
        ChatMode::Hang(delay) => {
            tokio::time::sleep(*delay).await;
            Json(json!({"choices": []})).into_response()
        }
    }
}

async fn responses(State(state): State<Arc<VendorState>>, Json(_body): Json<Value>) -> Json<Value> {
    state.responses_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "output": [{
            "type": "message",
            "content": [{"type": "output_text", "text": state.responses_text}]
        }]
    }))
}

fn batch(n: usize) -> Vec<IdentityProfile> {
    (0..n)
        .map(|i| IdentityProfile {
            gender: "male".into(),
            age: 25 + i as u32,
            region: "Denver, CO".into(),
            occupation: "Electrician".into(),
            annual_salary: 61_000.0,
            liability_status: 12_500.0,
            is_married: i % 2 == 0,
            health_status: false,
            illness: None,
        })
        .collect()
}

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_openai_chat_round_trip() {
    let vendor = FakeVendor::start(ChatMode::Reply("[1, 0, 1]".into()), "[0,0,0]").await;
    let client = vendor.client("openai", "/v1", Some("sk-test"), TIMEOUT);
    assert!(client.is_live());

    let outcome = client.predict_batch("ad", &batch(3), Platform::Facebook).await;
    assert_eq!(outcome, BatchOutcome::clean(vec![1, 0, 1]));
    assert_eq!(vendor.chat_calls(), 1);
    assert_eq!(vendor.responses_calls(), 0);

    let auth = vendor.state.last_auth.lock().unwrap().clone();
    assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
    let body = vendor.state.last_chat_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["temperature"], 0.0);
    assert_eq!(body["stream"], false);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["role"], "user");
}

#[tokio::test]
async fn test_openai_falls_back_to_responses_api() {
    let vendor = FakeVendor::start(ChatMode::Status(500), "[0, 1, 1, 0]").await;
    let client = vendor.client("openai", "/v1", Some("sk-test"), TIMEOUT);

    let outcome = client.predict_batch("ad", &batch(4), Platform::TikTok).await;
    assert_eq!(outcome, BatchOutcome::clean(vec![0, 1, 1, 0]));
    assert_eq!(vendor.chat_calls(), 1);
    assert_eq!(vendor.responses_calls(), 1);
}

#[tokio::test]
async fn test_deepseek_failure_has_no_second_path() {
    let vendor = FakeVendor::start(ChatMode::Status(503), "[1,1]").await;
    let client = vendor.client("deepseek", "", Some("ds-test"), TIMEOUT);

    let people = batch(2);
    let outcome = client.predict_batch("ad", &people, Platform::Amazon).await;
    assert_eq!(outcome.reason, Some(FailureReason::ApiCallFailed));
    assert_eq!(outcome.decisions, ctr_studio::llm::mock::mock_batch("ad", &people));
    assert_eq!(vendor.chat_calls(), 1);
    assert_eq!(vendor.responses_calls(), 0);
}

#[tokio::test]
async fn test_timeout_is_call_failure() {
    let vendor = FakeVendor::start(ChatMode::Hang(Duration::from_secs(3)), "[1]").await;
    let client = vendor.client("deepseek", "", Some("ds-test"), Duration::from_millis(200));

    let outcome = client.predict_batch("ad", &batch(1), Platform::Facebook).await;
    assert!(outcome.degraded);
    assert_eq!(outcome.reason, Some(FailureReason::ApiCallFailed));
}

#[tokio::test]
async fn test_missing_key_makes_no_requests() {
    let vendor = FakeVendor::start(ChatMode::Reply("[1]".into()), "[1]").await;
    let client = vendor.client("openai", "/v1", None, TIMEOUT);
    assert!(!client.is_live());

    let outcome = client.predict_batch("ad", &batch(5), Platform::Facebook).await;
    assert_eq!(outcome.decisions.len(), 5);
    assert_eq!(outcome.reason, Some(FailureReason::ApiKeyMissing));
    assert_eq!(vendor.chat_calls(), 0);
    assert_eq!(vendor.responses_calls(), 0);
}

#[tokio::test]
async fn test_one_client_serves_every_batch() {
    let vendor = FakeVendor::start(ChatMode::Reply("[0,0,0,0,0,0,0,0,0,0]".into()), "[]").await;
    let predictor = ctr_studio::engine::ClickPredictor::with_client(
        vendor.client("openai", "/v1", Some("sk-test"), TIMEOUT),
        10,
        ctr_studio::types::ExecutionMode::Concurrent,
    );
    let report = predictor
        .predict_clicks_detailed("ad", &batch(40), Platform::Facebook)
        .await;
    assert_eq!(report.decisions, vec![0; 40]);
    assert_eq!(report.degraded_batches, 0);
    assert_eq!(vendor.chat_calls(), 4);
}
