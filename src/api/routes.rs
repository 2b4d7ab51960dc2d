//! HTTP route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<ApiState>`.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::engine::{ClickPredictor, PredictorConfig};
use crate::llm::registry;
use crate::sampler::{sample_identities, IdentityBank};
use crate::types::{ConfigError, ExecutionMode, IdentityProfile, Platform};

pub const SERVICE_NAME: &str = "CTR Studio API";
pub const SERVICE_DESCRIPTION: &str =
    "REST API for click-through rate prediction using synthetic identities and LLM models";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest accepted `/predict-ctr-batch` payload.
pub const MAX_BATCH_REQUESTS: usize = 10;
pub const MAX_POPULATION: usize = 10_000;
pub const MAX_BATCH_SIZE: usize = 200;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// An identity bank together with the path it came from.
#[derive(Clone)]
pub struct LoadedBank {
    pub source: String,
    pub bank: Arc<IdentityBank>,
}

/// Shared state accessible by all route handlers.
pub struct ApiState {
    pub config: AppConfig,
    bank: RwLock<Option<LoadedBank>>,
}

pub type AppState = Arc<ApiState>;

impl ApiState {
    /// Load the configured bank eagerly. A missing or broken bank is logged
    /// and retried on first use rather than preventing startup.
    pub fn new(config: AppConfig) -> Self {
        let bank = match IdentityBank::load(&config.identity.bank_path) {
            Ok(bank) => Some(LoadedBank {
                source: config.identity.bank_path.clone(),
                bank: Arc::new(bank),
            }),
            Err(e) => {
                warn!(path = %config.identity.bank_path, error = %e, "Identity bank not loaded");
                None
            }
        };
        Self {
            config,
            bank: RwLock::new(bank),
        }
    }

    /// State with an already-loaded bank.
    pub fn with_bank(config: AppConfig, source: impl Into<String>, bank: IdentityBank) -> Self {
        Self {
            config,
            bank: RwLock::new(Some(LoadedBank {
                source: source.into(),
                bank: Arc::new(bank),
            })),
        }
    }

    pub async fn current_bank(&self) -> Option<LoadedBank> {
        self.bank.read().await.clone()
    }

    /// The configured bank, loading it if startup could not.
    async fn default_bank(&self) -> Result<Arc<IdentityBank>, ApiError> {
        if let Some(loaded) = self.bank.read().await.as_ref() {
            return Ok(loaded.bank.clone());
        }
        self.reload().await.map(|loaded| loaded.bank)
    }

    /// Re-read the bank from `identity.bank_path` and swap it in.
    pub async fn reload(&self) -> Result<LoadedBank, ApiError> {
        let source = self.config.identity.bank_path.clone();
        let bank = load_bank(&source).await?;
        let loaded = LoadedBank { source, bank };
        *self.bank.write().await = Some(loaded.clone());
        Ok(loaded)
    }
}

async fn load_bank(path: &str) -> Result<Arc<IdentityBank>, ApiError> {
    if !Path::new(path).exists() {
        return Err(ApiError::BadRequest(format!(
            "Identity bank file not found: {path}"
        )));
    }
    let owned = path.to_string();
    let bank = tokio::task::spawn_blocking(move || IdentityBank::load(owned))
        .await
        .map_err(|e| ApiError::Internal(e.into()))??;
    Ok(Arc::new(bank))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Internal server error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Config(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Malformed bodies and query strings get the JSON error shape too.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        }
        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CtrRequest {
    /// Defaulted so a missing field is reported as a 400 like an empty one.
    #[serde(default)]
    pub ad_text: String,
    #[serde(default = "default_platform")]
    pub ad_platform: String,
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    /// `null` draws an unseeded population.
    #[serde(default = "default_seed")]
    pub seed: Option<u64>,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub use_mock: bool,
    #[serde(default)]
    pub use_sync: bool,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub identity_bank_path: Option<String>,
}

fn default_platform() -> String {
    "facebook".to_string()
}
fn default_population_size() -> usize {
    1000
}
fn default_seed() -> Option<u64> {
    Some(42)
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    50
}

impl CtrRequest {
    pub fn new(ad_text: impl Into<String>) -> Self {
        Self {
            ad_text: ad_text.into(),
            ad_platform: default_platform(),
            population_size: default_population_size(),
            seed: default_seed(),
            provider: default_provider(),
            model: None,
            batch_size: default_batch_size(),
            use_mock: false,
            use_sync: false,
            api_key: None,
            identity_bank_path: None,
        }
    }

    fn mode(&self) -> ExecutionMode {
        if self.use_sync {
            ExecutionMode::Sequential
        } else {
            ExecutionMode::Concurrent
        }
    }
}

/// Check a request before any sampling or provider work.
pub fn validate_request(req: &CtrRequest) -> Result<Platform, ApiError> {
    if req.ad_text.trim().is_empty() {
        return Err(ApiError::BadRequest("ad_text must be a non-empty string".into()));
    }
    let platform: Platform = req.ad_platform.parse()?;
    if !(1..=MAX_POPULATION).contains(&req.population_size) {
        return Err(ApiError::BadRequest(format!(
            "population_size must be between 1 and {MAX_POPULATION}"
        )));
    }
    if !(1..=MAX_BATCH_SIZE).contains(&req.batch_size) {
        return Err(ApiError::BadRequest(format!(
            "batch_size must be between 1 and {MAX_BATCH_SIZE}"
        )));
    }
    registry::lookup(&req.provider)?;
    Ok(platform)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedResult {
    pub id: usize,
    pub profile: IdentityProfile,
    pub click_prediction: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtrResponse {
    pub success: bool,
    pub ctr: f64,
    pub total_clicks: usize,
    pub total_identities: usize,
    pub runtime_seconds: f64,
    pub provider_used: String,
    pub model_used: String,
    pub processing_mode: String,
    pub ad_platform: String,
    pub timestamp: String,
    /// Batches answered wholly or partly by the mock oracle.
    pub degraded_batches: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detailed_results: Option<Vec<DetailedResult>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            timestamp: timestamp(),
        }
    }
}

/// One entry of a batch response.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchEntry {
    Ok(Box<CtrResponse>),
    Err(ErrorResponse),
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub available_providers: Vec<String>,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub default_model: String,
    pub description: String,
    pub env_var: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvidersResponse {
    pub available_providers: BTreeMap<String, ProviderInfo>,
    pub platforms: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentitiesResponse {
    pub source: String,
    pub identity_bank: IdentityBank,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReloadResponse {
    pub message: String,
    pub source: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PredictQuery {
    #[serde(default)]
    pub include_details: bool,
}

/// RFC 3339 UTC with a `Z` suffix.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

/// Validate, sample, predict and summarise one request.
pub async fn run_prediction(
    state: &ApiState,
    req: &CtrRequest,
    include_details: bool,
) -> Result<CtrResponse, ApiError> {
    let platform = validate_request(req)?;

    let bank = match &req.identity_bank_path {
        Some(path) => load_bank(path).await?,
        None => state.default_bank().await?,
    };
    let identities = sample_identities(req.population_size, &bank, req.seed)?;

    let predictor_cfg = PredictorConfig {
        provider: req.provider.clone(),
        model: req.model.clone(),
        batch_size: req.batch_size,
        use_mock: req.use_mock,
        mode: req.mode(),
        api_key: req.api_key.clone(),
        max_in_flight: state.config.predictor.max_in_flight,
    };
    let predictor = ClickPredictor::new(&predictor_cfg, &state.config.providers)?;

    let started = Instant::now();
    let report = predictor
        .predict_clicks_detailed(&req.ad_text, &identities, platform)
        .await;
    let runtime = started.elapsed().as_secs_f64();

    let total_clicks = report.clicks();
    let ctr = report.ctr();
    info!(
        provider = %predictor.provider_name(),
        platform = %platform,
        identities = identities.len(),
        total_clicks,
        ctr,
        runtime_secs = runtime,
        "CTR prediction served"
    );

    let detailed_results = include_details.then(|| {
        identities
            .iter()
            .zip(&report.decisions)
            .enumerate()
            .map(|(id, (profile, &click))| DetailedResult {
                id,
                profile: profile.clone(),
                click_prediction: click,
            })
            .collect()
    });

    Ok(CtrResponse {
        success: true,
        ctr: round_to(ctr, 4),
        total_clicks,
        total_identities: identities.len(),
        runtime_seconds: round_to(runtime, 2),
        provider_used: predictor.provider_name().to_string(),
        model_used: predictor.model_name().to_string(),
        processing_mode: predictor.mode().label().to_string(),
        ad_platform: platform.to_string(),
        timestamp: timestamp(),
        degraded_batches: report.degraded_batches,
        detailed_results,
    })
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /
pub async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": SERVICE_NAME,
        "version": VERSION,
        "description": SERVICE_DESCRIPTION,
        "endpoints": {
            "health": "/health",
            "predict": "/predict-ctr",
            "batch_predict": "/predict-ctr-batch",
            "providers": "/providers",
            "identities": "/identities",
            "reload_identities": "/identities/reload",
        }
    }))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        timestamp: timestamp(),
        available_providers: registry::provider_names(),
        version: VERSION.into(),
    })
}

/// GET /providers
pub async fn providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    let available_providers = registry::PROVIDERS
        .iter()
        .map(|entry| {
            let settings = state.config.providers.get(entry.name);
            let info = ProviderInfo {
                default_model: settings
                    .and_then(|s| s.default_model.clone())
                    .unwrap_or_else(|| entry.default_model.to_string()),
                description: entry.description.to_string(),
                env_var: settings
                    .and_then(|s| s.api_key_env.clone())
                    .unwrap_or_else(|| entry.api_key_env.to_string()),
            };
            (entry.name.to_string(), info)
        })
        .collect();

    Json(ProvidersResponse {
        available_providers,
        platforms: Platform::ALL.iter().map(|p| p.to_string()).collect(),
    })
}

/// GET /identities
pub async fn identities(State(state): State<AppState>) -> Result<Json<IdentitiesResponse>, ApiError> {
    let loaded = match state.current_bank().await {
        Some(loaded) => loaded,
        None => state.reload().await?,
    };
    Ok(Json(IdentitiesResponse {
        source: loaded.source,
        identity_bank: loaded.bank.as_ref().clone(),
    }))
}

/// POST /identities/reload
pub async fn reload_identities(State(state): State<AppState>) -> Result<Json<ReloadResponse>, ApiError> {
    let loaded = state.reload().await?;
    info!(source = %loaded.source, "Identity bank reloaded");
    Ok(Json(ReloadResponse {
        message: "Identity bank reloaded".into(),
        source: loaded.source,
    }))
}

/// POST /predict-ctr
pub async fn predict_ctr(
    State(state): State<AppState>,
    query: Result<Query<PredictQuery>, QueryRejection>,
    body: Result<Json<CtrRequest>, JsonRejection>,
) -> Result<Json<CtrResponse>, ApiError> {
    let Query(query) = query?;
    let Json(req) = body?;
    run_prediction(&state, &req, query.include_details).await.map(Json)
}

/// POST /predict-ctr-batch
///
/// Requests run one after another; a failing request becomes an error
/// entry in its slot instead of failing the call.
pub async fn predict_ctr_batch(
    State(state): State<AppState>,
    body: Result<Json<Vec<CtrRequest>>, JsonRejection>,
) -> Result<Json<Vec<BatchEntry>>, ApiError> {
    let Json(requests) = body?;
    if requests.len() > MAX_BATCH_REQUESTS {
        return Err(ApiError::BadRequest(format!(
            "Batch size cannot exceed {MAX_BATCH_REQUESTS} requests"
        )));
    }

    let mut results = Vec::with_capacity(requests.len());
    for req in &requests {
        let entry = match run_prediction(&state, req, false).await {
            Ok(resp) => BatchEntry::Ok(Box::new(resp)),
            Err(e) => BatchEntry::Err(ErrorResponse::new(e.to_string())),
        };
        results.push(entry);
    }
    Ok(Json(results))
}

/// Fallback for unknown paths.
pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new("Not found")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
