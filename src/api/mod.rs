//! HTTP API: Axum server exposing CTR prediction over JSON.
//!
//! CORS is open so browser front-ends can call the service directly.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::future::Future;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use routes::{ApiError, ApiState, AppState, CtrRequest, CtrResponse};

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/providers", get(routes::providers))
        .route("/identities", get(routes::identities))
        .route("/identities/reload", post(routes::reload_identities))
        .route("/predict-ctr", post(routes::predict_ctr))
        .route("/predict-ctr-batch", post(routes::predict_ctr_batch))
        .fallback(routes::not_found)
        .layer(cors)
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    addr: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "CTR Studio API listening on http://{addr}");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
