//! CTR Studio: LLM-driven click-through rate simulation.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! loads the identity bank and serves the HTTP API until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use ctr_studio::api::{self, ApiState};
use ctr_studio::config::AppConfig;
use ctr_studio::llm::registry;

const BANNER: &str = r#"
   ____ _____ ____    ____  _             _ _
  / ___|_   _|  _ \  / ___|| |_ _   _  __| (_) ___
 | |     | | | |_) | \___ \| __| | | |/ _` | |/ _ \
 | |___  | | |  _ <   ___) | |_| |_| | (_| | | (_) |
  \____| |_| |_| \_\ |____/ \__|\__,_|\__,_|_|\___/

  Synthetic-population CTR prediction
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    init_logging();

    let cfg = AppConfig::load_default()?;

    println!("{BANNER}");
    info!(
        version = env!("CARGO_PKG_VERSION"),
        bank_path = %cfg.identity.bank_path,
        batch_size = cfg.predictor.batch_size,
        "CTR Studio starting up"
    );

    for entry in registry::PROVIDERS {
        let key_env = cfg
            .providers
            .get(entry.name)
            .and_then(|s| s.api_key_env.as_deref())
            .unwrap_or(entry.api_key_env);
        if AppConfig::resolve_env(key_env).is_err() {
            warn!(
                provider = entry.name,
                env_var = key_env,
                "No API key in environment; requests without an explicit key will use the mock oracle"
            );
        }
    }

    let addr = cfg.bind_addr();
    let state = Arc::new(ApiState::new(cfg));

    api::serve(state, &addr, shutdown_signal()).await?;

    info!("CTR Studio shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ctr_studio=info"));

    let json_logging = std::env::var("CTR_STUDIO_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
