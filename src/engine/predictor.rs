//! Prediction orchestrator.
//!
//! Splits a population into ordered batches, routes each batch to the
//! provider client (or straight to the mock oracle in mock mode) and
//! stitches the outcomes back together in input order.
//!
//! Sequential and concurrent runs share one code path: batch futures are
//! fed through an ordered buffered stream whose width is 1 for sequential
//! runs and the fan-out limit for concurrent ones. `buffered` yields in
//! submission order, so completion order never leaks into the output.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::config::ProviderSettings;
use crate::llm::{mock, registry, ProviderClient, ProviderConfig};
use crate::types::{
    BatchOutcome, ConfigError, DecisionVector, ExecutionMode, IdentityProfile, Platform,
    PredictionReport,
};

/// Default number of profiles per provider call.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Model label reported for mock runs.
pub const MOCK_MODEL_NAME: &str = "mock model (no LLM)";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Parameters for one prediction run.
#[derive(Clone)]
pub struct PredictorConfig {
    pub provider: String,
    /// Provider default when `None`.
    pub model: Option<String>,
    pub batch_size: usize,
    /// Serve every batch from the mock oracle.
    pub use_mock: bool,
    pub mode: ExecutionMode,
    /// Credential override; the provider's env var is used otherwise.
    pub api_key: Option<String>,
    /// Cap on concurrent provider calls. `None` dispatches every batch at once.
    pub max_in_flight: Option<usize>,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            batch_size: DEFAULT_BATCH_SIZE,
            use_mock: false,
            mode: ExecutionMode::Concurrent,
            api_key: None,
            max_in_flight: None,
        }
    }
}

impl fmt::Debug for PredictorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredictorConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("batch_size", &self.batch_size)
            .field("use_mock", &self.use_mock)
            .field("mode", &self.mode)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("max_in_flight", &self.max_in_flight)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Predictor
// ---------------------------------------------------------------------------

/// Produces one click decision per profile, whatever the provider does.
pub struct ClickPredictor {
    client: ProviderClient,
    batch_size: usize,
    mode: ExecutionMode,
    use_mock: bool,
    max_in_flight: Option<usize>,
}

impl ClickPredictor {
    /// Validate `config` and resolve the provider. Only configuration
    /// problems fail here; credential and transport problems degrade later.
    pub fn new(
        config: &PredictorConfig,
        providers: &HashMap<String, ProviderSettings>,
    ) -> Result<Self, ConfigError> {
        if config.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        let entry = registry::lookup(&config.provider)?;
        let provider_cfg = ProviderConfig::resolve(
            entry,
            providers.get(entry.name),
            config.model.as_deref(),
            config.api_key.as_deref(),
        );

        let client = if config.use_mock {
            // Never touch the network in mock mode, even with a key present.
            ProviderClient::without_credential(entry.name, &provider_cfg.model)
        } else {
            ProviderClient::connect(entry, &provider_cfg)
        };

        Ok(Self {
            client,
            batch_size: config.batch_size,
            mode: config.mode,
            use_mock: config.use_mock,
            max_in_flight: config.max_in_flight,
        })
    }

    /// Build around an existing client.
    pub fn with_client(client: ProviderClient, batch_size: usize, mode: ExecutionMode) -> Self {
        Self {
            client,
            batch_size: batch_size.max(1),
            mode,
            use_mock: false,
            max_in_flight: None,
        }
    }

    /// A predictor that only ever uses the mock oracle.
    pub fn mock(batch_size: usize) -> Self {
        Self {
            client: ProviderClient::without_credential("mock", MOCK_MODEL_NAME),
            batch_size: batch_size.max(1),
            mode: ExecutionMode::Sequential,
            use_mock: true,
            max_in_flight: None,
        }
    }

    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit.max(1));
        self
    }

    pub fn provider_name(&self) -> &str {
        if self.use_mock {
            "mock"
        } else {
            self.client.provider_name()
        }
    }

    pub fn model_name(&self) -> &str {
        if self.use_mock {
            MOCK_MODEL_NAME
        } else {
            self.client.model_name()
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batch sizes this predictor would use for a population of `n`.
    pub fn batch_sizes(&self, n: usize) -> Vec<usize> {
        partition_sizes(n, self.batch_size)
    }

    /// One 0/1 decision per profile, in population order.
    pub async fn predict_clicks(
        &self,
        ad_text: &str,
        population: &[IdentityProfile],
        platform: Platform,
    ) -> DecisionVector {
        self.predict_clicks_detailed(ad_text, population, platform)
            .await
            .decisions
    }

    /// Like `predict_clicks`, plus batch counts and the failure tally.
    pub async fn predict_clicks_detailed(
        &self,
        ad_text: &str,
        population: &[IdentityProfile],
        platform: Platform,
    ) -> PredictionReport {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "predict",
            %run_id,
            provider = %self.provider_name(),
            model = %self.model_name(),
            mode = %self.mode,
        );
        self.run(ad_text, population, platform).instrument(span).await
    }

    async fn run(
        &self,
        ad_text: &str,
        population: &[IdentityProfile],
        platform: Platform,
    ) -> PredictionReport {
        let batch_count = population.len().div_ceil(self.batch_size);
        let width = match self.mode {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Concurrent => self.max_in_flight.unwrap_or(batch_count).max(1),
        };

        info!(
            profiles = population.len(),
            batches = batch_count,
            batch_size = self.batch_size,
            width,
            live = self.client.is_live() && !self.use_mock,
            "Starting prediction run"
        );

        // Collected up front: the run future must stay `Send` for axum.
        let pending: Vec<BoxFuture<'_, BatchOutcome>> = population
            .chunks(self.batch_size)
            .enumerate()
            .map(|(index, batch)| self.predict_batch(index, ad_text, batch, platform).boxed())
            .collect();
        let outcomes: Vec<BatchOutcome> = stream::iter(pending).buffered(width).collect().await;

        let report = assemble(outcomes);
        debug_assert_eq!(report.decisions.len(), population.len());

        info!(
            profiles = report.decisions.len(),
            clicks = report.clicks(),
            degraded_batches = report.degraded_batches,
            failures = ?report.failures,
            "Prediction run complete"
        );
        report
    }

    async fn predict_batch(
        &self,
        index: usize,
        ad_text: &str,
        batch: &[IdentityProfile],
        platform: Platform,
    ) -> BatchOutcome {
        if self.use_mock {
            return BatchOutcome::mocked(mock::mock_batch(ad_text, batch));
        }
        let outcome = self.client.predict_batch(ad_text, batch, platform).await;
        if let Some(reason) = outcome.reason {
            warn!(
                batch = index,
                batch_size = batch.len(),
                degraded = outcome.degraded,
                %reason,
                "Batch served with fallback"
            );
        }
        outcome
    }
}

/// Sizes of the ordered batches covering `n` profiles.
pub fn partition_sizes(n: usize, batch_size: usize) -> Vec<usize> {
    let batch_size = batch_size.max(1);
    (0..n)
        .step_by(batch_size)
        .map(|start| batch_size.min(n - start))
        .collect()
}

/// Concatenate outcomes in order and tally failure reasons.
fn assemble(outcomes: Vec<BatchOutcome>) -> PredictionReport {
    let mut report = PredictionReport {
        batches: outcomes.len(),
        ..Default::default()
    };
    let mut failures = BTreeMap::new();
    for outcome in outcomes {
        if outcome.degraded {
            report.degraded_batches += 1;
        }
        if let Some(reason) = outcome.reason {
            *failures.entry(reason).or_insert(0) += 1;
        }
        report.decisions.extend(outcome.decisions);
    }
    report.failures = failures;
    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
