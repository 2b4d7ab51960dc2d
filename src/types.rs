//! Shared types for CTR Studio.
//!
//! These types form the data model used across the sampler, the LLM
//! providers, the prediction engine and the HTTP layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Identity profile
// ---------------------------------------------------------------------------

/// One synthetic person drawn from the identity bank.
///
/// Read-only to the prediction engine; created once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub gender: String,
    pub age: u32,
    /// "City, ST" or just "City".
    pub region: String,
    pub occupation: String,
    pub annual_salary: f64,
    pub liability_status: f64,
    pub is_married: bool,
    /// True when the person has a health condition.
    pub health_status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub illness: Option<String>,
}

impl fmt::Display for IdentityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gender={}, age={}, region={}, occupation={}, annual_salary={:.2}, \
             liability_status={:.2}, is_married={}, health_status={}",
            self.gender,
            self.age,
            self.region,
            self.occupation,
            self.annual_salary,
            self.liability_status,
            self.is_married,
            self.health_status,
        )?;
        if let Some(illness) = &self.illness {
            write!(f, ", illness={illness}")?;
        }
        Ok(())
    }
}

impl IdentityProfile {
    /// Helper to build a test/sample profile with sensible defaults.
    #[cfg(test)]
    pub fn sample() -> Self {
        IdentityProfile {
            gender: "female".to_string(),
            age: 34,
            region: "Austin, TX".to_string(),
            occupation: "Software Engineer".to_string(),
            annual_salary: 125_000.0,
            liability_status: 18_500.0,
            is_married: true,
            health_status: false,
            illness: None,
        }
    }
}

/// Ordered sequence of 0/1 click decisions, one per profile.
pub type DecisionVector = Vec<u8>;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Platform the ad is shown on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Facebook,
    TikTok,
    Amazon,
}

impl Platform {
    pub const ALL: &'static [Platform] = &[Platform::Facebook, Platform::TikTok, Platform::Amazon];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::TikTok => "tiktok",
            Platform::Amazon => "amazon",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "facebook" => Ok(Platform::Facebook),
            "tiktok" => Ok(Platform::TikTok),
            "amazon" => Ok(Platform::Amazon),
            _ => Err(ConfigError::UnknownPlatform(s.to_string())),
        }
    }
}

/// How batches are dispatched to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One batch at a time, in order.
    Sequential,
    /// All batches in flight at once, joined in input order.
    Concurrent,
}

impl ExecutionMode {
    /// Human-readable label used in API responses.
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionMode::Sequential => "synchronous sequential",
            ExecutionMode::Concurrent => "asynchronous parallel",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Concurrent => write!(f, "concurrent"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" | "sync" => Ok(ExecutionMode::Sequential),
            "concurrent" | "async" => Ok(ExecutionMode::Concurrent),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Degradation
// ---------------------------------------------------------------------------

/// Why a batch (or part of one) was served by the mock oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ApiKeyMissing,
    ClientInitFailed,
    ApiCallFailed,
    ResponseMalformed,
    /// The model returned the wrong number of decisions and the batch was
    /// truncated or padded.
    LengthMismatch,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ApiKeyMissing => write!(f, "API key missing"),
            FailureReason::ClientInitFailed => write!(f, "client init failed"),
            FailureReason::ApiCallFailed => write!(f, "API call failed"),
            FailureReason::ResponseMalformed => write!(f, "response malformed"),
            FailureReason::LengthMismatch => write!(f, "response length mismatch"),
        }
    }
}

/// Result of predicting a single batch.
///
/// Every stage of the provider protocol produces one of these, so the
/// degradation cascade never needs error propagation.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub decisions: DecisionVector,
    /// True if any decision came from the mock oracle.
    pub degraded: bool,
    pub reason: Option<FailureReason>,
}

impl BatchOutcome {
    /// Decisions produced entirely by the model.
    pub fn clean(decisions: DecisionVector) -> Self {
        Self {
            decisions,
            degraded: false,
            reason: None,
        }
    }

    /// Decisions produced entirely by the mock oracle on purpose (mock mode).
    pub fn mocked(decisions: DecisionVector) -> Self {
        Self::clean(decisions)
    }

    /// Decisions produced entirely by the mock oracle after a failure.
    pub fn fallback(decisions: DecisionVector, reason: FailureReason) -> Self {
        Self {
            decisions,
            degraded: true,
            reason: Some(reason),
        }
    }
}

/// Full output of one prediction run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PredictionReport {
    pub decisions: DecisionVector,
    pub batches: usize,
    pub degraded_batches: usize,
    /// Count of batches per failure reason.
    pub failures: BTreeMap<FailureReason, usize>,
}

impl PredictionReport {
    pub fn clicks(&self) -> usize {
        self.decisions.iter().filter(|&&d| d == 1).count()
    }

    pub fn ctr(&self) -> f64 {
        compute_ctr(&self.decisions)
    }
}

/// Fraction of decisions that are clicks. Empty input yields 0.0.
pub fn compute_ctr(clicks: &[u8]) -> f64 {
    if clicks.is_empty() {
        return 0.0;
    }
    clicks.iter().filter(|&&c| c != 0).count() as f64 / clicks.len() as f64
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Request/configuration errors. These are the only errors that reject a
/// prediction run; everything else degrades to the mock oracle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid provider '{0}'. Must be one of: {1:?}")]
    UnknownProvider(String, Vec<String>),

    #[error("Invalid ad_platform '{0}'. Must be one of: [\"facebook\", \"tiktok\", \"amazon\"]")]
    UnknownPlatform(String),

    #[error("Invalid execution mode '{0}'. Must be 'sequential' or 'concurrent'")]
    UnknownMode(String),

    #[error("batch_size must be a positive integer")]
    ZeroBatchSize,

    #[error("Invalid request: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
