//! Synthetic identity sampling.
//!
//! Reads a JSON identity bank describing per-attribute distributions and
//! draws reproducible populations from it. Sampling is seeded with ChaCha8
//! so the same `(n, bank, seed)` always yields the same profiles.

use anyhow::{bail, Context, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::types::IdentityProfile;

/// Rejection draws before the truncated normal falls back to clamping.
const MAX_NORMAL_DRAWS: usize = 8;

// ---------------------------------------------------------------------------
// Bank schema
// ---------------------------------------------------------------------------

/// Declarative distribution bank, one section per profile attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityBank {
    pub gender: Categorical,
    pub age: IntNormal,
    pub region: RegionSet,
    pub occupation: Categorical,
    pub annual_salary: Bucketed,
    pub liability_status: Bucketed,
    pub is_married: BoolDist,
    pub health_status: HealthDist,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Categorical {
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probs: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntNormal {
    #[serde(default = "default_mean")]
    pub mean: f64,
    #[serde(default = "default_std")]
    pub std: f64,
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_max")]
    pub max: f64,
}

fn default_mean() -> f64 {
    40.0
}
fn default_std() -> f64 {
    12.0
}
fn default_max() -> f64 {
    120.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionSet {
    #[serde(default)]
    pub values: Vec<Region>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    #[serde(default = "default_city")]
    pub city: String,
    #[serde(default)]
    pub state: String,
}

fn default_city() -> String {
    "Unknown".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucketed {
    #[serde(default)]
    pub buckets: Vec<Bucket>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    #[serde(default)]
    pub min: f64,
    /// Defaults to `min` when absent.
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoolDist {
    #[serde(default = "default_p_true")]
    pub p_true: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDist {
    #[serde(default = "default_p_true")]
    pub p_true: f64,
    #[serde(default)]
    pub values: Vec<String>,
}

fn default_p_true() -> f64 {
    0.5
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl IdentityBank {
    /// Load an identity bank JSON file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read identity bank: {}", path.display()))?;
        let bank = Self::from_json(&json)
            .with_context(|| format!("Failed to parse identity bank: {}", path.display()))?;
        info!(path = %path.display(), "Identity bank loaded");
        Ok(bank)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let bank: IdentityBank = serde_json::from_str(json)?;
        bank.validate()?;
        Ok(bank)
    }

    /// Reject banks that could never produce a profile.
    pub fn validate(&self) -> Result<()> {
        self.gender.validate("gender")?;
        self.occupation.validate("occupation")?;
        if self.region.values.is_empty() {
            bail!("region.values empty");
        }
        self.annual_salary.validate("annual_salary")?;
        self.liability_status.validate("liability_status")?;
        Ok(())
    }
}

impl Categorical {
    fn validate(&self, name: &str) -> Result<()> {
        if self.values.is_empty() {
            bail!("{name}: categorical values empty");
        }
        if let Some(probs) = &self.probs {
            if probs.len() != self.values.len() {
                bail!("{name}: values and probs length mismatch");
            }
            self.weights(name)?;
        }
        Ok(())
    }

    /// Index distribution over `values`, or `None` for a uniform draw.
    fn weights(&self, name: &str) -> Result<Option<WeightedIndex<f64>>> {
        self.probs
            .as_ref()
            .map(|probs| {
                WeightedIndex::new(probs).with_context(|| format!("{name}: invalid probs"))
            })
            .transpose()
    }
}

impl Bucketed {
    fn validate(&self, name: &str) -> Result<()> {
        if self.buckets.is_empty() {
            bail!("{name}: float_bucketed requires 'buckets'");
        }
        self.weights(name).map(|_| ())
    }

    fn weights(&self, name: &str) -> Result<WeightedIndex<f64>> {
        WeightedIndex::new(self.buckets.iter().map(|b| b.weight))
            .with_context(|| format!("{name}: invalid bucket weights"))
    }
}

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

/// Sample `n` identities from `bank`. `None` seeds from entropy.
pub fn sample_identities(n: usize, bank: &IdentityBank, seed: Option<u64>) -> Result<Vec<IdentityProfile>> {
    let sampler = IdentitySampler::new(bank)?;
    let mut rng = match seed {
        Some(s) => ChaCha8Rng::seed_from_u64(s),
        None => ChaCha8Rng::from_entropy(),
    };
    let profiles: Vec<IdentityProfile> = (0..n).map(|_| sampler.sample(&mut rng)).collect();
    debug!(count = profiles.len(), ?seed, "Identities sampled");
    Ok(profiles)
}

/// A validated bank with its weighted distributions built once.
pub struct IdentitySampler<'a> {
    bank: &'a IdentityBank,
    gender: Option<WeightedIndex<f64>>,
    occupation: Option<WeightedIndex<f64>>,
    annual_salary: WeightedIndex<f64>,
    liability_status: WeightedIndex<f64>,
}

impl<'a> IdentitySampler<'a> {
    pub fn new(bank: &'a IdentityBank) -> Result<Self> {
        bank.validate()?;
        Ok(Self {
            bank,
            gender: bank.gender.weights("gender")?,
            occupation: bank.occupation.weights("occupation")?,
            annual_salary: bank.annual_salary.weights("annual_salary")?,
            liability_status: bank.liability_status.weights("liability_status")?,
        })
    }

    /// Draw a single profile.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> IdentityProfile {
        let bank = self.bank;
        let gender = sample_categorical(&bank.gender, self.gender.as_ref(), rng);
        let age = sample_int_normal(&bank.age, rng);
        let region = sample_region(&bank.region, rng);
        let occupation = sample_categorical(&bank.occupation, self.occupation.as_ref(), rng);
        let annual_salary = round2(sample_bucketed(&bank.annual_salary, &self.annual_salary, rng));
        let liability_status =
            round2(sample_bucketed(&bank.liability_status, &self.liability_status, rng));
        let is_married = rng.gen::<f64>() < bank.is_married.p_true;
        let (health_status, illness) = sample_health(&bank.health_status, rng);

        IdentityProfile {
            gender,
            age,
            region,
            occupation,
            annual_salary,
            liability_status,
            is_married,
            health_status,
            illness,
        }
    }
}

fn sample_categorical<R: Rng>(
    cfg: &Categorical,
    weights: Option<&WeightedIndex<f64>>,
    rng: &mut R,
) -> String {
    match weights {
        Some(dist) => cfg.values[dist.sample(rng)].clone(),
        None => cfg.values.choose(rng).cloned().unwrap_or_default(),
    }
}

/// Standard normal via Box-Muller.
fn gauss<R: Rng>(mean: f64, std: f64, rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>(); // (0, 1]
    let u2: f64 = rng.gen::<f64>();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std * z
}

fn sample_int_normal<R: Rng>(cfg: &IntNormal, rng: &mut R) -> u32 {
    let (lo, hi) = (cfg.min.min(cfg.max), cfg.max.max(cfg.min));
    for _ in 0..MAX_NORMAL_DRAWS {
        let x = gauss(cfg.mean, cfg.std, rng);
        if (lo..=hi).contains(&x) {
            return x.round().max(0.0) as u32;
        }
    }
    gauss(cfg.mean, cfg.std, rng).clamp(lo, hi).round().max(0.0) as u32
}

fn sample_bucketed<R: Rng>(cfg: &Bucketed, dist: &WeightedIndex<f64>, rng: &mut R) -> f64 {
    let bucket = &cfg.buckets[dist.sample(rng)];
    let mut lo = bucket.min;
    let mut hi = bucket.max.unwrap_or(lo);
    if hi < lo {
        std::mem::swap(&mut lo, &mut hi);
    }
    rng.gen::<f64>() * (hi - lo) + lo
}

fn sample_region<R: Rng>(cfg: &RegionSet, rng: &mut R) -> String {
    match cfg.values.choose(rng) {
        Some(r) if !r.state.is_empty() => format!("{}, {}", r.city, r.state),
        Some(r) => r.city.clone(),
        None => default_city(),
    }
}

fn sample_health<R: Rng>(cfg: &HealthDist, rng: &mut R) -> (bool, Option<String>) {
    let has_condition = rng.gen::<f64>() < cfg.p_true;
    if !has_condition {
        return (false, None);
    }
    let candidates: Vec<&String> = cfg
        .values
        .iter()
        .filter(|v| !v.eq_ignore_ascii_case("none"))
        .collect();
    (true, candidates.choose(rng).map(|s| (*s).clone()))
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
