//! Deterministic mock oracle.
//!
//! Network-free click decisions used for explicit mock runs and as the
//! fallback for every provider failure. A click propensity is derived from
//! profile attributes and ad wording, then compared with a uniform value
//! taken from a SHA-256 digest of the ad text and profile, so identical
//! inputs always produce identical decisions.

use sha2::{Digest, Sha256};

use crate::types::{BatchOutcome, DecisionVector, FailureReason, IdentityProfile};

/// Baseline propensity before any attribute adjustments.
const BASE_PROPENSITY: f64 = 0.12;

const MIN_PROPENSITY: f64 = 0.01;
const MAX_PROPENSITY: f64 = 0.85;

/// Word prefixes marking a credit or lending ad. "apr" is matched whole.
const FINANCE_STEMS: &[&str] = &["credit", "loan", "refinanc", "debt"];

/// Wording that tends to lift response rates.
const PROMO_WORDS: &[&str] = &["free", "discount", "sale", "% off", "deal", "limited", "offer", "save"];

/// Click decision for one profile. Never fails, never does I/O.
pub fn mock_decide(ad_text: &str, profile: &IdentityProfile) -> u8 {
    let p = click_propensity(ad_text, profile);
    u8::from(stable_uniform(ad_text, profile) < p)
}

/// Mock decisions for a whole batch, in batch order.
pub fn mock_batch(ad_text: &str, batch: &[IdentityProfile]) -> DecisionVector {
    batch.iter().map(|p| mock_decide(ad_text, p)).collect()
}

/// Whole-batch fallback tagged with `reason`.
pub fn fallback(ad_text: &str, batch: &[IdentityProfile], reason: FailureReason) -> BatchOutcome {
    BatchOutcome::fallback(mock_batch(ad_text, batch), reason)
}

/// Probability-like score in `[MIN_PROPENSITY, MAX_PROPENSITY]`.
pub fn click_propensity(ad_text: &str, profile: &IdentityProfile) -> f64 {
    let ad = ad_text.to_lowercase();
    let mut p = BASE_PROPENSITY;

    // Younger audiences engage more with display ads.
    p += match profile.age {
        0..=24 => 0.06,
        25..=39 => 0.03,
        40..=59 => 0.0,
        _ => -0.03,
    };

    if PROMO_WORDS.iter().any(|w| ad.contains(w)) {
        p += 0.05;
    }

    // Debt-heavy profiles respond to credit and finance offers.
    let finance_ad = words(&ad)
        .any(|w| w == "apr" || FINANCE_STEMS.iter().any(|stem| w.starts_with(stem)));
    if finance_ad && profile.liability_status > profile.annual_salary * 0.3 {
        p += 0.10;
    }

    if profile.annual_salary >= 100_000.0 && ["premium", "luxury", "travel"].iter().any(|w| ad.contains(w)) {
        p += 0.06;
    }

    if profile.is_married && ["family", "kids", "home"].iter().any(|w| ad.contains(w)) {
        p += 0.05;
    }

    if mentions_any(&ad, &profile.occupation) {
        p += 0.12;
    }

    if let Some(illness) = &profile.illness {
        if mentions_any(&ad, illness) || ad.contains("health") {
            p += 0.15;
        }
    }

    p.clamp(MIN_PROPENSITY, MAX_PROPENSITY)
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty())
}

/// True if any word (4+ chars) of `phrase` appears in the ad text.
fn mentions_any(ad_lower: &str, phrase: &str) -> bool {
    phrase
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 4)
        .any(|w| ad_lower.contains(w))
}

/// Uniform value in `[0, 1)` from the digest of ad text and profile.
fn stable_uniform(ad_text: &str, profile: &IdentityProfile) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(ad_text.as_bytes());
    hasher.update([0u8]);
    hasher.update(profile.to_string().as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    // Top 53 bits give an exact f64 in [0, 1).
    (u64::from_be_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64
}
