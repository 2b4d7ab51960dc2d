//! Response parsing and repair.
//!
//! Turns raw model output into exactly one decision per profile. Strict
//! JSON arrays are preferred; truncated arrays are read leniently; missing
//! entries are filled from the mock oracle and extra entries dropped.

use serde_json::Value;
use tracing::debug;

use super::mock;
use crate::types::{BatchOutcome, DecisionVector, FailureReason, IdentityProfile};

/// Parse `raw` for `batch` and repair it to exactly `batch.len()` entries.
pub fn parse_and_validate(raw: &str, ad_text: &str, batch: &[IdentityProfile]) -> BatchOutcome {
    let Some(mut decisions) = extract_decisions(raw) else {
        debug!(raw_len = raw.len(), "No decision array in model output");
        return mock::fallback(ad_text, batch, FailureReason::ResponseMalformed);
    };

    let expected = batch.len();
    let parsed = decisions.len();
    if parsed == expected {
        return BatchOutcome::clean(decisions);
    }

    debug!(expected, parsed, "Decision count mismatch, repairing");
    if parsed > expected {
        decisions.truncate(expected);
        return BatchOutcome {
            decisions,
            degraded: false,
            reason: Some(FailureReason::LengthMismatch),
        };
    }

    decisions.extend(batch[parsed..].iter().map(|p| mock::mock_decide(ad_text, p)));
    BatchOutcome {
        decisions,
        degraded: true,
        reason: Some(FailureReason::LengthMismatch),
    }
}

/// Locate a decision array in free-form text.
///
/// Returns `None` when there is no array or it has no readable entries.
pub fn extract_decisions(raw: &str) -> Option<DecisionVector> {
    let starts: Vec<usize> = raw.match_indices('[').map(|(i, _)| i).collect();

    for &start in &starts {
        if let Some(values) = strict_array(&raw[start..]).filter(|v| !v.is_empty()) {
            return Some(values);
        }
    }

    starts
        .iter()
        .map(|&start| lenient_array(&raw[start + 1..]))
        .find(|values| !values.is_empty())
}

/// A complete JSON array of scalars starting at the beginning of `text`.
/// Trailing text after the array is ignored.
fn strict_array(text: &str) -> Option<DecisionVector> {
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next()? {
        Ok(Value::Array(items)) => items.iter().map(coerce_value).collect(),
        _ => None,
    }
}

/// Comma-separated scalar tokens up to `]` or end of text, stopping at the
/// first token that cannot be read. Handles output cut off mid-array.
fn lenient_array(text: &str) -> DecisionVector {
    let body = text.split(']').next().unwrap_or_default();
    let mut values = Vec::new();
    for token in body.split(',') {
        match coerce_token(token.trim()) {
            Some(v) => values.push(v),
            None => break,
        }
    }
    values
}

/// Scalar JSON value → 0/1. Arrays and objects are not decisions.
fn coerce_value(value: &Value) -> Option<u8> {
    match value {
        Value::Null => Some(0),
        Value::Bool(b) => Some(u8::from(*b)),
        Value::Number(n) => Some(u8::from(n.as_f64().is_some_and(|f| f != 0.0))),
        Value::String(s) => Some(truthy_str(s)),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Bare token from the lenient scan → 0/1.
fn coerce_token(token: &str) -> Option<u8> {
    if token.is_empty() {
        return None;
    }
    if let Some(inner) = token.strip_prefix('"') {
        return inner.strip_suffix('"').map(truthy_str);
    }
    match token.to_ascii_lowercase().as_str() {
        "true" => return Some(1),
        "false" | "null" => return Some(0),
        _ => {}
    }
    token.parse::<f64>().ok().map(|f| u8::from(f != 0.0))
}

fn truthy_str(s: &str) -> u8 {
    let s = s.trim().to_ascii_lowercase();
    if matches!(s.as_str(), "1" | "true" | "yes" | "y" | "click") {
        return 1;
    }
    u8::from(s.parse::<f64>().is_ok_and(|f| f != 0.0))
}
