//! Prompt construction for batch click decisions.

use super::ChatMessage;
use crate::types::{IdentityProfile, Platform};

/// Fixed system instruction sent with every batch.
pub const SYSTEM_PROMPT: &str = "You are a precise decision engine that outputs strict JSON.";

fn platform_context(platform: Platform) -> &'static str {
    match platform {
        Platform::Facebook => "a sponsored post in their Facebook feed",
        Platform::TikTok => "a short in-feed video ad on TikTok",
        Platform::Amazon => "a sponsored product listing while shopping on Amazon",
    }
}

/// Render the user prompt for one batch.
///
/// Profiles are numbered in batch order; the model is asked for a JSON
/// array with exactly `batch.len()` entries in that same order.
pub fn build_prompt(ad_text: &str, batch: &[IdentityProfile], platform: Platform) -> String {
    let n = batch.len();
    let mut prompt = String::with_capacity(512 + n * 200);

    prompt.push_str(
        "Simulate how each person described below reacts to an online advertisement. \
         For every person, decide whether they would click the ad.\n\n",
    );
    prompt.push_str(&format!("PLATFORM: {platform} ({})\n", platform_context(platform)));
    prompt.push_str(&format!("AD TEXT: \"{}\"\n\n", ad_text.trim()));

    prompt.push_str(&format!("PEOPLE ({n}):\n"));
    for (i, profile) in batch.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, profile));
    }

    prompt.push_str(&format!(
        "\nRespond with ONLY a JSON array of exactly {n} integers, one per person in the \
         order listed above: 1 if the person would click the ad, 0 if not. \
         No explanations, no keys, no code fences.\n"
    ));
    prompt.push_str("Example for 3 people: [0,1,0]\n");

    prompt
}

/// The two-message exchange: system instruction, then the rendered prompt.
pub fn build_messages(prompt: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)]
}
