//! Normalization of free-form backend output into a classification
//!
//! Output that cannot be parsed never resolves to ZOMBIE.

use crate::models::{ClassificationResult, Decision};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::warn;

/// Reasoning recorded when no structured payload could be recovered
pub const PARSE_FAILURE_REASONING: &str = "Failed to parse structured response";

/// Characters of raw text used as reasoning when the payload has none
pub const REASONING_FALLBACK_CHARS: usize = 500;

/// Confidence assumed when the payload omits one
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?is)```(?:json)?\s*(.*?)\s*```").expect("fence pattern is valid")
    })
}

/// Recover the JSON object embedded in backend text
///
/// Takes the inner content of a fenced block when present, then the span
/// from the first `{` to the last `}`. Empty objects count as missing.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let mut candidate = text.trim();

    if candidate.contains("```") {
        if let Some(inner) = fence_pattern().captures(candidate).and_then(|c| c.get(1)) {
            candidate = inner.as_str().trim();
        }
    }

    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    if end < start {
        return None;
    }

    match serde_json::from_str::<Value>(&candidate[start..=end]) {
        Ok(Value::Object(map)) if !map.is_empty() => Some(map),
        Ok(_) => None,
        Err(e) => {
            let preview: String = candidate[start..=end].chars().take(100).collect();
            warn!(error = %e, preview = %preview, "Structured payload failed to decode");
            None
        }
    }
}

/// Turn raw backend text into a trustworthy classification
pub fn normalize(raw_text: &str) -> ClassificationResult {
    let Some(payload) = extract_json_object(raw_text) else {
        return ClassificationResult::fallback(PARSE_FAILURE_REASONING);
    };

    let decision = payload
        .get("decision")
        .and_then(Value::as_str)
        .and_then(Decision::parse)
        .unwrap_or(Decision::Active);

    let reasoning = payload
        .get("reasoning")
        .and_then(Value::as_str)
        .filter(|r| !r.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| raw_text.chars().take(REASONING_FALLBACK_CHARS).collect());

    let confidence = payload
        .get("confidence")
        .and_then(|c| match c {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_CONFIDENCE);

    ClassificationResult {
        decision,
        reasoning,
        confidence,
    }
}
