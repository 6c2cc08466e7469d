//! Success rule evaluation.
//!
//! Checks run in a fixed order and the first failure wins:
//! status code, then latency budget, then JSON pointer.

use std::time::Duration;

use apiwatch_config::{SuccessRule, non_blank};

use crate::result::Reason;

const STATUS_BODY_PREVIEW: usize = 600;
const JSON_BODY_PREVIEW: usize = 400;
const ACTUAL_VALUE_PREVIEW: usize = 120;

/// What was observed for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub status: u16,
    pub www_authenticate: Option<&'a str>,
    pub elapsed: Duration,
    /// Response body, when it was read.
    pub body: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail { reason: Reason, details: String },
}

impl Verdict {
    fn fail(reason: Reason, details: String) -> Self {
        Verdict::Fail { reason, details }
    }
}

/// Cut `text` to at most `max` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Render a JSON value for comparison: strings bare, null empty,
/// everything else as compact JSON.
pub fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Whether the rule needs the response body for anything beyond diagnostics.
pub fn needs_body(rule: &SuccessRule) -> bool {
    non_blank(rule.json_pointer.as_deref()).is_some()
}

/// Evaluate a rule against an observation.
///
/// Fails with a JSON error only when a pointer is configured and the body
/// cannot be parsed; the caller treats that as a probe fault.
pub fn evaluate(rule: &SuccessRule, obs: &Observation<'_>) -> Result<Verdict, serde_json::Error> {
    if !rule.status_codes.contains(&obs.status) {
        let mut details = format!("Got {}", obs.status);
        if let Some(challenge) = non_blank(obs.www_authenticate) {
            details.push_str(&format!(" (WWW-Authenticate: {challenge})"));
        }
        if let Some(body) = non_blank(obs.body) {
            details.push_str(" Body: ");
            details.push_str(&truncate_chars(body, STATUS_BODY_PREVIEW));
        }
        return Ok(Verdict::fail(Reason::BadStatus, details));
    }

    if let Some(max_ms) = rule.max_latency_ms {
        let elapsed_ms = obs.elapsed.as_millis();
        if elapsed_ms > u128::from(max_ms) {
            return Ok(Verdict::fail(
                Reason::Slow,
                format!("{elapsed_ms}ms > {max_ms}ms"),
            ));
        }
    }

    let Some(pointer) = non_blank(rule.json_pointer.as_deref()) else {
        return Ok(Verdict::Pass);
    };

    let text = obs.body.unwrap_or_default();
    let doc: serde_json::Value = serde_json::from_str(text)?;
    let preview = truncate_chars(text, JSON_BODY_PREVIEW);

    let Some(value) = doc.pointer(pointer) else {
        return Ok(Verdict::fail(
            Reason::JsonMismatch,
            format!("Pointer '{pointer}' not found. Body preview: {preview}"),
        ));
    };

    if let Some(expected) = rule.expected_value.as_deref().filter(|e| !e.is_empty()) {
        let actual = json_text(value);
        let matches = if rule.case_insensitive {
            actual.to_lowercase() == expected.to_lowercase()
        } else {
            actual == expected
        };
        if !matches {
            let shown = truncate_chars(&actual, ACTUAL_VALUE_PREVIEW);
            return Ok(Verdict::fail(
                Reason::JsonMismatch,
                format!(
                    "Pointer '{pointer}' value: '{shown}' | Expected: '{expected}'. Body preview: {preview}"
                ),
            ));
        }
    }

    Ok(Verdict::Pass)
}
