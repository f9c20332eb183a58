//! Parsing and validation of raw interpreter payloads.
//!
//! The interpreter answers with a JSON document shaped roughly like
//!
//! ```json
//! {
//!   "validity": { "is_valid_subject": true, "privacy_issue": false, "rejection_reason": null },
//!   "health_score": "B+",
//!   "bristol": { "scale": 4 },
//!   "short_summary": "..."
//! }
//! ```
//!
//! `validity` and `health_score` are lifted into a [`Verdict`]; every other
//! top-level field is kept verbatim in [`AnalysisResult::extra`].

use serde_json::{Map, Value};
use vitalog_storage::{AnalysisResult, FailureReason, ScoreBand, Verdict};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("interpreter returned an empty payload")]
    Empty,
    #[error("unparseable payload: {0}")]
    Unparseable(String),
}

impl PayloadError {
    pub fn reason(&self) -> FailureReason {
        match self {
            PayloadError::Empty => FailureReason::EmptyResponse,
            PayloadError::Unparseable(_) => FailureReason::Unparseable,
        }
    }
}

pub fn parse_payload(raw: &str) -> Result<AnalysisResult, PayloadError> {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err(PayloadError::Empty);
    }

    let mut fields = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Err(PayloadError::Unparseable(format!(
                "expected a JSON object, got {}",
                kind_of(&other)
            )))
        }
        Err(e) => {
            return Err(PayloadError::Unparseable(format!(
                "{e}; payload was: {}",
                truncate(body, 200)
            )))
        }
    };

    let validity = match fields.remove("validity") {
        Some(Value::Object(map)) => map,
        Some(Value::Null) | None => Map::new(),
        Some(other) => {
            return Err(PayloadError::Unparseable(format!(
                "`validity` must be an object, got {}",
                kind_of(&other)
            )))
        }
    };
    let health_score = fields.remove("health_score");

    let verdict = classify(&validity, health_score.as_ref())?;
    Ok(AnalysisResult {
        verdict,
        extra: fields,
    })
}

fn classify(validity: &Map<String, Value>, health_score: Option<&Value>) -> Result<Verdict, PayloadError> {
    let reason = validity
        .get("rejection_reason")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    if flag(validity, "privacy_issue").unwrap_or(false) {
        return Ok(Verdict::RejectedPrivacy { reason });
    }
    let valid_subject = flag(validity, "is_valid_subject")
        .or_else(|| flag(validity, "is_stool"))
        .unwrap_or(true);
    if !valid_subject {
        return Ok(Verdict::RejectedSubjectMismatch { reason });
    }

    let label = health_score
        .and_then(Value::as_str)
        .ok_or_else(|| PayloadError::Unparseable("missing `health_score`".to_string()))?;
    let score_band = ScoreBand::parse(label)
        .ok_or_else(|| PayloadError::Unparseable(format!("unknown score band '{label}'")))?;
    Ok(Verdict::Valid { score_band })
}

/// Booleans sometimes arrive as strings.
fn flag(map: &Map<String, Value>, key: &str) -> Option<bool> {
    match map.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Strip markdown code fences (```json ... ```) from a model answer.
pub fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    if text.starts_with("```") {
        let after_open = match text.find('\n') {
            Some(nl) => &text[nl + 1..],
            None => return text.trim_matches('`').trim(),
        };
        if let Some(close) = after_open.rfind("```") {
            return after_open[..close].trim();
        }
        return after_open.trim();
    }
    text
}

/// Truncate a string for error messages.
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
