//! Seams to the external AI collaborators.
//!
//! The pipeline never talks to a model directly. It hands an image reference
//! to an [`Interpreter`] and a closed window to a [`Summarizer`], and treats
//! whatever comes back as untrusted input.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vitalog_storage::{Narrative, ObservationRecord};

use crate::trend::WindowStats;

/// Language the provider should answer in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Zh,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Zh => "zh",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Language::En),
            "zh" | "chinese" => Ok(Language::Zh),
            other => Err(format!("unsupported language '{other}' (expected en or zh)")),
        }
    }
}

/// Caller-supplied context for a single interpretation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisContext {
    #[serde(default)]
    pub language: Language,
    /// Opaque description of the subject (age, diet, and so on).
    #[serde(default)]
    pub profile: Option<serde_json::Value>,
}

/// Caller-supplied context for a window summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryContext {
    #[serde(default)]
    pub language: Language,
    /// Human label for the window, e.g. "2024-01-01 to 2024-01-07".
    #[serde(default)]
    pub period_label: String,
}

#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("image unavailable: {0}")]
    Image(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("narrative could not be parsed: {0}")]
    Malformed(String),
}

/// Single-shot interpretation of one image.
///
/// Returns the raw textual payload. Parsing and validation happen in the
/// coordinator so that malformed answers are classified uniformly.
#[async_trait]
pub trait Interpreter: Send + Sync + 'static {
    async fn interpret(
        &self,
        image_ref: &str,
        context: &AnalysisContext,
    ) -> Result<String, InterpretError>;
}

/// Narrative generation over a closed window.
#[async_trait]
pub trait Summarizer: Send + Sync + 'static {
    async fn summarize(
        &self,
        stats: &WindowStats,
        observations: &[ObservationRecord],
        context: &SummaryContext,
    ) -> Result<Narrative, SummarizeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_parses_codes_and_names() {
        assert_eq!("ZH".parse::<Language>(), Ok(Language::Zh));
        assert_eq!("english".parse::<Language>(), Ok(Language::En));
        assert!("fr".parse::<Language>().is_err());
    }

    #[test]
    fn analysis_context_defaults_to_english() {
        let ctx: AnalysisContext = serde_json::from_str("{}").unwrap();
        assert_eq!(ctx.language, Language::En);
        assert!(ctx.profile.is_none());
    }
}
