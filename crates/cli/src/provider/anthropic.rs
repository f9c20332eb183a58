//! Anthropic Messages API provider.

use std::path::Path;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use vitalog_pipeline::{
    strip_code_fences, truncate, AnalysisContext, InterpretError, Interpreter, SummarizeError,
    Summarizer, SummaryContext, WindowStats,
};
use vitalog_storage::{Narrative, ObservationRecord};

use super::prompt;

/// Anthropic Messages API endpoint.
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Required API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub(crate) struct AnthropicProvider {
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub(crate) fn new(api_key: String, model: String, max_tokens: u32) -> Self {
        Self {
            api_key,
            model,
            max_tokens,
        }
    }

    /// ureq is synchronous, so the call runs on the blocking pool.
    async fn complete(&self, system: String, content: serde_json::Value) -> Result<String, CallError> {
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system,
            messages: vec![ApiMessage {
                role: "user".to_string(),
                content,
            }],
        };
        let api_key = self.api_key.clone();
        tokio::task::spawn_blocking(move || call_anthropic_api(&api_key, &request))
            .await
            .map_err(|e| CallError::Transport(format!("task join error: {e}")))?
    }
}

#[async_trait]
impl Interpreter for AnthropicProvider {
    async fn interpret(
        &self,
        image_ref: &str,
        context: &AnalysisContext,
    ) -> Result<String, InterpretError> {
        let image = image_block(image_ref).await?;
        let content = serde_json::json!([
            image,
            { "type": "text", "text": prompt::analysis_user(context) },
        ]);
        interpret_text(self.complete(prompt::analysis_system(), content).await)
    }
}

/// A reply without any text block is an empty payload, classified downstream
/// like any other empty answer.
fn interpret_text(result: Result<String, CallError>) -> Result<String, InterpretError> {
    match result {
        Ok(text) => Ok(text),
        Err(CallError::NoText) => Ok(String::new()),
        Err(CallError::Transport(msg)) => Err(InterpretError::Unavailable(msg)),
        Err(CallError::Http { status, message }) => Err(InterpretError::Http { status, message }),
    }
}

#[async_trait]
impl Summarizer for AnthropicProvider {
    async fn summarize(
        &self,
        stats: &WindowStats,
        observations: &[ObservationRecord],
        context: &SummaryContext,
    ) -> Result<Narrative, SummarizeError> {
        let content = serde_json::json!([
            { "type": "text", "text": prompt::summary_user(stats, observations, context) },
        ]);
        let text = self
            .complete(prompt::summary_system(), content)
            .await
            .map_err(|e| match e {
                CallError::Transport(msg) => SummarizeError::Unavailable(msg),
                CallError::Http { status, message } => SummarizeError::Http { status, message },
                CallError::NoText => {
                    SummarizeError::Malformed("response carried no text content".to_string())
                }
            })?;
        parse_narrative(&text)
    }
}

// ── Request construction ────────────────────────────────────────────────────

/// A URL image source for remote references, otherwise the file inlined as
/// base64.
async fn image_block(image_ref: &str) -> Result<serde_json::Value, InterpretError> {
    if image_ref.starts_with("http://") || image_ref.starts_with("https://") {
        return Ok(serde_json::json!({
            "type": "image",
            "source": { "type": "url", "url": image_ref },
        }));
    }

    let path = image_ref.to_string();
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| InterpretError::Image(format!("could not read '{path}': {e}")))?;
    Ok(serde_json::json!({
        "type": "image",
        "source": {
            "type": "base64",
            "media_type": media_type(Path::new(&path)),
            "data": BASE64.encode(bytes),
        },
    }))
}

fn media_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

// ── API call ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<ApiMessage>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: String,
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug)]
enum CallError {
    Transport(String),
    Http { status: u16, message: String },
    NoText,
}

fn call_anthropic_api(api_key: &str, request: &MessagesRequest) -> Result<String, CallError> {
    let agent = ureq::Agent::new_with_defaults();
    let response = agent
        .post(ANTHROPIC_API_URL)
        .header("x-api-key", api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header("content-type", "application/json")
        .send_json(request)
        .map_err(|e| match e {
            ureq::Error::StatusCode(status) => CallError::Http {
                status,
                message: "request rejected by provider".to_string(),
            },
            other => CallError::Transport(format!("API request failed: {other}")),
        })?;

    let resp: MessagesResponse = response
        .into_body()
        .read_json()
        .map_err(|e| CallError::Transport(format!("failed to read API response: {e}")))?;

    // An empty text block is passed through: the pipeline classifies it.
    resp.content
        .into_iter()
        .find(|block| block.block_type == "text")
        .and_then(|block| block.text)
        .ok_or(CallError::NoText)
}

// ── Response parsing ─────────────────────────────────────────────────────────

fn parse_narrative(text: &str) -> Result<Narrative, SummarizeError> {
    let body = strip_code_fences(text);
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value @ serde_json::Value::Object(_)) => Ok(Narrative(value)),
        Ok(_) => Err(SummarizeError::Malformed(format!(
            "expected a JSON object, got: {}",
            truncate(body, 200)
        ))),
        Err(e) => Err(SummarizeError::Malformed(format!(
            "{e}. Response was: {}",
            truncate(body, 200)
        ))),
    }
}
