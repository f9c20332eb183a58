//! Interpreter/summarizer implementations behind the pipeline's traits.

mod anthropic;
mod mock;
mod prompt;

use std::sync::Arc;

use vitalog_pipeline::{Interpreter, Summarizer};

pub(crate) use anthropic::AnthropicProvider;
pub(crate) use mock::MockProvider;

use crate::config::ProviderConfig;

/// The configured provider as both trait objects. Falls back to the mock
/// provider when no API key is available.
pub(crate) fn build(config: &ProviderConfig) -> (Arc<dyn Interpreter>, Arc<dyn Summarizer>) {
    match config.api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => {
            tracing::info!(model = %config.model, "using Anthropic provider");
            let provider = Arc::new(AnthropicProvider::new(
                key.to_string(),
                config.model.clone(),
                config.max_tokens,
            ));
            let interpreter: Arc<dyn Interpreter> = provider.clone();
            (interpreter, provider)
        }
        None => {
            tracing::info!("no provider API key configured; using mock provider");
            let provider = Arc::new(MockProvider);
            let interpreter: Arc<dyn Interpreter> = provider.clone();
            (interpreter, provider)
        }
    }
}
