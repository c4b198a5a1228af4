pub mod providers;
pub mod retry;
pub mod streaming;
pub mod structured;

use blueprint_core::config::{AppConfig, ModelConfig};
use blueprint_core::error::{BlueprintError, Result};
use blueprint_core::traits::LlmClient;

pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;
pub use structured::StructuredClient;

/// Create an LLM client based on the provider name.
pub fn create_client(config: &ModelConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        // Only the OpenAI wire format is spoken
        "anthropic" | "claude" | "gemini" | "bedrock" => {
            Err(BlueprintError::UnsupportedProvider(config.provider.clone()))
        }
        _ => Ok(Box::new(OpenAiClient::new())),
    }
}

/// Build the client for an app config: the primary model wrapped with retry
/// and the configured fallback models.
pub fn build_client(config: &AppConfig) -> Result<Box<dyn LlmClient>> {
    let primary = create_client(&config.model)?;

    let mut fallbacks = Vec::with_capacity(config.fallback_models.len());
    for fb in &config.fallback_models {
        fallbacks.push((fb.clone(), create_client(fb)?));
    }

    Ok(Box::new(RetryingClient::new(
        primary,
        fallbacks,
        config.model.retry.clone().unwrap_or_default(),
    )))
}
