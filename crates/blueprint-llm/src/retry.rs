use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::{info, warn};

use blueprint_core::config::{ModelConfig, RetryConfig};
use blueprint_core::error::{BlueprintError, Result};
use blueprint_core::traits::LlmClient;
use blueprint_core::types::*;

/// An LLM client that retries failed requests and falls back to alternative models.
pub struct RetryingClient {
    primary: Box<dyn LlmClient>,
    fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Box<dyn LlmClient>,
        fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }
}

fn is_retryable(e: &BlueprintError) -> bool {
    match e {
        BlueprintError::Upstream(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        BlueprintError::LlmStream(_) => true,
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;

            let mut last_err = None;
            for attempt in 0..=max_retries {
                match self
                    .primary
                    .chat_stream(&config, messages.clone(), &tools)
                    .await
                {
                    Ok(stream) => return Ok(stream),
                    Err(e) => {
                        if is_retryable(&e) && attempt < max_retries {
                            let backoff = calculate_backoff(attempt, &self.retry_config);
                            warn!(
                                attempt = attempt + 1,
                                max_retries,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %e,
                                "Retrying LLM request"
                            );
                            tokio::time::sleep(backoff).await;
                            last_err = Some(e);
                            continue;
                        }
                        last_err = Some(e);
                        break;
                    }
                }
            }

            if !self.fallbacks.is_empty() {
                info!("Primary LLM exhausted, trying fallback models");
            }
            for (fb_config, fb_client) in &self.fallbacks {
                match fb_client
                    .chat_stream(fb_config, messages.clone(), &tools)
                    .await
                {
                    Ok(stream) => {
                        info!(
                            model = %fb_config.model_id,
                            provider = %fb_config.provider,
                            "Fell back to alternative model"
                        );
                        return Ok(stream);
                    }
                    Err(e) => {
                        warn!(
                            model = %fb_config.model_id,
                            error = %e,
                            "Fallback model also failed"
                        );
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| BlueprintError::Upstream("All providers failed".into())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueprint_test_utils::{test_model_config, ScriptedLlm};

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&BlueprintError::Upstream("HTTP 429 Too Many Requests".into())));
        assert!(is_retryable(&BlueprintError::LlmStream("reset".into())));
        assert!(!is_retryable(&BlueprintError::Upstream("HTTP 401 Unauthorized".into())));
        assert!(!is_retryable(&BlueprintError::SchemaViolation {
            schema: "Plan".into(),
            message: "x".into()
        }));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 4000,
        };
        let d = calculate_backoff(8, &config);
        assert!(d <= Duration::from_millis(4800));
        assert!(d >= Duration::from_millis(3200));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let primary = ScriptedLlm::new()
            .fail_with(BlueprintError::Upstream("HTTP 503".into()))
            .text("ok");
        let calls = primary.call_counter();
        let client = RetryingClient::new(Box::new(primary), vec![], fast_retry(2));

        let stream = client
            .chat_stream(&test_model_config(), vec![ChatMessage::user("hi")], &[])
            .await;
        assert!(stream.is_ok());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_skips_retries_and_uses_fallback() {
        let primary = ScriptedLlm::new().fail_with(BlueprintError::Upstream("HTTP 401".into()));
        let primary_calls = primary.call_counter();
        let fallback = ScriptedLlm::new().text("from fallback");

        let client = RetryingClient::new(
            Box::new(primary),
            vec![(test_model_config(), Box::new(fallback) as Box<dyn LlmClient>)],
            fast_retry(3),
        );

        let result = client
            .chat_stream(&test_model_config(), vec![ChatMessage::user("hi")], &[])
            .await;
        assert!(result.is_ok());
        assert_eq!(primary_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_returns_last_error() {
        let primary = ScriptedLlm::new()
            .fail_with(BlueprintError::Upstream("HTTP 502".into()))
            .fail_with(BlueprintError::Upstream("HTTP 503".into()));
        let client = RetryingClient::new(Box::new(primary), vec![], fast_retry(1));

        let err = match client
            .chat_stream(&test_model_config(), vec![ChatMessage::user("hi")], &[])
            .await
        {
            Ok(_) => panic!("expected failure"),
            Err(e) => e,
        };
        assert!(matches!(err, BlueprintError::Upstream(msg) if msg.contains("503")));
    }
}
