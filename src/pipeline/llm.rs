//! LLM interaction: one completion call with timeout and retry.
//!
//! Prompt text lives in [`crate::prompts`]; message layout lives with each
//! service. This module only owns the call itself.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient. Exponential backoff
//! (`retry_backoff_ms * 2^attempt`) with a 500 ms base and 2 retries waits
//! 500 ms then 1 s. Each attempt is bounded by `api_timeout_secs`; a timed
//! out attempt counts as a failure like any other.

use crate::config::DecoderConfig;
use crate::services::ServiceError;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Call settings copied out of [`DecoderConfig`] so services don't hold the
/// whole config.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSettings {
    pub temperature: f32,
    pub max_tokens: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub api_timeout_secs: u64,
}

impl From<&DecoderConfig> for CallSettings {
    fn from(config: &DecoderConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout_secs: config.api_timeout_secs,
        }
    }
}

impl Default for CallSettings {
    fn default() -> Self {
        Self::from(&DecoderConfig::default())
    }
}

/// Send `messages` and return the reply text.
///
/// `service` names the caller in logs and errors. Only the last failure is
/// reported once retries are exhausted.
pub async fn complete(
    provider: &Arc<dyn LLMProvider>,
    messages: &[ChatMessage],
    settings: &CallSettings,
    service: &'static str,
) -> Result<String, ServiceError> {
    let start = Instant::now();
    let options = build_options(settings);
    let limit = Duration::from_secs(settings.api_timeout_secs);

    let mut last_err = ServiceError::Provider {
        service,
        detail: "Unknown error".to_string(),
    };

    for attempt in 0..=settings.max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(settings.retry_backoff_ms, attempt);
            warn!(
                "{}: retry {}/{} after {}ms",
                service, attempt, settings.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(limit, provider.chat(messages, Some(&options))).await {
            Ok(Ok(response)) => {
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    service,
                    response.prompt_tokens,
                    response.completion_tokens,
                    start.elapsed()
                );
                return Ok(response.content);
            }
            Ok(Err(e)) => {
                warn!("{}: attempt {} failed: {}", service, attempt + 1, e);
                last_err = ServiceError::Provider {
                    service,
                    detail: e.to_string(),
                };
            }
            Err(_) => {
                warn!(
                    "{}: attempt {} timed out after {}s",
                    service,
                    attempt + 1,
                    settings.api_timeout_secs
                );
                last_err = ServiceError::Timeout {
                    service,
                    secs: settings.api_timeout_secs,
                };
            }
        }
    }

    Err(last_err)
}

/// Build `CompletionOptions` from the call settings.
/// Delay before retry number `attempt` (1-based), saturating at `u64::MAX`.
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor)
}

fn build_options(settings: &CallSettings) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(settings.temperature),
        max_tokens: Some(settings.max_tokens),
        ..Default::default()
    }
}
