//! External collaborators: text recognition and code mapping.
//!
//! Both are opaque, possibly network-backed services. The controller only
//! sees the two traits below; what sits behind them (a vision LLM, a local
//! cipher, a test fake) is chosen when the [`Services`] bundle is built.
//!
//! ```text
//! RasterizedCrop ──▶ TextRecognizer ──▶ text ──▶ CodeMapper ──▶ MappingOutcome
//! ```

pub mod mapping;
pub mod vision;

use crate::config::{DecoderConfig, MapperKind};
use crate::controller::{Effect, Event};
use crate::error::DecoderError;
use crate::pipeline::encode::EncodedImage;
use async_trait::async_trait;
use edgequake_llm::{LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub use mapping::{CharlestonCipher, LlmCodeMapper};
pub use vision::VisionRecognizer;

/// Failure of an external service call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    /// The call did not finish within the configured timeout.
    #[error("{service} timed out after {secs}s")]
    Timeout { service: &'static str, secs: u64 },

    /// The provider returned an error (after transport retries).
    #[error("{service} failed: {detail}")]
    Provider {
        service: &'static str,
        detail: String,
    },

    /// The provider answered, but not in the expected shape.
    #[error("{service} returned an unreadable reply: {detail}")]
    InvalidReply {
        service: &'static str,
        detail: String,
    },
}

/// Reply of a [`CodeMapper`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingOutcome {
    pub should_map: bool,
    #[serde(default)]
    pub numerical_code: String,
}

impl MappingOutcome {
    pub fn mapped(code: impl Into<String>) -> Self {
        Self {
            should_map: true,
            numerical_code: code.into(),
        }
    }

    pub fn declined() -> Self {
        Self::default()
    }
}

/// Extracts text from one encoded image.
///
/// `Ok(None)` and `Ok(Some(""))` both mean "no text"; the controller treats
/// them identically and never as an error.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &EncodedImage) -> Result<Option<String>, ServiceError>;
}

/// Turns recognised text into a digit code.
#[async_trait]
pub trait CodeMapper: Send + Sync {
    async fn map(&self, text: &str) -> Result<MappingOutcome, ServiceError>;
}

/// The pair of services a pipeline run talks to.
#[derive(Clone)]
pub struct Services {
    pub recognizer: Arc<dyn TextRecognizer>,
    pub mapper: Arc<dyn CodeMapper>,
}

impl Services {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, mapper: Arc<dyn CodeMapper>) -> Self {
        Self { recognizer, mapper }
    }

    /// Build the services described by `config`, resolving the LLM provider.
    pub fn from_config(config: &DecoderConfig) -> Result<Self, DecoderError> {
        let provider = resolve_provider(config)?;
        let recognizer: Arc<dyn TextRecognizer> =
            Arc::new(VisionRecognizer::new(Arc::clone(&provider), config));
        let mapper: Arc<dyn CodeMapper> = match config.mapper {
            MapperKind::Llm => Arc::new(LlmCodeMapper::new(provider, config)),
            MapperKind::Cipher => Arc::new(CharlestonCipher),
        };
        Ok(Self::new(recognizer, mapper))
    }

    /// Perform one controller effect and turn its result into the event
    /// that reports it back, tagged with the effect's run.
    pub async fn execute(&self, effect: Effect) -> Event {
        match effect {
            Effect::Recognize { run, image } => {
                debug!("{run}: recognising {} bytes ({})", image.len(), image.mime_type());
                let result = self.recognizer.recognize(&image).await;
                Event::RecognitionFinished { run, result }
            }
            Effect::Map { run, text } => {
                debug!("{run}: mapping {} chars of text", text.len());
                let result = self.mapper.map(&text).await;
                Event::MappingFinished { run, result }
            }
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("recognizer", &"<dyn TextRecognizer>")
            .field("mapper", &"<dyn CodeMapper>")
            .finish()
    }
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** via [`ProviderFactory::from_env`].
pub fn resolve_provider(config: &DecoderConfig) -> Result<Arc<dyn LLMProvider>, DecoderError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DecoderError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// Vision model used when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, DecoderError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DecoderError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
