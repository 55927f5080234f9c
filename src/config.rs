//! Configuration types for price decoding.
//!
//! All decoder behaviour is controlled through [`DecoderConfig`], built via
//! its [`DecoderConfigBuilder`]. Geometry limits feed the controller; the
//! LLM fields feed the recognition and mapping services.

use crate::error::DecoderError;
use crate::geometry::{DEFAULT_MAX_SURFACE_PIXELS, MIN_DIMENSION};
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Configuration for a decoder session or one-shot decode.
///
/// Built via [`DecoderConfig::builder()`] or using
/// [`DecoderConfig::default()`].
///
/// # Example
/// ```rust
/// use charleston_decoder::{DecoderConfig, MapperKind};
///
/// let config = DecoderConfig::builder()
///     .mapper(MapperKind::Cipher)
///     .model("gpt-4.1-nano")
///     .api_timeout_secs(30)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct DecoderConfig {
    /// Smallest crop width or height accepted, in displayed pixels. Default: 20.
    pub min_crop_dimension: f64,

    /// Upper bound on the rasterised surface's pixel count. Default: 50 000 000.
    ///
    /// A huge device pixel ratio times a huge crop would otherwise try to
    /// allocate gigabytes.
    pub max_surface_pixels: u64,

    /// Which service turns recognised text into a digit code. Default: [`MapperKind::Llm`].
    pub mapper: MapperKind,

    /// LLM model identifier, e.g. "gpt-4.1-nano".
    /// If None, uses [`crate::services::DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the environment is consulted.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Transcribing a price tag has exactly one right answer.
    pub temperature: f32,

    /// Maximum tokens per LLM reply. Default: 1024.
    pub max_tokens: usize,

    /// Transport-level retries for one LLM call. Default: 2.
    ///
    /// These happen inside a single service call. The controller itself
    /// never retries a run.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-LLM-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Custom recognition prompt. If None, uses the built-in OCR prompt.
    pub recognition_prompt: Option<String>,

    /// Custom mapping prompt. If None, uses the built-in Charleston prompt.
    pub mapping_prompt: Option<String>,

    /// Observer for transitions and stages.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            min_crop_dimension: MIN_DIMENSION,
            max_surface_pixels: DEFAULT_MAX_SURFACE_PIXELS,
            mapper: MapperKind::default(),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 1024,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            recognition_prompt: None,
            mapping_prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for DecoderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderConfig")
            .field("min_crop_dimension", &self.min_crop_dimension)
            .field("max_surface_pixels", &self.max_surface_pixels)
            .field("mapper", &self.mapper)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl DecoderConfig {
    /// Create a new builder for `DecoderConfig`.
    pub fn builder() -> DecoderConfigBuilder {
        DecoderConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`DecoderConfig`].
#[derive(Debug)]
pub struct DecoderConfigBuilder {
    config: DecoderConfig,
}

impl DecoderConfigBuilder {
    pub fn min_crop_dimension(mut self, px: f64) -> Self {
        self.config.min_crop_dimension = px;
        self
    }

    pub fn max_surface_pixels(mut self, px: u64) -> Self {
        self.config.max_surface_pixels = px;
        self
    }

    pub fn mapper(mut self, kind: MapperKind) -> Self {
        self.config.mapper = kind;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn recognition_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.recognition_prompt = Some(prompt.into());
        self
    }

    pub fn mapping_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.mapping_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.config.progress_callback = Some(callback);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DecoderConfig, DecoderError> {
        let c = &self.config;
        if !c.min_crop_dimension.is_finite() || c.min_crop_dimension <= 0.0 {
            return Err(DecoderError::InvalidConfig(format!(
                "Minimum crop dimension must be a positive number, got {}",
                c.min_crop_dimension
            )));
        }
        if c.max_surface_pixels == 0 {
            return Err(DecoderError::InvalidConfig(
                "Maximum surface size must be at least one pixel".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(DecoderError::InvalidConfig(
                "max_tokens must be at least 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 || c.download_timeout_secs == 0 {
            return Err(DecoderError::InvalidConfig(
                "Timeouts must be at least one second".into(),
            ));
        }
        Ok(self.config)
    }
}

/// How recognised text becomes a digit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapperKind {
    /// Ask the LLM to apply the Charleston mapping. (default)
    #[default]
    Llm,
    /// Apply the CHARLESTON key locally, no network.
    Cipher,
}

impl FromStr for MapperKind {
    type Err = DecoderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "llm" => Ok(MapperKind::Llm),
            "cipher" | "local" => Ok(MapperKind::Cipher),
            other => Err(DecoderError::InvalidConfig(format!(
                "Unknown mapper '{}': expected 'llm' or 'cipher'",
                other
            ))),
        }
    }
}
