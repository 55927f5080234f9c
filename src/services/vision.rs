//! Text recognition through a vision LLM.

use super::{ServiceError, TextRecognizer};
use crate::config::DecoderConfig;
use crate::pipeline::encode::EncodedImage;
use crate::pipeline::llm::{complete, CallSettings};
use crate::pipeline::sanitize::clean_recognized_text;
use crate::prompts::RECOGNITION_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, LLMProvider};
use std::sync::Arc;
use tracing::debug;

const SERVICE: &str = "text recognition";

/// Reads the crop by sending it to a multimodal model.
///
/// The request is a single user turn: the prompt text followed by the crop
/// as an image attachment.
pub struct VisionRecognizer {
    provider: Arc<dyn LLMProvider>,
    prompt: String,
    settings: CallSettings,
}

impl VisionRecognizer {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &DecoderConfig) -> Self {
        Self {
            provider,
            prompt: config
                .recognition_prompt
                .clone()
                .unwrap_or_else(|| RECOGNITION_PROMPT.to_string()),
            settings: CallSettings::from(config),
        }
    }
}

#[async_trait]
impl TextRecognizer for VisionRecognizer {
    async fn recognize(&self, image: &EncodedImage) -> Result<Option<String>, ServiceError> {
        let messages = vec![ChatMessage::user_with_images(
            self.prompt.as_str(),
            vec![image.to_image_data()],
        )];
        let reply = complete(&self.provider, &messages, &self.settings, SERVICE).await?;
        Ok(interpret_reply(&reply))
    }
}

/// Sanitised reply text, or `None` when nothing readable came back.
fn interpret_reply(reply: &str) -> Option<String> {
    let text = clean_recognized_text(reply);
    if text.is_empty() {
        debug!("Recognition reply was empty after cleanup ({} raw chars)", reply.len());
        None
    } else {
        Some(text)
    }
}
