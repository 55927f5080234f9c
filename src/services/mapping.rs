//! Code mapping: recognised text → digit code.

use super::{CodeMapper, MappingOutcome, ServiceError};
use crate::config::DecoderConfig;
use crate::pipeline::llm::{complete, CallSettings};
use crate::pipeline::sanitize::extract_json_object;
use crate::prompts::{mapping_request, CHARLESTON_KEY, MAPPING_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, LLMProvider};
use std::sync::Arc;
use tracing::debug;

const SERVICE: &str = "code mapping";

/// Asks the LLM to apply the Charleston mapping and reply with JSON.
pub struct LlmCodeMapper {
    provider: Arc<dyn LLMProvider>,
    prompt: String,
    settings: CallSettings,
}

impl LlmCodeMapper {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &DecoderConfig) -> Self {
        Self {
            provider,
            prompt: config
                .mapping_prompt
                .clone()
                .unwrap_or_else(|| MAPPING_PROMPT.to_string()),
            settings: CallSettings::from(config),
        }
    }
}

#[async_trait]
impl CodeMapper for LlmCodeMapper {
    async fn map(&self, text: &str) -> Result<MappingOutcome, ServiceError> {
        let request = mapping_request(text);
        let messages = vec![
            ChatMessage::system(self.prompt.as_str()),
            ChatMessage::user(request.as_str()),
        ];
        let reply = complete(&self.provider, &messages, &self.settings, SERVICE).await?;
        parse_reply(&reply)
    }
}

/// Parse the `{"shouldMap", "numericalCode"}` object out of a model reply.
fn parse_reply(reply: &str) -> Result<MappingOutcome, ServiceError> {
    let json = extract_json_object(reply).ok_or_else(|| ServiceError::InvalidReply {
        service: SERVICE,
        detail: format!("no JSON object in reply: {}", truncate(reply, 80)),
    })?;
    let mut outcome: MappingOutcome =
        serde_json::from_str(json).map_err(|e| ServiceError::InvalidReply {
            service: SERVICE,
            detail: e.to_string(),
        })?;
    outcome.numerical_code = outcome.numerical_code.trim().to_string();
    debug!(
        "Mapping reply: shouldMap={} code='{}'",
        outcome.should_map, outcome.numerical_code
    );
    Ok(outcome)
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

/// Offline mapper using the CHARLESTON key (C=1 … N=0).
///
/// Case and whitespace are ignored. Any character outside the key makes the
/// text unsuitable; digits included, since a tag that already shows a
/// number is not a Charleston code.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharlestonCipher;

impl CharlestonCipher {
    /// Digit for one key letter.
    pub fn digit_for(letter: char) -> Option<char> {
        let upper = letter.to_ascii_uppercase();
        CHARLESTON_KEY
            .chars()
            .position(|k| k == upper)
            .and_then(|i| char::from_digit(((i + 1) % 10) as u32, 10))
    }

    pub fn encode(text: &str) -> MappingOutcome {
        let mut code = String::with_capacity(text.len());
        for ch in text.chars().filter(|c| !c.is_whitespace()) {
            match Self::digit_for(ch) {
                Some(d) => code.push(d),
                None => return MappingOutcome::declined(),
            }
        }
        if code.is_empty() {
            return MappingOutcome::declined();
        }
        MappingOutcome::mapped(code)
    }
}

#[async_trait]
impl CodeMapper for CharlestonCipher {
    async fn map(&self, text: &str) -> Result<MappingOutcome, ServiceError> {
        Ok(Self::encode(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cipher_key_digits() {
        let digits: String = CHARLESTON_KEY
            .chars()
            .map(|c| CharlestonCipher::digit_for(c).unwrap())
            .collect();
        assert_eq!(digits, "1234567890");
    }

    #[test]
    fn cipher_maps_letters() {
        let out = tokio_test::block_on(CharlestonCipher.map("chon")).unwrap();
        assert_eq!(out, MappingOutcome::mapped("1290"));
        let out = tokio_test::block_on(CharlestonCipher.map(" C H\nAR ")).unwrap();
        assert_eq!(out.numerical_code, "1234");
    }

    #[test]
    fn cipher_declines_foreign_characters() {
        assert_eq!(CharlestonCipher::encode("PRICE"), MappingOutcome::declined());
        assert_eq!(CharlestonCipher::encode("12.99"), MappingOutcome::declined());
        assert_eq!(CharlestonCipher::encode("   "), MappingOutcome::declined());
    }

    #[test]
    fn parse_plain_json() {
        let out = parse_reply(r#"{"shouldMap": true, "numericalCode": " 1299 "}"#).unwrap();
        assert_eq!(out, MappingOutcome::mapped("1299"));
    }

    #[test]
    fn parse_fenced_json() {
        let out = parse_reply("```json\n{\"shouldMap\": false}\n```").unwrap();
        assert!(!out.should_map);
        assert!(out.numerical_code.is_empty());
    }

    #[test]
    fn parse_rejects_non_json() {
        let err = parse_reply("I cannot read that").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidReply { .. }));
        let err = parse_reply(r#"{"numericalCode": "12"}"#).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidReply { .. }));
    }

    #[test]
    fn truncate_long_reply() {
        assert_eq!(truncate("abcdef", 3), "abc…");
        assert_eq!(truncate("ab", 3), "ab");
    }
}
