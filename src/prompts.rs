//! Prompts for the recognition and mapping LLM calls.
//!
//! Callers can override either via [`crate::config::DecoderConfig`]; the
//! constants here are used only when no override is provided.

/// Default prompt for reading the text on a cropped price tag.
pub const RECOGNITION_PROMPT: &str = r#"Extract the text from the following image.

Rules:
- Reply with the text exactly as printed, nothing else.
- Keep letters, digits and punctuation as they appear. Do not translate, correct or explain.
- If the image contains no readable text, reply with an empty message.
- Do not wrap the reply in code fences or quotes."#;

/// The Charleston key: each letter's position in the word, with the tenth
/// letter standing for zero.
pub const CHARLESTON_KEY: &str = "CHARLESTON";

/// Default system prompt for turning recognised text into a digit code.
pub const MAPPING_PROMPT: &str = r#"You decode retail price codes written with the Charleston cipher.

The key word is CHARLESTON. Each letter stands for one digit:
C=1 H=2 A=3 R=4 L=5 E=6 S=7 T=8 O=9 N=0

Given the text read from a price tag:
- Ignore surrounding whitespace and letter case.
- If the text is a Charleston code, replace every letter with its digit, in order, and return the digits as a string. The last two digits are cents.
- If the text contains anything that is not a key letter (other letters, prices already in digits, words), it is not suitable for mapping.

Reply with a single JSON object and nothing else:
{"shouldMap": true, "numericalCode": "1299"}
or, when the text is not suitable:
{"shouldMap": false, "numericalCode": ""}"#;

/// User turn for the mapping call.
pub fn mapping_request(text: &str) -> String {
    format!("Text read from the price tag:\n\n{}", text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_prompt_lists_every_key_letter() {
        for (i, letter) in CHARLESTON_KEY.chars().enumerate() {
            let digit = (i + 1) % 10;
            assert!(
                MAPPING_PROMPT.contains(&format!("{letter}={digit}")),
                "missing {letter}={digit}"
            );
        }
    }

    #[test]
    fn mapping_prompt_names_reply_fields() {
        assert!(MAPPING_PROMPT.contains("shouldMap"));
        assert!(MAPPING_PROMPT.contains("numericalCode"));
    }

    #[test]
    fn mapping_request_embeds_text() {
        assert!(mapping_request("CHAR").ends_with("CHAR"));
    }

    #[test]
    fn recognition_prompt_starts_with_instruction() {
        assert!(RECOGNITION_PROMPT.starts_with("Extract the text"));
    }
}
