//! Post-processing: deterministic cleanup of LLM replies.
//!
//! Even well-prompted models occasionally wrap a one-word answer in
//! ` ``` ` fences, quote it, or prepend a sentence before the JSON object we
//! asked for. These rules undo that without touching the content.
//!
//! ## Rule Order
//!
//! Line endings are normalised before fence stripping so the fence regex only
//! has to match `\n`; invisible characters are removed last so they cannot
//! hide a fence or quote from the earlier rules.

use once_cell::sync::Lazy;
use regex::Regex;

/// Clean a recognition reply into the text printed on the tag.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip outer code fences
/// 3. Trim trailing whitespace per line and drop blank edges
/// 4. Strip one pair of matching outer quotes
/// 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
///
/// A reply that is only whitespace comes back as the empty string.
pub fn clean_recognized_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_code_fences(&s);
    let s = trim_lines(&s);
    let s = strip_outer_quotes(&s);
    remove_invisible_chars(&s).trim().to_string()
}

/// Find the first balanced `{ ... }` object in a reply.
///
/// Braces inside JSON strings are skipped. Returns `None` when no complete
/// object is present.
pub fn extract_json_object(input: &str) -> Option<&str> {
    let start = input.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in input[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&input[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*\n(.*?)\n?```$").unwrap());

fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 3: Trim lines ───────────────────────────────────────────────────────

fn trim_lines(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_string()
}

// ── Rule 4: Strip matching outer quotes ──────────────────────────────────────

fn strip_outer_quotes(input: &str) -> String {
    let trimmed = input.trim();
    for (open, close) in [('"', '"'), ('\'', '\''), ('“', '”'), ('`', '`')] {
        if trimmed.len() >= 2 && trimmed.starts_with(open) && trimmed.ends_with(close) {
            let inner = &trimmed[open.len_utf8()..trimmed.len() - close.len_utf8()];
            return inner.to_string();
        }
    }
    input.to_string()
}

// ── Rule 5: Remove invisible Unicode characters ──────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_code_fences("```\nCHAR\n```"), "CHAR");
        assert_eq!(strip_code_fences("```text\nCHAR\n```"), "CHAR");
        assert_eq!(strip_code_fences("CHAR"), "CHAR");
    }

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_outer_quotes("\"HOLE\""), "HOLE");
        assert_eq!(strip_outer_quotes("“HOLE”"), "HOLE");
        assert_eq!(strip_outer_quotes("\"HOLE"), "\"HOLE");
        assert_eq!(strip_outer_quotes("\""), "\"");
    }

    #[test]
    fn test_remove_invisible() {
        assert_eq!(remove_invisible_chars("CH\u{200B}AR\u{FEFF}"), "CHAR");
    }

    #[test]
    fn clean_recognized_text_full() {
        assert_eq!(clean_recognized_text("```\r\n\"CHAR\"  \r\n```"), "CHAR");
        assert_eq!(clean_recognized_text("  line one \n line two  \n\n"), "line one\n line two");
    }

    #[test]
    fn whitespace_only_is_empty() {
        assert_eq!(clean_recognized_text("  \n\t \u{200B}"), "");
        assert_eq!(clean_recognized_text(""), "");
    }

    #[test]
    fn extract_json_from_prose() {
        let reply = "Sure! Here it is:\n{\"shouldMap\": true, \"numericalCode\": \"1299\"}\nThanks";
        assert_eq!(
            extract_json_object(reply),
            Some("{\"shouldMap\": true, \"numericalCode\": \"1299\"}")
        );
    }

    #[test]
    fn extract_json_skips_braces_in_strings() {
        let reply = r#"{"note": "a } b", "inner": {"x": 1}} trailing"#;
        assert_eq!(
            extract_json_object(reply),
            Some(r#"{"note": "a } b", "inner": {"x": 1}}"#)
        );
    }

    #[test]
    fn extract_json_incomplete() {
        assert_eq!(extract_json_object("{\"shouldMap\": true"), None);
        assert_eq!(extract_json_object("no json here"), None);
    }
}
