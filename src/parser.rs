//! Tolerant parsing of model output.
//!
//! The model is instructed to reply as `{"response": "...", "emotion": "..."}`
//! but nothing guarantees it does. Parsing never fails: malformed output
//! degrades to the raw trimmed text with a neutral emotion.

use serde::Deserialize;

use crate::models::Emotion;

/// A well-formed reply derived from raw model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub text: String,
    pub emotion: Emotion,
}

#[derive(Deserialize)]
struct RawReply {
    response: Option<String>,
    emotion: Option<String>,
}

/// Parse raw model output into a reply and emotion. Never errors.
pub fn parse_reply(raw: &str) -> ParsedReply {
    let trimmed = raw.trim();

    match serde_json::from_str::<RawReply>(trimmed) {
        Ok(parsed) => ParsedReply {
            text: parsed.response.unwrap_or_else(|| trimmed.to_string()),
            emotion: parsed
                .emotion
                .as_deref()
                .map(Emotion::normalize)
                .unwrap_or_default(),
        },
        Err(_) => ParsedReply {
            text: trimmed.to_string(),
            emotion: Emotion::Neutral,
        },
    }
}

/// Best-effort extraction of a possibly-unterminated `response` field from a
/// streaming buffer, for incremental display only.
///
/// Returns `None` when no field start is found yet (callers show the raw
/// buffer). An unterminated value yields everything received so far.
pub fn extract_partial_reply(buffer: &str) -> Option<String> {
    let key_end = buffer.find("\"response\"")? + "\"response\"".len();
    let rest = buffer[key_end..].trim_start();
    let rest = rest.strip_prefix(':')?;
    let rest = rest.trim_start().strip_prefix('"')?;

    let end = rest.find('"').unwrap_or(rest.len());
    Some(rest[..end].to_string())
}
