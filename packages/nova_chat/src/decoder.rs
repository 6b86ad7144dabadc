//! Stream decoding
//!
//! The backend streams a single growing buffer per response. Human-readable
//! text comes first; once the model is done the server writes
//! [`END_TOKEN`] followed by a JSON blob carrying sources and suggested
//! follow-up questions. Everything here is pure and never mutates the
//! buffer, so it is safe to call again each time the buffer grows.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Literal marker separating visible text from trailing metadata.
pub const END_TOKEN: &str = "END_OF_RESPONSE_TOKEN";

/// A document the answer was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub page_number: Option<i64>,
    #[serde(default)]
    pub score: f64,
}

/// Structured data sent after the sentinel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub sources: Vec<Source>,
    pub promptback_questions: Vec<String>,
}

impl ResponseMetadata {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.promptback_questions.is_empty()
    }
}

/// Everything derivable from a buffer at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedStream<'a> {
    pub visible: &'a str,
    pub metadata_pending: bool,
    pub metadata: ResponseMetadata,
}

/// The part of `buffer` strictly before the first sentinel, or all of it.
pub fn visible_text(buffer: &str) -> &str {
    match buffer.find(END_TOKEN) {
        Some(idx) => &buffer[..idx],
        None => buffer,
    }
}

/// Whether the model has finished its visible text.
pub fn has_seen_sentinel(buffer: &str) -> bool {
    buffer.contains(END_TOKEN)
}

/// The trimmed text after the first sentinel; empty when there is none.
pub fn trailing_metadata(buffer: &str) -> &str {
    match buffer.find(END_TOKEN) {
        Some(idx) => buffer[idx + END_TOKEN.len()..].trim(),
        None => "",
    }
}

/// Parse the metadata suffix. Never fails: anything that is not a JSON
/// object with array fields yields empty metadata.
pub fn parse_trailing_metadata(raw: &str) -> ResponseMetadata {
    let parsed: Value = match serde_json::from_str(raw.trim()) {
        Ok(value) => value,
        Err(e) => {
            if !raw.trim().is_empty() {
                debug!("Discarding unparseable response metadata: {}", e);
            }
            return ResponseMetadata::default();
        }
    };

    let sources = parsed
        .get("sources")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value::<Source>(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    let promptback_questions = parsed
        .get("promptback_question")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|q| q.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    ResponseMetadata {
        sources,
        promptback_questions,
    }
}

/// Decode a full buffer in one pass.
pub fn decode(buffer: &str) -> DecodedStream<'_> {
    DecodedStream {
        visible: visible_text(buffer),
        metadata_pending: has_seen_sentinel(buffer),
        metadata: parse_trailing_metadata(trailing_metadata(buffer)),
    }
}
