//! WebSocket protocol types
//!
//! Outbound frames are plain camelCase JSON objects (with a few snake_case
//! fields the backend expects verbatim). Inbound frames are validated into
//! [`InboundFrame`] before any field is trusted; anything that does not fit
//! the expected shape is a [`ProtocolError`] and gets dropped by the caller.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Text of the terminal frame for one response.
pub const STREAM_END: &str = "stream-end";

/// Backend-issued session identifier. The backend has handed out both
/// numeric and string ids; the original JSON type is kept so it can be
/// echoed back exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionId {
    Number(i64),
    Text(String),
}

impl SessionId {
    /// Empty strings and zero are what the backend sends when it failed
    /// without saying so.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Number(n) => *n == 0,
            Self::Text(s) => s.trim().is_empty(),
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Request for a new answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessageFrame {
    pub user_id: u64,
    pub company_id: String,
    pub message: String,
    pub session_id: SessionId,
    pub is_detail: bool,
    pub regenerate: bool,
    #[serde(rename = "flow_type")]
    pub flow_type: Option<String>,
    #[serde(rename = "language_code")]
    pub language_code: Option<String>,
    #[serde(rename = "additional_info", skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<Map<String, Value>>,
}

/// Like/dislike for one answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackFrame {
    pub user_id: u64,
    pub session_id: SessionId,
    pub company_id: String,
    pub feedback: bool,
    pub query_id: Option<String>,
    pub response_id: String,
    pub liked: bool,
    pub comment: Option<String>,
    #[serde(rename = "flow_type")]
    pub flow_type: Option<String>,
}

/// Frames sent from the client to the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    UserMessage(UserMessageFrame),
    Feedback(FeedbackFrame),
}

impl OutboundFrame {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Frames received from the backend, after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// `status: "error"`: the in-flight turn failed server-side.
    ServerError { response_id: Option<String> },
    /// Terminal frame for a response.
    StreamEnd { response_id: Option<String> },
    /// Next slice of a response.
    Chunk {
        response_id: Option<String>,
        query_id: Option<String>,
        text: String,
    },
    /// Well-formed but carries nothing to render (no `response`, or a
    /// non-passing one).
    Ignored { response_id: Option<String> },
}

impl InboundFrame {
    pub fn response_id(&self) -> Option<&str> {
        match self {
            Self::ServerError { response_id }
            | Self::StreamEnd { response_id }
            | Self::Chunk { response_id, .. }
            | Self::Ignored { response_id } => response_id.as_deref(),
        }
    }

    /// Validate a raw text frame.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let obj = value.as_object().ok_or(ProtocolError::NotAnObject)?;

        let response_id = correlation_id(obj.get("response_id"), "response_id")?;

        if obj.get("status").and_then(Value::as_str) == Some("error") {
            return Ok(Self::ServerError { response_id });
        }

        let response = match obj.get("response") {
            None | Some(Value::Null) => return Ok(Self::Ignored { response_id }),
            Some(Value::Object(response)) => response,
            Some(_) => return Err(ProtocolError::InvalidField("response")),
        };

        let text = response.get("text").and_then(Value::as_str);
        if text == Some(STREAM_END) {
            return Ok(Self::StreamEnd { response_id });
        }

        let passing = response
            .get("passing")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        match text {
            Some(text) if passing => Ok(Self::Chunk {
                response_id,
                // only feedback needs it; a bad one must not cost the text
                query_id: correlation_id(obj.get("query_id"), "query_id").unwrap_or_else(|e| {
                    debug!("Ignoring query id: {}", e);
                    None
                }),
                text: text.to_string(),
            }),
            _ => Ok(Self::Ignored { response_id }),
        }
    }
}

/// Correlation ids arrive as strings or numbers; both normalize to strings.
fn correlation_id(value: Option<&Value>, field: &'static str) -> Result<Option<String>, ProtocolError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(ProtocolError::InvalidField(field)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame field `{0}` has an unexpected type")]
    InvalidField(&'static str),
}
