use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decoder::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// Local record of the user's verdict on an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Liked,
    Disliked,
}

impl Feedback {
    pub fn from_liked(liked: bool) -> Self {
        if liked { Self::Liked } else { Self::Disliked }
    }

    pub fn liked(self) -> bool {
        matches!(self, Self::Liked)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Backend response id for answers that carried one, otherwise a
    /// client-generated id.
    pub id: String,
    pub sender: Sender,
    pub text: String,
    pub is_streaming: bool,
    /// The sentinel has been seen but the stream has not ended yet.
    pub is_processing_meta: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub promptback_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self::finished(Sender::User, text)
    }

    /// A finalized bot message that is not part of any stream.
    pub fn bot_notice(text: impl Into<String>) -> Self {
        Self::finished(Sender::Bot, text)
    }

    pub(crate) fn streaming_bot(
        text: impl Into<String>,
        response_id: Option<String>,
        query_id: Option<String>,
    ) -> Self {
        Self {
            id: response_id.clone().unwrap_or_else(generate_id),
            sender: Sender::Bot,
            text: text.into(),
            is_streaming: true,
            is_processing_meta: false,
            timestamp: Utc::now(),
            sources: Vec::new(),
            promptback_questions: Vec::new(),
            response_id,
            query_id,
            feedback: None,
        }
    }

    fn finished(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            sender,
            text: text.into(),
            is_streaming: false,
            is_processing_meta: false,
            timestamp: Utc::now(),
            sources: Vec::new(),
            promptback_questions: Vec::new(),
            response_id: None,
            query_id: None,
            feedback: None,
        }
    }

    pub fn is_user(&self) -> bool {
        self.sender == Sender::User
    }

    /// Only finished answers with a backend response id can be rated.
    pub fn accepts_feedback(&self) -> bool {
        self.sender == Sender::Bot && !self.is_streaming && self.response_id.is_some()
    }
}

/// Time-ordered ids keep the transcript sortable even when ids are logged
/// out of context.
pub fn generate_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
