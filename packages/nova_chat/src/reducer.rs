//! Message reconciliation
//!
//! [`ChatCore`] owns the transcript and folds validated inbound frames into
//! it. The invariants it maintains:
//!
//! - messages are only ever appended; a message never moves once inserted
//! - at most one message has `is_streaming == true`
//! - sources and follow-up questions are attached only when a stream ends
//! - once a response id is bound to the live stream, frames for any other
//!   id are dropped until it ends; frames for a stopped id are always dropped

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::decoder;
use crate::message::{ChatMessage, Feedback, Sender};
use crate::protocol::InboundFrame;

/// Shown when the backend reports a failed turn.
pub const SERVER_ERROR_TEXT: &str = "Service temporarily unavailable. Please try again.";

/// Default delay before the UI should say it is still gathering sources.
pub const DEFAULT_METADATA_GRACE: Duration = Duration::from_secs(5);

/// How many stopped response ids stay fenced. Late frames only ever belong
/// to the last few answers.
const STOPPED_HISTORY: usize = 32;

/// What applying a frame did to the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Fenced off, or nothing visible to show yet.
    Skipped,
    /// A new streaming bot message was appended at this index.
    StreamStarted(usize),
    /// The streaming message at this index changed.
    StreamUpdated(usize),
    /// The stream ended; the index of the finalized message if there was one.
    StreamFinished(Option<usize>),
    /// A fallback error message was appended at this index.
    ServerError(usize),
}

/// Outbound feedback produced the first time an answer is rated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRecord {
    pub response_id: String,
    pub query_id: Option<String>,
    pub liked: bool,
}

pub struct ChatCore {
    messages: Vec<ChatMessage>,
    /// Raw text of the current response, sentinel and metadata included.
    buffer: String,
    is_waiting: bool,
    current_response: Option<String>,
    /// Most recently stopped response ids, oldest first.
    stopped: VecDeque<String>,
    feedback: HashMap<String, Feedback>,
    metadata_pending_since: Option<Instant>,
    metadata_grace: Duration,
}

impl ChatCore {
    pub fn new() -> Self {
        Self::with_metadata_grace(DEFAULT_METADATA_GRACE)
    }

    pub fn with_metadata_grace(metadata_grace: Duration) -> Self {
        Self {
            messages: Vec::new(),
            buffer: String::new(),
            is_waiting: false,
            current_response: None,
            stopped: VecDeque::with_capacity(STOPPED_HISTORY),
            feedback: HashMap::new(),
            metadata_pending_since: None,
            metadata_grace,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_waiting(&self) -> bool {
        self.is_waiting
    }

    pub fn current_response(&self) -> Option<&str> {
        self.current_response.as_deref()
    }

    pub fn streaming_index(&self) -> Option<usize> {
        self.messages.iter().position(|m| m.is_streaming)
    }

    /// Most recent answer that can still take a like/dislike.
    pub fn latest_rateable(&self) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.accepts_feedback() && m.feedback.is_none())
    }

    /// True once the sentinel has been pending for longer than the grace
    /// period without the stream ending.
    pub fn is_gathering_sources(&self, now: Instant) -> bool {
        self.metadata_pending_since
            .is_some_and(|since| now.saturating_duration_since(since) >= self.metadata_grace)
    }

    /// When the "gathering sources" affordance becomes due, if metadata is
    /// pending at all.
    pub fn gathering_sources_deadline(&self) -> Option<Instant> {
        self.metadata_pending_since
            .map(|since| since + self.metadata_grace)
    }

    /// Route a validated frame through fencing into the handlers below.
    pub fn apply_frame(&mut self, frame: InboundFrame) -> Applied {
        if let InboundFrame::ServerError { .. } = frame {
            return Applied::ServerError(self.on_server_error());
        }

        if let Some(rid) = frame.response_id() {
            if self.is_stopped(rid) {
                debug!(response_id = rid, "Dropping frame for stopped response");
                return Applied::Skipped;
            }
            if let Some(current) = &self.current_response {
                if current != rid {
                    debug!(
                        response_id = rid,
                        current = %current,
                        "Dropping frame for a response that is not in flight"
                    );
                    return Applied::Skipped;
                }
            }
        }

        match frame {
            InboundFrame::Chunk {
                response_id,
                query_id,
                text,
            } => self.on_chunk(response_id, query_id, &text),
            InboundFrame::StreamEnd { response_id } => {
                Applied::StreamFinished(self.on_stream_end(response_id.as_deref()))
            }
            InboundFrame::Ignored { .. } | InboundFrame::ServerError { .. } => Applied::Skipped,
        }
    }

    /// Append a raw slice to the current response.
    pub fn on_chunk(
        &mut self,
        response_id: Option<String>,
        query_id: Option<String>,
        raw: &str,
    ) -> Applied {
        if self.current_response.is_none() {
            self.current_response = response_id.clone();
        }

        self.buffer.push_str(raw);
        let visible = decoder::visible_text(&self.buffer);
        let pending_meta = decoder::has_seen_sentinel(&self.buffer);

        if pending_meta && self.metadata_pending_since.is_none() {
            self.metadata_pending_since = Some(Instant::now());
        }

        if visible.is_empty() {
            return Applied::Skipped;
        }

        if let Some(idx) = self.streaming_index() {
            let msg = &mut self.messages[idx];
            msg.text = visible.to_string();
            msg.is_processing_meta = pending_meta;
            if msg.query_id.is_none() {
                msg.query_id = query_id;
            }
            return Applied::StreamUpdated(idx);
        }

        let mut msg = ChatMessage::streaming_bot(visible, response_id, query_id);
        msg.is_processing_meta = pending_meta;
        self.messages.push(msg);
        Applied::StreamStarted(self.messages.len() - 1)
    }

    /// Finalize the live stream with its trailing metadata.
    pub fn on_stream_end(&mut self, response_id: Option<&str>) -> Option<usize> {
        let metadata = decoder::parse_trailing_metadata(decoder::trailing_metadata(&self.buffer));

        let finalized = self.streaming_index().map(|idx| {
            let msg = &mut self.messages[idx];
            msg.is_streaming = false;
            msg.is_processing_meta = false;
            msg.sources = metadata.sources;
            msg.promptback_questions = metadata.promptback_questions;
            if msg.response_id.is_none() {
                msg.response_id = response_id.map(str::to_string);
            }
            idx
        });

        self.end_turn();
        finalized
    }

    /// The backend declared the turn failed.
    pub fn on_server_error(&mut self) -> usize {
        self.is_waiting = false;
        self.messages.push(ChatMessage::bot_notice(SERVER_ERROR_TEXT));
        self.messages.len() - 1
    }

    /// Append the user's message and start waiting for an answer.
    ///
    /// An answer still streaming at this point is stopped: its message is
    /// finalized as-is and any further frames for it are dropped.
    pub fn send_user_text(&mut self, text: &str) -> usize {
        if let Some(rid) = self.current_response.clone() {
            debug!(response_id = %rid, "Fencing previous response before new message");
            self.stop_response(&rid);
        } else if let Some(idx) = self.streaming_index() {
            self.messages[idx].is_streaming = false;
            self.messages[idx].is_processing_meta = false;
        }

        self.messages.push(ChatMessage::user(text));
        self.buffer.clear();
        self.metadata_pending_since = None;
        self.is_waiting = true;
        self.messages.len() - 1
    }

    /// Ignore the rest of a response. A message bound to it is finalized in
    /// place with whatever text arrived.
    pub fn stop_response(&mut self, response_id: &str) -> Option<usize> {
        self.remember_stopped(response_id);
        if self.current_response.as_deref() != Some(response_id) {
            return None;
        }

        let idx = self.streaming_index();
        if let Some(idx) = idx {
            let msg = &mut self.messages[idx];
            msg.is_streaming = false;
            msg.is_processing_meta = false;
        }
        self.end_turn();
        idx
    }

    /// Record a like/dislike. Only the first call per response id does
    /// anything; it returns the record to forward to the backend.
    pub fn submit_feedback(&mut self, response_id: &str, liked: bool) -> Option<FeedbackRecord> {
        if self.feedback.contains_key(response_id) {
            debug!(response_id, "Feedback already recorded");
            return None;
        }

        let Some(msg) = self
            .messages
            .iter_mut()
            .find(|m| m.sender == Sender::Bot && m.response_id.as_deref() == Some(response_id))
        else {
            warn!(response_id, "Feedback for unknown response");
            return None;
        };
        if msg.is_streaming {
            warn!(response_id, "Feedback for a response that is still streaming");
            return None;
        }

        let verdict = Feedback::from_liked(liked);
        msg.feedback = Some(verdict);
        self.feedback.insert(response_id.to_string(), verdict);

        Some(FeedbackRecord {
            response_id: response_id.to_string(),
            query_id: msg.query_id.clone(),
            liked,
        })
    }

    pub fn feedback_for(&self, response_id: &str) -> Option<Feedback> {
        self.feedback.get(response_id).copied()
    }

    /// Drop the whole transcript. A response still in flight is stopped
    /// first, so its late frames cannot start the next transcript.
    pub fn clear(&mut self) {
        if let Some(rid) = self.current_response.take() {
            debug!(response_id = %rid, "Fencing in-flight response before clear");
            self.remember_stopped(&rid);
        }
        self.messages.clear();
        self.feedback.clear();
        self.end_turn();
    }

    fn is_stopped(&self, response_id: &str) -> bool {
        self.stopped.iter().any(|rid| rid == response_id)
    }

    fn remember_stopped(&mut self, response_id: &str) {
        if self.is_stopped(response_id) {
            return;
        }
        if self.stopped.len() == STOPPED_HISTORY {
            self.stopped.pop_front();
        }
        self.stopped.push_back(response_id.to_string());
    }

    /// Plain-text rendering of the transcript.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| match m.sender {
                Sender::User => format!("User: {}", m.text),
                Sender::Bot => format!("Bot: {}", m.text),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn end_turn(&mut self) {
        self.buffer.clear();
        self.is_waiting = false;
        self.current_response = None;
        self.metadata_pending_since = None;
    }
}

impl Default for ChatCore {
    fn default() -> Self {
        Self::new()
    }
}
