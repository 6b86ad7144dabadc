//! One conversation: session store, socket channel and transcript behind a
//! single owner.
//!
//! Everything mutates in the task that drives [`ChatSession::next_event`].
//! The socket actor only moves frames; fencing, decoding and session expiry
//! all happen here.

use std::sync::Arc;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::message::ChatMessage;
use crate::protocol::{FeedbackFrame, InboundFrame, OutboundFrame, UserMessageFrame};
use crate::reducer::{Applied, ChatCore};
use crate::session::{Clock, SessionBackend, SessionCache, SessionState, SessionStore};
use crate::socket::{self, SocketChannel, SocketEvent, SocketState};

/// What [`ChatSession::next_event`] woke up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatEvent {
    /// The transcript changed.
    Message(Applied),
    Socket(SocketState),
    /// The session went stale; sends are rejected until the next start.
    SessionExpired,
    /// Metadata has been pending for longer than the grace period.
    GatheringSources,
    Closed,
}

pub struct ChatSession<B> {
    config: ChatConfig,
    core: ChatCore,
    sessions: SessionStore<B>,
    socket: Option<SocketChannel>,
    expiry: Option<Interval>,
    notified_grace: Option<Instant>,
    closed: bool,
}

impl<B: SessionBackend> ChatSession<B> {
    pub fn new(config: ChatConfig, backend: B, cache: Arc<dyn SessionCache>) -> Result<Self> {
        config.validate()?;

        let sessions = SessionStore::new(backend, cache, config.company_id(), &config.language_code)
            .with_ttl(config.session_ttl())
            .with_uid(config.uid.clone());

        Ok(Self {
            core: ChatCore::with_metadata_grace(config.metadata_grace()),
            sessions,
            socket: None,
            expiry: None,
            notified_grace: None,
            closed: false,
            config,
        })
    }

    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: self.sessions.with_clock(clock),
            ..self
        }
    }

    /// Use `socket` instead of dialing `ws_url` on the first modality pick.
    pub fn with_socket(mut self, socket: SocketChannel) -> Self {
        self.socket = Some(socket);
        self
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.core.messages()
    }

    pub fn core(&self) -> &ChatCore {
        &self.core
    }

    pub fn session_state(&self) -> &SessionState {
        self.sessions.state()
    }

    pub fn flow_type(&self) -> Option<&str> {
        self.sessions.flow_type()
    }

    pub fn socket_state(&self) -> SocketState {
        self.socket
            .as_ref()
            .map(SocketChannel::state)
            .unwrap_or(SocketState::Disconnected)
    }

    pub fn is_waiting(&self) -> bool {
        self.core.is_waiting()
    }

    pub fn is_gathering_sources(&self) -> bool {
        self.core.is_gathering_sources(Instant::now())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(ChatError::Closed)
        } else {
            Ok(())
        }
    }

    /// Start (or restore) the session for `flow_type` and open the socket
    /// once it is active. Switching modality starts a fresh transcript.
    ///
    /// Creation failures land in the returned state, not in `Err`.
    pub async fn select_modality(&mut self, flow_type: Option<String>) -> Result<&SessionState> {
        self.ensure_open()?;

        // The socket outlives the switch, so a half-streamed answer from the
        // old modality must be fenced along with the transcript.
        if self.sessions.flow_type() != flow_type.as_deref() {
            debug!("Modality changed, clearing transcript");
            self.core.clear();
            self.notified_grace = None;
        }

        info!(flow_type = ?flow_type, "Selecting modality");
        self.sessions.start(flow_type).await;
        self.open_socket_if_active().await?;
        Ok(self.sessions.state())
    }

    /// Start again with the last modality.
    pub async fn retry(&mut self) -> Result<&SessionState> {
        self.ensure_open()?;
        self.sessions.retry().await;
        self.open_socket_if_active().await?;
        Ok(self.sessions.state())
    }

    async fn open_socket_if_active(&mut self) -> Result<()> {
        if !self.sessions.state().is_active() {
            return Ok(());
        }
        let socket = self.socket.get_or_insert_with(|| {
            SocketChannel::spawn_with_timeout(
                self.config.ws_url(),
                self.config.reconnect_delay(),
                self.config.connect_timeout(),
            )
        });
        socket.connect().await
    }

    /// Send a user message. Rejected without touching the transcript when
    /// there is no active session or the socket is not open.
    pub async fn send_text(&mut self, text: &str) -> Result<usize> {
        self.ensure_open()?;

        let Some(session_id) = self.sessions.session_id().cloned() else {
            warn!("No active session, message not sent");
            return Err(ChatError::NoActiveSession);
        };
        let Some(socket) = self.socket.as_ref().filter(|s| s.is_open()) else {
            warn!(state = %self.socket_state(), "Socket not open, message not sent");
            return Err(ChatError::NotConnected);
        };

        let frame = OutboundFrame::UserMessage(UserMessageFrame {
            user_id: self.config.user_id,
            company_id: self.config.company_id().to_string(),
            message: text.to_string(),
            session_id,
            is_detail: false,
            regenerate: false,
            flow_type: self.sessions.flow_type().map(str::to_string),
            language_code: Some(self.config.language_code.clone()),
            additional_info: self.config.outbound_additional_info(),
        });
        socket.send(frame.to_json()?).await?;

        debug!(chars = text.len(), "Message sent");
        Ok(self.core.send_user_text(text))
    }

    /// Like or dislike an answer. Returns whether a feedback frame went out;
    /// only the first verdict per answer does.
    pub async fn submit_feedback(&mut self, response_id: &str, liked: bool) -> Result<bool> {
        self.ensure_open()?;

        let Some(session_id) = self.sessions.session_id().cloned() else {
            warn!("No active session, feedback not sent");
            return Err(ChatError::NoActiveSession);
        };
        if !self.socket.as_ref().is_some_and(SocketChannel::is_open) {
            warn!("Socket not open, feedback not sent");
            return Err(ChatError::NotConnected);
        }

        let Some(record) = self.core.submit_feedback(response_id, liked) else {
            return Ok(false);
        };

        let frame = OutboundFrame::Feedback(FeedbackFrame {
            user_id: self.config.user_id,
            session_id,
            company_id: self.config.company_id().to_string(),
            feedback: true,
            query_id: record.query_id,
            response_id: record.response_id,
            liked: record.liked,
            comment: None,
            flow_type: self.sessions.flow_type().map(str::to_string),
        });
        if let Some(socket) = &self.socket {
            socket.send(frame.to_json()?).await?;
        }
        info!(response_id, liked, "Feedback sent");
        Ok(true)
    }

    /// Drop the transcript and the session, close the socket. Pick a
    /// modality again to continue.
    pub async fn reset(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.core.clear();
        self.sessions.reset();
        self.notified_grace = None;
        self.shutdown_socket().await;
        info!("Chat reset");
        Ok(())
    }

    /// Close the socket for good. Every later call fails with `Closed`.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shutdown_socket().await;
        info!("Chat closed");
    }

    async fn shutdown_socket(&mut self) {
        if let Some(socket) = self.socket.take() {
            if let Err(e) = socket.close().await {
                debug!("Socket already gone: {}", e);
            }
        }
    }

    /// Wait for the next thing the UI should react to.
    pub async fn next_event(&mut self) -> ChatEvent {
        if self.closed {
            return ChatEvent::Closed;
        }

        if self.expiry.is_none() {
            let period = self.config.expiry_poll_interval();
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.expiry = Some(interval);
        }

        loop {
            let grace = self
                .core
                .gathering_sources_deadline()
                .filter(|deadline| self.notified_grace != Some(*deadline));

            tokio::select! {
                event = recv_socket(&mut self.socket) => match event {
                    Some(SocketEvent::Frame(raw)) => {
                        if let Some(applied) = self.on_frame(&raw) {
                            return ChatEvent::Message(applied);
                        }
                    }
                    Some(SocketEvent::State(state)) => return ChatEvent::Socket(state),
                    None => {
                        warn!("Socket actor stopped");
                        self.socket = None;
                        return ChatEvent::Socket(SocketState::Disconnected);
                    }
                },

                _ = tick(&mut self.expiry) => {
                    if self.sessions.check_expiry() {
                        return ChatEvent::SessionExpired;
                    }
                }

                _ = socket::sleep_until(grace) => {
                    self.notified_grace = grace;
                    return ChatEvent::GatheringSources;
                }
            }
        }
    }

    fn on_frame(&mut self, raw: &str) -> Option<Applied> {
        let frame = match InboundFrame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping inbound frame: {}", e);
                return None;
            }
        };
        match self.core.apply_frame(frame) {
            Applied::Skipped => None,
            applied => Some(applied),
        }
    }
}

async fn recv_socket(socket: &mut Option<SocketChannel>) -> Option<SocketEvent> {
    match socket {
        Some(socket) => socket.recv().await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
