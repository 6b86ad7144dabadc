//! Socket channel
//!
//! One WebSocket per chat session, owned by an actor task. The chat session
//! talks to it over an `mpsc` command channel, reads its state from a
//! `watch`, and receives inbound text frames and state changes on an event
//! channel. The actor never looks inside frames.
//!
//! A dropped connection schedules exactly one reconnect after a fixed delay.
//! A pending reconnect is never stacked with another; opening a connection
//! (by reconnect or an explicit `connect`) cancels it.

use std::fmt;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
use tracing::{debug, info, warn};

use crate::error::{ChatError, Result};
use crate::session::TransitionError;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Upper bound on one dial, TCP and WebSocket handshake included.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// State machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl SocketState {
    fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }

    pub fn is_open(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketTransition {
    /// disconnected|error → connecting
    Dial,
    /// connecting → connected
    Opened,
    /// connecting|connected → error
    Failed,
    /// any but disconnected → disconnected
    Closed,
}

impl SocketState {
    pub fn apply(self, transition: SocketTransition) -> std::result::Result<Self, TransitionError> {
        use SocketState::*;
        use SocketTransition::*;

        match (self, transition) {
            (Disconnected | Error, Dial) => Ok(Connecting),
            (Connecting, Opened) => Ok(Connected),
            (Connecting | Connected, Failed) => Ok(Error),
            (Connecting | Connected | Error, Closed) => Ok(Disconnected),
            (from, transition) => Err(TransitionError {
                from: from.name(),
                transition: format!("{transition:?}"),
            }),
        }
    }
}

// =============================================================================
// Reconnect timer
// =============================================================================

/// At most one pending reconnect deadline.
#[derive(Debug, Clone)]
pub struct Reconnector {
    delay: Duration,
    pending: Option<Instant>,
}

impl Reconnector {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Arm the timer. Returns false (and changes nothing) if one is already
    /// pending.
    pub fn schedule(&mut self, now: Instant) -> bool {
        if self.pending.is_some() {
            return false;
        }
        self.pending = Some(now + self.delay);
        true
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Disarm and return true if the deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(at) if at <= now => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }
}

// =============================================================================
// Actor
// =============================================================================

#[derive(Debug)]
pub enum SocketCommand {
    /// Open the connection unless it is open or opening.
    Connect,
    /// Transmit one text frame. Dropped if the socket is not open.
    Send(String),
    /// Cancel any reconnect, close the connection and stop the actor.
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A text frame from the server.
    Frame(String),
    State(SocketState),
}

/// Handle to a socket actor.
pub struct SocketChannel {
    commands: mpsc::Sender<SocketCommand>,
    state: watch::Receiver<SocketState>,
    events: mpsc::Receiver<SocketEvent>,
}

impl SocketChannel {
    /// Spawn the actor for `url`. Nothing is dialed until [`connect`].
    ///
    /// [`connect`]: SocketChannel::connect
    pub fn spawn(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self::spawn_with_timeout(url, reconnect_delay, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Like [`spawn`](SocketChannel::spawn), with a custom bound on each dial.
    pub fn spawn_with_timeout(
        url: impl Into<String>,
        reconnect_delay: Duration,
        connect_timeout: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(SocketState::Disconnected);
        let (event_tx, event_rx) = mpsc::channel(256);

        let actor = SocketActor {
            url: url.into(),
            commands: cmd_rx,
            state: state_tx,
            events: event_tx,
            reconnect: Reconnector::new(reconnect_delay),
            connect_timeout,
        };
        tokio::spawn(actor.run());

        Self {
            commands: cmd_tx,
            state: state_rx,
            events: event_rx,
        }
    }

    pub fn state(&self) -> SocketState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    pub async fn connect(&self) -> Result<()> {
        self.command(SocketCommand::Connect).await
    }

    /// Queue a text frame. Fails fast if the socket is not open; there is no
    /// outbound queue across reconnects.
    pub async fn send(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(ChatError::NotConnected);
        }
        self.command(SocketCommand::Send(text)).await
    }

    pub async fn close(&self) -> Result<()> {
        self.command(SocketCommand::Close).await
    }

    /// Next frame or state change. `None` once the actor has stopped.
    pub async fn recv(&mut self) -> Option<SocketEvent> {
        self.events.recv().await
    }

    async fn command(&self, cmd: SocketCommand) -> Result<()> {
        self.commands.send(cmd).await.map_err(|_| ChatError::Closed)
    }
}

struct SocketActor {
    url: String,
    commands: mpsc::Receiver<SocketCommand>,
    state: watch::Sender<SocketState>,
    events: mpsc::Sender<SocketEvent>,
    reconnect: Reconnector,
    connect_timeout: Duration,
}

async fn next_message(ws: &mut Option<WsStream>) -> Option<std::result::Result<Message, tungstenite::Error>> {
    match ws {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

pub(crate) async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl SocketActor {
    async fn run(mut self) {
        let mut ws: Option<WsStream> = None;

        loop {
            let reconnect_at = self.reconnect.deadline();

            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(SocketCommand::Connect) => {
                        if ws.is_none() {
                            ws = self.dial().await;
                        } else {
                            debug!("Connect ignored, socket already open");
                        }
                    }
                    Some(SocketCommand::Send(text)) => {
                        let Some(stream) = ws.as_mut() else {
                            warn!("Socket not open, dropping outbound frame");
                            continue;
                        };
                        if let Err(e) = stream.send(Message::Text(text.into())).await {
                            warn!("Socket send failed: {}", e);
                            ws = None;
                            self.dropped(true).await;
                        }
                    }
                    Some(SocketCommand::Close) | None => {
                        self.reconnect.cancel();
                        if let Some(mut stream) = ws.take() {
                            let _ = stream.close(None).await;
                        }
                        self.set_state(SocketTransition::Closed).await;
                        info!("Socket closed");
                        break;
                    }
                },

                msg = next_message(&mut ws) => match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!(bytes = text.len(), "Frame received");
                        let _ = self.events.send(SocketEvent::Frame(text.as_str().to_owned())).await;
                    }
                    Some(Ok(Message::Binary(_))) => debug!("Ignoring binary frame"),
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Socket closed by server");
                        ws = None;
                        self.dropped(false).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Socket error: {}", e);
                        ws = None;
                        self.dropped(true).await;
                    }
                },

                _ = sleep_until(reconnect_at) => {
                    if self.reconnect.take_due(Instant::now()) && ws.is_none() {
                        info!("Reconnecting");
                        ws = self.dial().await;
                    }
                }
            }
        }
    }

    async fn dial(&mut self) -> Option<WsStream> {
        self.set_state(SocketTransition::Dial).await;
        debug!(url = %self.url, "Connecting");

        let dialed = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str())).await;
        match dialed {
            Ok(Ok((stream, _))) => {
                self.reconnect.cancel();
                self.set_state(SocketTransition::Opened).await;
                info!("Socket connected");
                Some(stream)
            }
            Ok(Err(e)) => {
                let err = ChatError::from(e);
                if err.is_unavailable() {
                    warn!("Server unavailable: {}", err);
                } else {
                    warn!("Socket connect failed: {}", err);
                }
                self.dropped(true).await;
                None
            }
            Err(_) => {
                warn!(timeout = ?self.connect_timeout, "Socket connect timed out");
                self.dropped(true).await;
                None
            }
        }
    }

    /// The connection went away (or never came up). Publish the new state and
    /// arm a single reconnect.
    async fn dropped(&mut self, failed: bool) {
        if failed {
            self.set_state(SocketTransition::Failed).await;
        } else {
            self.set_state(SocketTransition::Closed).await;
        }
        if self.reconnect.schedule(Instant::now()) {
            debug!(delay = ?self.reconnect.delay, "Reconnect scheduled");
        }
    }

    async fn set_state(&mut self, transition: SocketTransition) {
        let current = *self.state.borrow();
        match current.apply(transition) {
            Ok(next) if next != current => {
                self.state.send_replace(next);
                let _ = self.events.send(SocketEvent::State(next)).await;
            }
            Ok(_) => {}
            Err(e) => debug!("Ignoring socket transition: {}", e),
        }
    }
}

// =============================================================================
// In-process stand-in
// =============================================================================

/// The far end of a [`SocketChannel::loopback`], for driving a chat session
/// without a network.
#[cfg(test)]
pub(crate) struct Loopback {
    pub(crate) commands: mpsc::Receiver<SocketCommand>,
    pub(crate) state: watch::Sender<SocketState>,
    pub(crate) events: mpsc::Sender<SocketEvent>,
}

#[cfg(test)]
impl Loopback {
    pub(crate) async fn set_state(&self, state: SocketState) {
        self.state.send_replace(state);
        let _ = self.events.send(SocketEvent::State(state)).await;
    }

    pub(crate) async fn push(&self, frame: serde_json::Value) {
        self.push_raw(&frame.to_string()).await;
    }

    pub(crate) async fn push_raw(&self, raw: &str) {
        let _ = self.events.send(SocketEvent::Frame(raw.to_string())).await;
    }

    /// Every command queued so far.
    pub(crate) fn drain(&mut self) -> Vec<SocketCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.commands.try_recv() {
            out.push(cmd);
        }
        out
    }

    /// Outbound text frames queued so far (other commands are skipped).
    pub(crate) fn sent(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|cmd| match cmd {
                SocketCommand::Send(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
impl SocketChannel {
    pub(crate) fn loopback() -> (Self, Loopback) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(SocketState::Disconnected);
        let (event_tx, event_rx) = mpsc::channel(256);
        (
            Self {
                commands: cmd_tx,
                state: state_rx,
                events: event_rx,
            },
            Loopback {
                commands: cmd_rx,
                state: state_tx,
                events: event_tx,
            },
        )
    }
}
