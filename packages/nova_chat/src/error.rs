use tokio_tungstenite::tungstenite;

/// Errors produced by the chat core.
///
/// Every variant renders to a plain, user-presentable string through
/// `Display`, so front-ends never need to inspect the cause chain.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("Session creation failed: {0}")]
    SessionCreation(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no active session")]
    NoActiveSession,

    #[error("socket is not connected")]
    NotConnected,

    #[error("chat session is closed")]
    Closed,
}

impl ChatError {
    /// True for failures that mean the server could not be reached at all,
    /// as opposed to a server that answered with something we rejected.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Http(err) => err.is_connect() || err.is_timeout(),
            Self::WebSocket(tungstenite::Error::Io(io_err)) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
