//! Chat core for the Nova backend: session lifecycle, the WebSocket channel,
//! stream decoding and message reconciliation.
//!
//! A [`ChatSession`] owns one conversation. Pick a modality, then drive
//! [`ChatSession::next_event`] and render [`ChatSession::messages`]:
//!
//! ```rust,no_run
//! # async fn run() -> nova_chat::Result<()> {
//! use std::sync::Arc;
//! use nova_chat::{ApiClient, ChatConfig, ChatEvent, ChatSession, MemorySessionCache};
//!
//! let config = ChatConfig {
//!     company_id: "acme".into(),
//!     ..Default::default()
//! };
//! let api = ApiClient::new(&config);
//! let mut chat = ChatSession::new(config, api, Arc::new(MemorySessionCache::new()))?;
//!
//! chat.select_modality(Some("sales".into())).await?;
//! while let ChatEvent::Socket(state) = chat.next_event().await {
//!     if state.is_open() {
//!         break;
//!     }
//! }
//! chat.send_text("Hello").await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod chat;
pub mod company;
pub mod config;
pub mod decoder;
pub mod error;
pub mod message;
pub mod protocol;
pub mod reducer;
pub mod session;
pub mod socket;

pub use api::ApiClient;
pub use chat::{ChatEvent, ChatSession};
pub use company::{Company, ResolvedModality, SupportFlags, resolve_modalities};
pub use config::{ChatConfig, TimingConfig};
pub use decoder::{END_TOKEN, ResponseMetadata, Source};
pub use error::{ChatError, Result};
pub use message::{ChatMessage, Feedback, Sender};
pub use protocol::{InboundFrame, OutboundFrame, SessionId};
pub use reducer::{Applied, ChatCore};
pub use session::{FileSessionCache, MemorySessionCache, SessionCache, SessionState, SessionStore};
pub use socket::{SocketChannel, SocketEvent, SocketState};
