use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ChatError, Result};

/// Connection and behavior settings for one chat client.
///
/// All fields have defaults so the struct can sit at the bottom of a
/// layered config (file, then environment).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatConfig {
    /// REST base for `/create_session`.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// WebSocket base; the user id is appended verbatim.
    #[serde(default = "default_ws_base")]
    pub ws_base: String,
    /// Base for `/api/company`; falls back to `api_base`.
    #[serde(default)]
    pub company_api_base: Option<String>,
    /// Base for `/api/transcribe`; falls back to `company_api_base`.
    #[serde(default)]
    pub transcribe_api_base: Option<String>,
    #[serde(default)]
    pub company_id: String,
    #[serde(default = "default_user_id")]
    pub user_id: u64,
    /// Optional end-user identifier forwarded on session creation.
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default = "default_language_code")]
    pub language_code: String,
    /// Extra context attached to every outbound message when non-empty.
    #[serde(default)]
    pub additional_info: Option<Map<String, Value>>,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Timer tunables (lives under `[timing]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_expiry_poll_secs")]
    pub expiry_poll_secs: u64,
    #[serde(default = "default_metadata_grace_ms")]
    pub metadata_grace_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            expiry_poll_secs: default_expiry_poll_secs(),
            metadata_grace_ms: default_metadata_grace_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            ws_base: default_ws_base(),
            company_api_base: None,
            transcribe_api_base: None,
            company_id: String::new(),
            user_id: default_user_id(),
            uid: None,
            language_code: default_language_code(),
            additional_info: None,
            timing: TimingConfig::default(),
        }
    }
}

fn default_api_base() -> String {
    "https://devsockets.elisa.live".to_string()
}
fn default_ws_base() -> String {
    "wss://devsockets.elisa.live?userId=".to_string()
}
fn default_user_id() -> u64 {
    1234
}
fn default_language_code() -> String {
    "en".to_string()
}
fn default_session_ttl_secs() -> u64 {
    23 * 60 * 60
}
fn default_reconnect_delay_ms() -> u64 {
    3000
}
fn default_expiry_poll_secs() -> u64 {
    60
}
fn default_metadata_grace_ms() -> u64 {
    5000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn trim_base(base: &str) -> &str {
    base.trim().trim_end_matches('/')
}

impl ChatConfig {
    /// The company id is the one setting without a usable default.
    pub fn validate(&self) -> Result<()> {
        if self.company_id.trim().is_empty() {
            return Err(ChatError::Config(
                "company id is not configured (set company_id or NOVA_COMPANY_ID)".into(),
            ));
        }
        Ok(())
    }

    pub fn company_id(&self) -> &str {
        self.company_id.trim()
    }

    pub fn ws_url(&self) -> String {
        format!("{}{}", trim_base(&self.ws_base), self.user_id)
    }

    pub fn create_session_url(&self) -> String {
        format!("{}/create_session", trim_base(&self.api_base))
    }

    pub fn company_url(&self) -> String {
        let base = self.company_api_base.as_deref().unwrap_or(&self.api_base);
        format!("{}/api/company", trim_base(base))
    }

    pub fn transcribe_url(&self) -> String {
        let base = self
            .transcribe_api_base
            .as_deref()
            .or(self.company_api_base.as_deref())
            .unwrap_or(&self.api_base);
        format!("{}/api/transcribe", trim_base(base))
    }

    /// `additional_info` only goes on the wire when it has entries.
    pub fn outbound_additional_info(&self) -> Option<Map<String, Value>> {
        self.additional_info
            .as_ref()
            .filter(|info| !info.is_empty())
            .cloned()
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.timing.session_ttl_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.timing.reconnect_delay_ms)
    }

    pub fn expiry_poll_interval(&self) -> Duration {
        Duration::from_secs(self.timing.expiry_poll_secs.max(1))
    }

    pub fn metadata_grace(&self) -> Duration {
        Duration::from_millis(self.timing.metadata_grace_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.connect_timeout_ms.max(1))
    }
}
