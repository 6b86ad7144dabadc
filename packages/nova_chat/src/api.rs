//! HTTP side of the backend: session creation, company lookup and audio
//! transcription. The chat itself runs over the socket.

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::debug;

use crate::company::Company;
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::protocol::SessionId;
use crate::session::{CreateSessionRequest, SessionBackend};

const TRANSCRIPTION_FAILED: &str = "Transcription failed";

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    create_session_url: String,
    company_url: String,
    transcribe_url: String,
}

impl ApiClient {
    pub fn new(config: &ChatConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(http: reqwest::Client, config: &ChatConfig) -> Self {
        Self {
            http,
            create_session_url: config.create_session_url(),
            company_url: config.company_url(),
            transcribe_url: config.transcribe_url(),
        }
    }

    /// `GET /api/company?companyId=<id>`
    pub async fn fetch_company(&self, company_id: &str) -> Result<Company> {
        let id = company_id.trim();
        debug!(company_id = id, "Fetching company");

        let resp = self
            .http
            .get(&self.company_url)
            .query(&[("companyId", id)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Failed to fetch company: {}", status.as_u16()));
            return Err(ChatError::Protocol(message));
        }

        Ok(resp.json().await?)
    }

    /// Upload a recording and return its transcription.
    pub async fn transcribe(
        &self,
        audio: Vec<u8>,
        file_name: &str,
        duration_secs: f64,
    ) -> Result<String> {
        debug!(file_name, bytes = audio.len(), duration_secs, "Uploading audio");

        let part = Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str(audio_mime(file_name))?;
        let form = Form::new()
            .part("file", part)
            .text("endTime", duration_secs.to_string());

        let resp = self
            .http
            .post(&self.transcribe_url)
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let message = ["details", "error"]
                .iter()
                .find_map(|field| body.get(*field).and_then(Value::as_str))
                .unwrap_or(TRANSCRIPTION_FAILED);
            return Err(ChatError::Protocol(message.to_string()));
        }

        body.get("transcription")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ChatError::Protocol(TRANSCRIPTION_FAILED.into()))
    }
}

impl SessionBackend for ApiClient {
    /// `POST /create_session`. A non-2xx answer or a missing/blank
    /// `session_id` is a failure.
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<SessionId> {
        let resp = self
            .http
            .post(&self.create_session_url)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::SessionCreation(format!("{}: {}", status, body.trim())));
        }

        let body: Value = resp.json().await?;
        body.get("session_id")
            .cloned()
            .and_then(|v| serde_json::from_value::<SessionId>(v).ok())
            .filter(|id| !id.is_blank())
            .ok_or_else(|| ChatError::SessionCreation("Backend returned no session_id".into()))
    }
}

fn audio_mime(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "webm" => "audio/webm",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "m4a" | "mp4" => "audio/mp4",
        "ogg" | "oga" => "audio/ogg",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}
