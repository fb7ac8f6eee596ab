//! reqwest-backed implementation of [`CharacterApi`].
//!
//! The chat endpoint's body is consumed as a frame stream regardless of
//! whether the server batched or streamed the reply: bytes flow through a
//! [`FrameDecoder`] and the resulting frames are assembled with
//! [`assemble_reply`]. Transport-level framing beyond "lines of JSON" is
//! deliberately not assumed.

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::StatusCode;

use super::frames::{FrameDecoder, ReplyFrame, assemble_reply};
use super::{BotReply, CharacterApi, ChatTurn, LogEntry};
use crate::error::{Result, SessionError};
use crate::types::VoiceConfig;

/// HTTP client for the character service.
#[derive(Debug, Clone)]
pub struct HttpCharacterApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCharacterApi {
    /// Create a client rooted at `base_url` (no trailing slash required).
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn map_http_error(context: &str, status: StatusCode, body: &str) -> SessionError {
        let snippet: String = body.chars().take(200).collect();
        SessionError::Network(format!("{context} returned {status}: {snippet}"))
    }
}

/// Convert a response byte stream into a stream of reply frames.
fn frame_stream(
    byte_stream: impl Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = Result<ReplyFrame>> + Send {
    try_stream! {
        let mut decoder = FrameDecoder::new();
        let mut byte_stream = Box::pin(byte_stream);
        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk
                .map_err(|e| SessionError::Network(format!("reply stream interrupted: {e}")))?;
            for frame in decoder.push(&chunk) {
                yield frame;
            }
        }
        if let Some(frame) = decoder.finish() {
            yield frame;
        }
    }
}

#[async_trait]
impl CharacterApi for HttpCharacterApi {
    async fn check_health(&self) -> bool {
        match self.client.get(self.endpoint("/health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::info!(error = %e, "health check failed, service unavailable");
                false
            }
        }
    }

    async fn chat(&self, turn: &ChatTurn) -> Result<BotReply> {
        let response = self
            .client
            .post(self.endpoint("/chat"))
            .json(turn)
            .send()
            .await
            .map_err(|e| SessionError::Network(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error("chat", status, &body));
        }

        let mut frames = Vec::new();
        let stream = frame_stream(response.bytes_stream());
        let mut stream = Box::pin(stream);
        while let Some(frame) = stream.next().await {
            frames.push(frame?);
        }
        assemble_reply(frames)
    }

    async fn fetch_voice_config(&self, name: &str, gender: Option<&str>) -> Result<VoiceConfig> {
        let mut body = serde_json::json!({ "name": name });
        if let (Some(gender), Some(map)) = (gender, body.as_object_mut()) {
            map.insert("gender".into(), serde_json::json!(gender));
        }

        let response = self
            .client
            .post(self.endpoint("/voice-config"))
            .json(&body)
            .send()
            .await
            .map_err(|e| SessionError::Network(format!("voice-config request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error("voice-config", status, &body));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SessionError::Network(format!("voice-config body unreadable: {e}")))?;
        Ok(VoiceConfig(payload))
    }

    async fn log_message(&self, entry: &LogEntry) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint("/log-message"))
            .json(entry)
            .send()
            .await
            .map_err(|e| SessionError::Network(format!("log-message request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::map_http_error("log-message", status, ""));
        }
        Ok(())
    }
}
