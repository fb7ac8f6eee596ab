//! The remote character service surface.
//!
//! The service is an opaque request/response contract: a health probe, a
//! chat endpoint whose reply may arrive batched or as incremental frames,
//! a voice-config endpoint, and a fire-and-forget message log. The
//! [`CharacterApi`] trait is the seam the controller talks through;
//! [`HttpCharacterApi`] is the reqwest-backed implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Message, VoiceConfig};

mod frames;
mod http;

pub use frames::{FrameDecoder, ReplyFrame, assemble_reply};
pub use http::HttpCharacterApi;

/// One outbound chat request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    /// The user's message (or the fixed intro prompt).
    pub message: String,
    /// The character's personality prompt.
    pub personality: String,
    /// The character's display name.
    pub character_name: String,
    /// Resolved voice configuration for this character.
    pub voice_config: VoiceConfig,
    /// Optional gender hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    /// Prior conversation, oldest first. Omitted when empty.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conversation_history: Vec<Message>,
}

/// A fully assembled reply from the chat endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotReply {
    /// The complete reply text.
    pub text: String,
    /// Audio clip reference, if the terminal fragment carried one.
    pub audio_ref: Option<String>,
}

/// One fire-and-forget transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Message sender (user marker or character name).
    pub sender: String,
    /// Message text.
    pub text: String,
    /// Client-generated session correlation ID.
    pub session_id: String,
    /// Unix epoch milliseconds when the session started.
    pub session_timestamp: i64,
}

/// The remote character service.
///
/// All methods suspend cooperatively; none block. Implementations map
/// transport failures to [`SessionError`](crate::error::SessionError).
#[async_trait]
pub trait CharacterApi: Send + Sync {
    /// One-shot availability probe. Any failure means unavailable.
    async fn check_health(&self) -> bool;

    /// Send a chat turn and assemble the (possibly streamed) reply.
    async fn chat(&self, turn: &ChatTurn) -> Result<BotReply>;

    /// Fetch the voice configuration for a character.
    async fn fetch_voice_config(&self, name: &str, gender: Option<&str>) -> Result<VoiceConfig>;

    /// Log one transcript entry. Callers treat failures as best-effort.
    async fn log_message(&self, entry: &LogEntry) -> Result<()>;
}
