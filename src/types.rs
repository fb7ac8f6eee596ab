//! Core data model for a character conversation.
//!
//! Provides [`Message`], [`Character`], the opaque [`VoiceConfig`] blob,
//! and [`SessionMeta`]. Message identity for playback de-duplication is the
//! `(sender, text, audio_ref)` tuple, hashed with blake3 via
//! [`Message::identity_hash`].
//!
//! # Examples
//!
//! ```
//! use banter::types::Message;
//!
//! let msg = Message::user("hello");
//! assert_eq!(msg.sender, "user");
//! assert!(msg.audio_ref.is_none());
//! ```

use serde::{Deserialize, Serialize};

/// The literal sender marker for user-authored messages.
pub const USER_SENDER: &str = "user";

/// One entry in the conversation history.
///
/// The history is append-only from the controller's perspective: messages
/// are never reordered or mutated in place once committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Either [`USER_SENDER`] or the character's display name.
    pub sender: String,
    /// The message text.
    pub text: String,
    /// Optional reference to an audio clip attached to this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
}

impl Message {
    /// Create a user-authored message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            sender: USER_SENDER.into(),
            text: text.into(),
            audio_ref: None,
        }
    }

    /// Create a character-authored message.
    pub fn bot(
        sender: impl Into<String>,
        text: impl Into<String>,
        audio_ref: Option<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            audio_ref,
        }
    }

    /// Hash of the `(sender, text, audio_ref)` identity tuple.
    ///
    /// Fields are separated by NUL bytes so that shifting text between
    /// fields cannot collide.
    pub fn identity_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.sender.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.text.as_bytes());
        hasher.update(&[0]);
        if let Some(ref audio_ref) = self.audio_ref {
            hasher.update(audio_ref.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Opaque voice configuration payload.
///
/// The controller only cares about its presence and persisted version;
/// the contents (language, pitch, rate, ...) pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoiceConfig(pub serde_json::Value);

/// The persona the user converses with, identified by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    /// Display name; also the key for all per-character persistence.
    pub name: String,
    /// Personality prompt sent with every chat request.
    pub personality: String,
    /// Optional gender hint forwarded to the voice endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    /// The character's own voice config, used as resolver tier 4.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_config: Option<VoiceConfig>,
}

/// Per-controller session identity, used only to correlate log entries.
///
/// Generated client-side once per controller lifetime; not a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    /// Unique session identifier.
    pub session_id: String,
    /// Unix epoch milliseconds when the session started.
    pub started_at: i64,
}

impl SessionMeta {
    /// Create a fresh session identity.
    pub fn new() -> Self {
        Self {
            session_id: format!("sess_{}", uuid::Uuid::new_v4()),
            started_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl Default for SessionMeta {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_uses_user_sender() {
        let msg = Message::user("hi");
        assert_eq!(msg.sender, USER_SENDER);
        assert_eq!(msg.text, "hi");
        assert!(msg.audio_ref.is_none());
    }

    #[test]
    fn bot_message_carries_audio_ref() {
        let msg = Message::bot("Luna", "hello", Some("a.mp3".into()));
        assert_eq!(msg.sender, "Luna");
        assert_eq!(msg.audio_ref.as_deref(), Some("a.mp3"));
    }

    #[test]
    fn identity_hash_is_stable() {
        let a = Message::bot("Luna", "hello", Some("a.mp3".into()));
        let b = Message::bot("Luna", "hello", Some("a.mp3".into()));
        assert_eq!(a.identity_hash(), b.identity_hash());
    }

    #[test]
    fn identity_hash_differs_per_field() {
        let base = Message::bot("Luna", "hello", Some("a.mp3".into()));
        let other_sender = Message::bot("Nova", "hello", Some("a.mp3".into()));
        let other_text = Message::bot("Luna", "hello!", Some("a.mp3".into()));
        let other_ref = Message::bot("Luna", "hello", Some("b.mp3".into()));
        let no_ref = Message::bot("Luna", "hello", None);
        assert_ne!(base.identity_hash(), other_sender.identity_hash());
        assert_ne!(base.identity_hash(), other_text.identity_hash());
        assert_ne!(base.identity_hash(), other_ref.identity_hash());
        assert_ne!(base.identity_hash(), no_ref.identity_hash());
    }

    #[test]
    fn identity_hash_field_boundaries_do_not_collide() {
        // "ab" + "c" must not hash like "a" + "bc".
        let a = Message::bot("ab", "c", None);
        let b = Message::bot("a", "bc", None);
        assert_ne!(a.identity_hash(), b.identity_hash());
    }

    #[test]
    fn message_serde_uses_camel_case() {
        let msg = Message::bot("Luna", "hi", Some("clip.mp3".into()));
        let json = serde_json::to_value(&msg).unwrap_or_default();
        assert_eq!(json["sender"], "Luna");
        assert_eq!(json["audioRef"], "clip.mp3");
    }

    #[test]
    fn message_omits_absent_audio_ref() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap_or_default();
        assert!(!json.contains("audioRef"));
    }

    #[test]
    fn message_round_trip() {
        let original = Message::bot("Luna", "text", Some("a.mp3".into()));
        let json = serde_json::to_string(&original).unwrap_or_default();
        let parsed: std::result::Result<Message, _> = serde_json::from_str(&json);
        assert!(parsed.is_ok());
        match parsed {
            Ok(msg) => assert_eq!(msg, original),
            Err(_) => unreachable!("deserialization succeeded"),
        }
    }

    #[test]
    fn character_serde_camel_case_voice_config() {
        let character = Character {
            name: "Luna".into(),
            personality: "dreamy".into(),
            gender: Some("female".into()),
            voice_config: Some(VoiceConfig(serde_json::json!({"pitch": 1.2}))),
        };
        let json = serde_json::to_value(&character).unwrap_or_default();
        assert_eq!(json["voiceConfig"]["pitch"], 1.2);
    }

    #[test]
    fn voice_config_is_transparent() {
        let config = VoiceConfig(serde_json::json!({"lang": "en-GB"}));
        let json = serde_json::to_string(&config).unwrap_or_default();
        assert_eq!(json, r#"{"lang":"en-GB"}"#);
    }

    #[test]
    fn session_meta_has_prefixed_id_and_timestamp() {
        let meta = SessionMeta::new();
        assert!(meta.session_id.starts_with("sess_"));
        // Well past 2020.
        assert!(meta.started_at > 1_577_836_800_000);
    }

    #[test]
    fn session_meta_ids_are_unique() {
        let a = SessionMeta::new();
        let b = SessionMeta::new();
        assert_ne!(a.session_id, b.session_id);
    }
}
