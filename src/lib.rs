//! Banter: session controller for a character-chatbot client.
//!
//! This crate owns the conversational core that sits between a chat UI and
//! a remote character service: ordered message history, outbound request
//! orchestration with retry/backoff, streamed-reply assembly, single-flight
//! audio playback with cancellation and de-duplication, and a layered
//! fallback chain for per-character voice configuration.
//!
//! # Architecture
//!
//! Leaves first:
//! - [`store`]: key-value persistence (in-memory and filesystem backends)
//!   plus the versioned-record envelope for schema-evolvable values.
//! - [`api`]: the character service client (health, chat, voice config,
//!   transcript logging) and reply-frame assembly.
//! - [`resolver`]: voice-config resolution through an ordered tier list.
//! - [`backoff`]: exponential-backoff retry with an observable "retrying"
//!   signal.
//! - [`playback`]: single-flight audio playback, last-writer-wins.
//! - [`controller`]: the integration point tying the above together behind
//!   a small lifecycle state machine.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use banter::{Character, HttpCharacterApi, MemoryKvStore, SessionController};
//! use banter::playback::{AudioSink, PlaybackOutcome};
//! use tokio_util::sync::CancellationToken;
//!
//! struct SilentSink;
//!
//! #[async_trait::async_trait]
//! impl AudioSink for SilentSink {
//!     async fn play(&self, _audio_ref: &str, _cancel: CancellationToken) -> PlaybackOutcome {
//!         PlaybackOutcome::Completed
//!     }
//! }
//!
//! # async fn run() {
//! let character = Character {
//!     name: "Luna".into(),
//!     personality: "warm, curious".into(),
//!     gender: None,
//!     voice_config: None,
//! };
//! let mut session = SessionController::new(
//!     character,
//!     Arc::new(MemoryKvStore::new()),
//!     Arc::new(HttpCharacterApi::new("http://localhost:8080")),
//!     Arc::new(SilentSink),
//! );
//! session.activate().await;
//! session.send_message("hello!").await;
//! for message in session.visible_messages() {
//!     println!("{}: {}", message.sender, message.text);
//! }
//! # }
//! ```

pub mod api;
pub mod backoff;
pub mod controller;
pub mod error;
pub mod playback;
pub mod resolver;
pub mod store;
pub mod types;

pub use api::{
    BotReply, CharacterApi, ChatTurn, FrameDecoder, HttpCharacterApi, LogEntry, ReplyFrame,
};
pub use backoff::{BackoffPolicy, run_with_backoff};
pub use controller::{Phase, SessionController};
pub use error::{Result, SessionError};
pub use playback::{AudioSink, PlaybackCoordinator, PlaybackOutcome};
pub use resolver::{SideChannel, VoiceResolver};
pub use store::{FsKvStore, KvStore, MemoryKvStore, VersionedRecord};
pub use types::{Character, Message, SessionMeta, VoiceConfig};
