//! Conversation session controller.
//!
//! [`SessionController`] is the integration point: it owns the ordered
//! message history for one character, drives the intro and send lifecycles,
//! persists state through the key-value store, and hands audio references to
//! the playback coordinator.
//!
//! The lifecycle is a small state machine:
//!
//! ```text
//! Idle -> AwaitingIntro -> Ready <-> Sending
//! ```
//!
//! with an orthogonal `api_available` flag set by a one-time health check in
//! [`SessionController::activate`]. The intro runs at most once per
//! controller lifetime; the guard is structural (only the Idle to
//! AwaitingIntro transition can reach it), not a side flag.
//!
//! The controller is single-owner: all mutating operations take `&mut self`
//! and at most one send is in flight at a time. Persistence and transcript
//! logging are detached best-effort tasks whose failures are logged and
//! discarded.

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::{CharacterApi, ChatTurn, LogEntry};
use crate::backoff::{BackoffPolicy, retry_signal, run_with_backoff};
use crate::error::{Result, SEND_FAILED_MESSAGE, VOICE_UNAVAILABLE_MESSAGE};
use crate::playback::{AudioSink, PlaybackCoordinator, PlaybackOutcome};
use crate::resolver::{SideChannel, VoiceResolver};
use crate::store::{KvStore, keys};
use crate::types::{Character, Message, SessionMeta, VoiceConfig};

/// Fixed prompt for the one-shot self-introduction.
const INTRO_PROMPT: &str = "Introduce yourself to the user in one short message, staying in character.";

/// Trailing messages shown before any "reveal more" request.
const INITIAL_VISIBLE_MESSAGES: usize = 20;

/// Lifecycle phase of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created but not yet activated.
    Idle,
    /// Running the one-shot intro.
    AwaitingIntro,
    /// Accepting input.
    Ready,
    /// A send is in flight; further sends are no-ops.
    Sending,
}

/// De-duplication marker shared with detached playback tasks.
///
/// `current` is set optimistically when a clip starts; `completed` tracks
/// the last clip that actually finished. A failed or cancelled clip rolls
/// `current` back to `completed`, never to another unfinished clip.
#[derive(Debug, Default)]
struct PlayedMarker {
    current: Option<String>,
    completed: Option<String>,
}

/// Owns one conversation with a single character.
pub struct SessionController {
    character: Character,
    store: Arc<dyn KvStore>,
    api: Arc<dyn CharacterApi>,
    resolver: VoiceResolver,
    playback: Arc<PlaybackCoordinator>,
    session: SessionMeta,
    cancel: CancellationToken,
    backoff: BackoffPolicy,
    retrying_tx: watch::Sender<bool>,
    retrying_rx: watch::Receiver<bool>,

    phase: Phase,
    api_available: bool,
    messages: Vec<Message>,
    visible_count: usize,
    audio_enabled: bool,
    last_played: Arc<Mutex<PlayedMarker>>,
    voice_config: Option<VoiceConfig>,
    last_error: Option<&'static str>,
    intro_error: Option<&'static str>,
}

impl SessionController {
    /// Create a controller for `character` over the given collaborators.
    ///
    /// The controller starts in [`Phase::Idle`]; call
    /// [`activate`](Self::activate) before sending messages.
    pub fn new(
        character: Character,
        store: Arc<dyn KvStore>,
        api: Arc<dyn CharacterApi>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let playback = Arc::new(PlaybackCoordinator::new(sink, cancel.clone()));
        let resolver = VoiceResolver::new(Arc::clone(&store), Arc::clone(&api));
        let (retrying_tx, retrying_rx) = retry_signal();
        Self {
            character,
            store,
            api,
            resolver,
            playback,
            session: SessionMeta::new(),
            cancel,
            backoff: BackoffPolicy::default(),
            retrying_tx,
            retrying_rx,
            phase: Phase::Idle,
            api_available: false,
            messages: Vec::new(),
            visible_count: INITIAL_VISIBLE_MESSAGES,
            audio_enabled: true,
            last_played: Arc::new(Mutex::new(PlayedMarker::default())),
            voice_config: None,
            last_error: None,
            intro_error: None,
        }
    }

    /// Attach a side-channel source for voice-config resolution.
    pub fn with_side_channel(mut self, side_channel: Arc<dyn SideChannel>) -> Self {
        self.resolver.attach_side_channel(side_channel);
        self
    }

    /// Override the retry policy for the send path.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Load persisted state, run the health check, and generate the intro
    /// when the character has no history yet.
    ///
    /// Only valid from [`Phase::Idle`]; a second call is a no-op, which is
    /// what makes the intro one-shot.
    pub async fn activate(&mut self) {
        if self.phase != Phase::Idle {
            return;
        }
        self.load_persisted_state().await;
        self.api_available = self.api.check_health().await;
        if !self.api_available {
            tracing::warn!(character = %self.character.name, "service unavailable, session is read-only");
        }
        if self.api_available && self.messages.is_empty() {
            self.phase = Phase::AwaitingIntro;
            self.run_intro().await;
        }
        self.phase = Phase::Ready;
    }

    /// Send a user message and await the character's reply.
    ///
    /// No-op when the input is blank, the service is unavailable, or a send
    /// is already in flight. The user message is appended before the network
    /// call starts and stays in history even when the send ultimately fails.
    pub async fn send_message(&mut self, input: &str) {
        let text = input.trim();
        if text.is_empty() || !self.api_available || self.phase != Phase::Ready {
            return;
        }
        self.last_error = None;

        let prior_history = self.messages.clone();
        let user = Message::user(text);
        self.append(user.clone());
        self.persist_history();
        self.phase = Phase::Sending;

        let text = text.to_string();
        let character = self.character.clone();
        let cached_voice = self.voice_config.clone();
        let api = Arc::clone(&self.api);
        let resolver = &self.resolver;
        let outcome = run_with_backoff(&self.backoff, &self.retrying_tx, |_attempt| {
            let api = Arc::clone(&api);
            let text = text.clone();
            let character = character.clone();
            let cached_voice = cached_voice.clone();
            let prior_history = prior_history.clone();
            async move {
                // Voice resolution runs inside the wrapper but a failure is
                // not retryable, so it surfaces without consuming attempts.
                let voice = match cached_voice {
                    Some(voice) => voice,
                    None => resolver.resolve(&character).await?,
                };
                let turn = ChatTurn {
                    message: text,
                    personality: character.personality.clone(),
                    character_name: character.name.clone(),
                    voice_config: voice.clone(),
                    gender: character.gender.clone(),
                    conversation_history: prior_history,
                };
                let reply = api.chat(&turn).await?;
                Ok((voice, reply))
            }
        })
        .await;

        self.phase = Phase::Ready;
        match outcome {
            Ok((voice, reply)) => {
                self.voice_config = Some(voice);
                let bot = Message::bot(self.character.name.clone(), reply.text, reply.audio_ref);
                self.append(bot.clone());
                self.persist_history();
                self.log_detached(&user);
                self.log_detached(&bot);
                self.maybe_play(&bot);
            }
            Err(e) => {
                tracing::warn!(error = %e, "send failed");
                self.last_error = Some(e.user_message());
            }
        }
    }

    /// One-shot intro. Fails outright rather than retrying; a failure leaves
    /// the history empty with `intro_error` set.
    async fn run_intro(&mut self) {
        let voice = match self.resolver.resolve(&self.character).await {
            Ok(voice) => voice,
            Err(e) => {
                tracing::warn!(error = %e, "intro aborted, no voice config");
                self.intro_error = Some(VOICE_UNAVAILABLE_MESSAGE);
                return;
            }
        };
        self.voice_config = Some(voice.clone());
        let turn = ChatTurn {
            message: INTRO_PROMPT.to_string(),
            personality: self.character.personality.clone(),
            character_name: self.character.name.clone(),
            voice_config: voice,
            gender: self.character.gender.clone(),
            conversation_history: Vec::new(),
        };
        match self.api.chat(&turn).await {
            Ok(reply) => {
                let bot = Message::bot(self.character.name.clone(), reply.text, reply.audio_ref);
                self.append(bot.clone());
                self.persist_history();
                self.log_detached(&bot);
                // Playback starts only after the message is in history.
                self.maybe_play(&bot);
            }
            Err(e) => {
                tracing::warn!(error = %e, "intro request failed");
                self.intro_error = Some(SEND_FAILED_MESSAGE);
            }
        }
    }

    /// Start playback for `message` unless audio is off, the message has no
    /// clip, or the clip was already played.
    ///
    /// The last-played marker is set optimistically here and rolled back by
    /// the detached task if the clip does not complete, so a later replay
    /// can try again.
    fn maybe_play(&self, message: &Message) {
        if !self.audio_enabled {
            return;
        }
        let Some(audio_ref) = message.audio_ref.clone() else {
            return;
        };
        let hash = message.identity_hash();
        {
            let Ok(mut marker) = self.last_played.lock() else {
                return;
            };
            if marker.current.as_deref() == Some(hash.as_str()) {
                tracing::debug!(audio_ref, "clip already played, skipping");
                return;
            }
            marker.current = Some(hash.clone());
        }

        let playback = Arc::clone(&self.playback);
        let store = Arc::clone(&self.store);
        let last_played = Arc::clone(&self.last_played);
        let cancel = self.cancel.clone();
        let key = keys::last_played_hash(&self.character.name);
        tokio::spawn(async move {
            let outcome = playback.play(&audio_ref).await;
            if outcome == PlaybackOutcome::Completed {
                if let Ok(mut marker) = last_played.lock() {
                    marker.completed = Some(hash.clone());
                }
                if cancel.is_cancelled() {
                    return;
                }
                if let Err(e) = store.set(&key, &hash).await {
                    tracing::debug!(error = %e, "last-played hash not persisted");
                }
            } else if let Ok(mut marker) = last_played.lock() {
                // Roll back only if a newer clip has not claimed the marker,
                // and only ever to a clip that finished.
                if marker.current.as_deref() == Some(hash.as_str()) {
                    marker.current = marker.completed.clone();
                }
            }
        });
    }

    /// Stop any playing clip. Its marker rolls back so it can replay later.
    pub fn stop_audio(&self) {
        self.playback.stop();
    }

    /// Toggle audio playback, persisting the choice. Disabling stops any
    /// active clip.
    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.audio_enabled = enabled;
        if !enabled {
            self.playback.stop();
        }
        let store = Arc::clone(&self.store);
        spawn_detached("audio toggle persist", async move {
            store
                .set(keys::AUDIO_ENABLED, if enabled { "true" } else { "false" })
                .await
        });
    }

    /// Widen the visible suffix window by `additional` messages.
    pub fn reveal_more(&mut self, additional: usize) {
        self.visible_count = self.visible_count.saturating_add(additional);
    }

    /// The trailing window of history currently revealed.
    pub fn visible_messages(&self) -> &[Message] {
        let shown = self.visible_count.min(self.messages.len());
        &self.messages[self.messages.len() - shown..]
    }

    /// The full ordered history.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn api_available(&self) -> bool {
        self.api_available
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    /// User-facing error from the last failed send, cleared on the next one.
    pub fn last_error(&self) -> Option<&'static str> {
        self.last_error
    }

    /// User-facing error from a failed intro, if any.
    pub fn intro_error(&self) -> Option<&'static str> {
        self.intro_error
    }

    pub fn session(&self) -> &SessionMeta {
        &self.session
    }

    /// Observe the retry indicator: true while the send path is waiting to
    /// retry, false otherwise.
    pub fn retry_signal(&self) -> watch::Receiver<bool> {
        self.retrying_rx.clone()
    }

    /// Tear the session down: cancel in-flight playback and detached writes.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.playback.stop();
    }

    fn append(&mut self, message: Message) {
        self.messages.push(message);
        // Keep newly appended messages inside the visible window.
        self.visible_count = self.visible_count.saturating_add(1);
    }

    async fn load_persisted_state(&mut self) {
        match self.store.get(keys::AUDIO_ENABLED).await {
            Ok(Some(raw)) => self.audio_enabled = raw != "false",
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "audio toggle not loaded"),
        }
        match self
            .store
            .get(&keys::last_played_hash(&self.character.name))
            .await
        {
            Ok(Some(hash)) => {
                if let Ok(mut marker) = self.last_played.lock() {
                    marker.current = Some(hash.clone());
                    marker.completed = Some(hash);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "last-played hash not loaded"),
        }
        match self.store.get(&keys::history(&self.character.name)).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Message>>(&raw) {
                Ok(messages) => self.messages = messages,
                Err(e) => {
                    tracing::warn!(error = %e, "stored history unreadable, starting empty");
                }
            },
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "history not loaded"),
        }
    }

    /// Persist the full history as a detached write.
    fn persist_history(&self) {
        let raw = match serde_json::to_string(&self.messages) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(error = %e, "history not serializable");
                return;
            }
        };
        let store = Arc::clone(&self.store);
        let key = keys::history(&self.character.name);
        let cancel = self.cancel.clone();
        spawn_detached("history persist", async move {
            if cancel.is_cancelled() {
                return Ok(());
            }
            store.set(&key, &raw).await
        });
    }

    /// Log one message to the transcript endpoint, best-effort.
    fn log_detached(&self, message: &Message) {
        let entry = LogEntry {
            sender: message.sender.clone(),
            text: message.text.clone(),
            session_id: self.session.session_id.clone(),
            session_timestamp: self.session.started_at,
        };
        let api = Arc::clone(&self.api);
        spawn_detached("transcript log", async move { api.log_message(&entry).await });
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Run a best-effort side effect; failures are logged and discarded.
fn spawn_detached<F>(task: &'static str, fut: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            tracing::debug!(task, error = %e, "best-effort task failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::BotReply;
    use crate::error::SessionError;
    use crate::store::MemoryKvStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedApi {
        healthy: bool,
        reply: Result<BotReply>,
        chats: AtomicU32,
    }

    impl ScriptedApi {
        fn healthy(reply: Result<BotReply>) -> Arc<Self> {
            Arc::new(Self {
                healthy: true,
                reply,
                chats: AtomicU32::new(0),
            })
        }

        fn reply_text(text: &str) -> Result<BotReply> {
            Ok(BotReply {
                text: text.into(),
                audio_ref: None,
            })
        }
    }

    #[async_trait]
    impl CharacterApi for ScriptedApi {
        async fn check_health(&self) -> bool {
            self.healthy
        }

        async fn chat(&self, _turn: &ChatTurn) -> Result<BotReply> {
            self.chats.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(e) => Err(SessionError::Network(e.message().to_string())),
            }
        }

        async fn fetch_voice_config(
            &self,
            _name: &str,
            _gender: Option<&str>,
        ) -> Result<VoiceConfig> {
            Ok(VoiceConfig(serde_json::json!({ "voice": "test" })))
        }

        async fn log_message(&self, _entry: &LogEntry) -> Result<()> {
            Ok(())
        }
    }

    struct NullSink;

    #[async_trait]
    impl AudioSink for NullSink {
        async fn play(&self, _audio_ref: &str, _cancel: CancellationToken) -> PlaybackOutcome {
            PlaybackOutcome::Completed
        }
    }

    /// "a.mp3" hangs until cancelled; anything else fails outright.
    struct MixedSink {
        a_starts: AtomicU32,
    }

    #[async_trait]
    impl AudioSink for MixedSink {
        async fn play(&self, audio_ref: &str, cancel: CancellationToken) -> PlaybackOutcome {
            if audio_ref == "a.mp3" {
                self.a_starts.fetch_add(1, Ordering::SeqCst);
                cancel.cancelled().await;
                PlaybackOutcome::Cancelled
            } else {
                PlaybackOutcome::Failed("decode failed".into())
            }
        }
    }

    fn controller(api: Arc<ScriptedApi>) -> SessionController {
        let character = Character {
            name: "Luna".into(),
            personality: "warm".into(),
            gender: None,
            voice_config: Some(VoiceConfig(serde_json::json!({ "voice": "luna" }))),
        };
        SessionController::new(
            character,
            Arc::new(MemoryKvStore::new()),
            api,
            Arc::new(NullSink),
        )
    }

    #[tokio::test]
    async fn activate_is_one_shot() {
        let api = ScriptedApi::healthy(ScriptedApi::reply_text("Hi, I am Luna."));
        let mut controller = controller(api.clone());
        controller.activate().await;
        assert_eq!(controller.phase(), Phase::Ready);
        assert_eq!(controller.messages().len(), 1);

        // A second activation must not re-run the intro.
        controller.activate().await;
        assert_eq!(controller.messages().len(), 1);
        assert_eq!(api.chats.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_input_is_a_no_op() {
        let api = ScriptedApi::healthy(ScriptedApi::reply_text("Hi."));
        let mut controller = controller(api.clone());
        controller.activate().await;
        let before = controller.messages().len();
        controller.send_message("   ").await;
        controller.send_message("").await;
        assert_eq!(controller.messages().len(), before);
        assert_eq!(api.chats.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_is_rejected_before_activation() {
        let api = ScriptedApi::healthy(ScriptedApi::reply_text("Hi."));
        let mut controller = controller(api.clone());
        controller.send_message("hello").await;
        assert!(controller.messages().is_empty());
        assert_eq!(api.chats.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn visible_window_is_a_suffix() {
        let api = ScriptedApi::healthy(ScriptedApi::reply_text("Hi."));
        let mut controller = controller(api);
        controller.messages = (0..60).map(|i| Message::user(format!("m{i}"))).collect();
        controller.visible_count = 20;

        let visible = controller.visible_messages();
        assert_eq!(visible.len(), 20);
        assert_eq!(visible[0].text, "m40");
        assert_eq!(visible[19].text, "m59");

        controller.reveal_more(20);
        assert_eq!(controller.visible_messages().len(), 40);
        controller.reveal_more(usize::MAX);
        assert_eq!(controller.visible_messages().len(), 60);
    }

    #[tokio::test]
    async fn failed_send_keeps_user_message_and_sets_error() {
        let api = ScriptedApi::healthy(Err(SessionError::Network("boom".into())));
        let mut controller = controller(api);
        // Pretend the intro already happened so activate skips it.
        controller.messages = vec![Message::bot("Luna", "Hi.", None)];
        controller.phase = Phase::Ready;
        controller.api_available = true;
        controller.backoff = BackoffPolicy {
            max_retries: 0,
            base_delay: std::time::Duration::from_millis(1),
        };

        controller.send_message("hi").await;
        assert_eq!(controller.phase(), Phase::Ready);
        assert_eq!(controller.messages().len(), 2);
        assert_eq!(controller.messages()[1].text, "hi");
        assert_eq!(controller.last_error(), Some(SEND_FAILED_MESSAGE));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_successor_rolls_marker_back_to_last_completed_clip() {
        let api = ScriptedApi::healthy(ScriptedApi::reply_text("Hi."));
        let character = Character {
            name: "Luna".into(),
            personality: "warm".into(),
            gender: None,
            voice_config: None,
        };
        let sink = Arc::new(MixedSink {
            a_starts: AtomicU32::new(0),
        });
        let controller = SessionController::new(
            character,
            Arc::new(MemoryKvStore::new()),
            api,
            sink.clone(),
        );

        let first = Message::bot("Luna", "first", Some("a.mp3".into()));
        let second = Message::bot("Luna", "second", Some("b.mp3".into()));

        // Clip A starts and hangs.
        controller.maybe_play(&first);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(sink.a_starts.load(Ordering::SeqCst), 1);

        // Clip B supersedes A, then fails. Neither clip completed, so the
        // marker must not point at A.
        controller.maybe_play(&second);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        // A is replayable again.
        controller.maybe_play(&first);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(sink.a_starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn audio_toggle_is_persisted() {
        let api = ScriptedApi::healthy(ScriptedApi::reply_text("Hi."));
        let store = Arc::new(MemoryKvStore::new());
        let character = Character {
            name: "Luna".into(),
            personality: "warm".into(),
            gender: None,
            voice_config: None,
        };
        let mut controller =
            SessionController::new(character, store.clone(), api, Arc::new(NullSink));
        controller.set_audio_enabled(false);
        assert!(!controller.audio_enabled());

        // The write is detached; give it a chance to run.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        let stored = store.get(keys::AUDIO_ENABLED).await;
        assert!(matches!(stored, Ok(Some(ref v)) if v == "false"));
    }
}
