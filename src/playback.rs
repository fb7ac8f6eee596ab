//! Single-flight audio playback.
//!
//! [`PlaybackCoordinator`] guarantees at most one clip is audible at a time
//! with last-writer-wins semantics: starting a new clip cancels whatever is
//! currently playing. Cancellation is an expected outcome, not an error;
//! sinks report it as [`PlaybackOutcome::Cancelled`] and callers treat it as
//! "the clip did not finish", never as a failure to surface.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// How a playback attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The clip played to the end.
    Completed,
    /// The clip was cancelled, either by a newer clip or by shutdown.
    Cancelled,
    /// The clip could not be fetched or decoded.
    Failed(String),
}

/// Plays a single referenced audio clip.
///
/// Implementations must watch `cancel` and return
/// [`PlaybackOutcome::Cancelled`] promptly once it fires; a common shape is
/// `tokio::select!` over the decode loop and `cancel.cancelled()`.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, audio_ref: &str, cancel: CancellationToken) -> PlaybackOutcome;
}

struct ActiveClip {
    id: u64,
    token: CancellationToken,
}

/// Serializes playback so that at most one clip is active.
pub struct PlaybackCoordinator {
    sink: Arc<dyn AudioSink>,
    session: CancellationToken,
    active: Mutex<Option<ActiveClip>>,
    next_id: AtomicU64,
}

impl PlaybackCoordinator {
    /// Create a coordinator; all clip tokens are children of `session`, so
    /// cancelling the session token stops playback too.
    pub fn new(sink: Arc<dyn AudioSink>, session: CancellationToken) -> Self {
        Self {
            sink,
            session,
            active: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    /// Play `audio_ref`, cancelling any clip already in flight.
    ///
    /// Returns the sink's outcome. A clip that was superseded while playing
    /// reports [`PlaybackOutcome::Cancelled`].
    pub async fn play(&self, audio_ref: &str) -> PlaybackOutcome {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.session.child_token();
        if let Ok(mut active) = self.active.lock() {
            if let Some(prior) = active.replace(ActiveClip {
                id,
                token: token.clone(),
            }) {
                prior.token.cancel();
            }
        }

        let outcome = self.sink.play(audio_ref, token).await;

        // Clear our own slot only if a newer clip has not replaced it.
        if let Ok(mut active) = self.active.lock() {
            if active.as_ref().is_some_and(|clip| clip.id == id) {
                *active = None;
            }
        }
        if let PlaybackOutcome::Failed(reason) = &outcome {
            tracing::warn!(audio_ref, reason, "playback failed");
        }
        outcome
    }

    /// Cancel the active clip, if any. Idempotent.
    pub fn stop(&self) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(clip) = active.take() {
                clip.token.cancel();
            }
        }
    }
}
