//! Error types for the session controller.
//!
//! Each error variant carries a stable error code (SCREAMING_SNAKE_CASE)
//! that is included in the Display output and accessible via
//! [`SessionError::code()`]. Codes are part of the public API contract and
//! will not change.
//!
//! User-facing surfacing is deliberately narrow: only voice-unavailable and
//! exhausted network/stream failures ever reach the user, and only as the
//! short stable strings returned by [`SessionError::user_message()`]. Every
//! other failure is recovered locally.

/// Stable error codes for programmatic error handling.
///
/// These codes never change and form part of the public API contract.
/// Use these for distinguishing errors rather than parsing Display output.
pub mod error_codes {
    /// Every voice-config resolution tier failed.
    pub const VOICE_UNAVAILABLE: &str = "VOICE_UNAVAILABLE";

    /// Chat or voice endpoint unreachable or non-2xx.
    pub const NETWORK_FAILED: &str = "NETWORK_FAILED";

    /// An explicit error frame arrived inside an otherwise-open stream.
    pub const STREAM_FAILED: &str = "STREAM_FAILED";

    /// Audio clip failed to fetch or decode (not a cancellation).
    pub const PLAYBACK_FAILED: &str = "PLAYBACK_FAILED";

    /// Persistent store read or write failed.
    pub const STORE_FAILED: &str = "STORE_FAILED";
}

/// Errors produced by the session controller and its collaborators.
///
/// Each variant includes a stable error code accessible via
/// [`SessionError::code()`]. The Display impl formats as `[CODE] message`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Every voice-config resolution tier failed.
    #[error("[{}] {}", error_codes::VOICE_UNAVAILABLE, .0)]
    VoiceUnavailable(String),

    /// Chat or voice endpoint unreachable or non-2xx.
    #[error("[{}] {}", error_codes::NETWORK_FAILED, .0)]
    Network(String),

    /// An explicit error frame inside an otherwise-successful response.
    #[error("[{}] {}", error_codes::STREAM_FAILED, .0)]
    Stream(String),

    /// Audio playback failed for a reason other than cancellation.
    #[error("[{}] {}", error_codes::PLAYBACK_FAILED, .0)]
    Playback(String),

    /// Persistent store read or write failed.
    #[error("[{}] {}", error_codes::STORE_FAILED, .0)]
    Store(String),
}

/// Stable user-facing string for a failed voice resolution.
pub const VOICE_UNAVAILABLE_MESSAGE: &str =
    "Voice data is missing for this character. Please recreate the character.";

/// Stable user-facing string for a send that exhausted its retries.
pub const SEND_FAILED_MESSAGE: &str = "Failed to send message. Please try again.";

impl SessionError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::VoiceUnavailable(_) => error_codes::VOICE_UNAVAILABLE,
            Self::Network(_) => error_codes::NETWORK_FAILED,
            Self::Stream(_) => error_codes::STREAM_FAILED,
            Self::Playback(_) => error_codes::PLAYBACK_FAILED,
            Self::Store(_) => error_codes::STORE_FAILED,
        }
    }

    /// Returns the inner message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::VoiceUnavailable(m)
            | Self::Network(m)
            | Self::Stream(m)
            | Self::Playback(m)
            | Self::Store(m) => m,
        }
    }

    /// Returns true if this error represents a transient failure that the
    /// backoff executor may retry.
    ///
    /// Only network failures are retryable. A stream error arrives after the
    /// connection already completed, so retrying it would consume an attempt
    /// for a request that did reach the server; it surfaces immediately.
    /// Voice, playback, and store failures have their own recovery paths.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Returns the short, stable string shown to the user for this error.
    ///
    /// The UI layer renders these verbatim; raw error internals never cross
    /// that boundary.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::VoiceUnavailable(_) => VOICE_UNAVAILABLE_MESSAGE,
            _ => SEND_FAILED_MESSAGE,
        }
    }
}

/// Convenience alias for session results.
pub type Result<T> = std::result::Result<T, SessionError>;
