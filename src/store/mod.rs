//! Persistent key-value storage behind the session controller.
//!
//! Defines the [`KvStore`] trait for async get/set/remove, the
//! [`VersionedRecord`] envelope for schema-evolvable values, and the stable
//! key names the controller uses. [`MemoryKvStore`] is the in-memory
//! fallback; [`FsKvStore`] persists one file per key with atomic writes.
//!
//! Store failures never fail a user-visible action: callers either
//! propagate [`SessionError::Store`] into a detached error boundary or
//! treat a failed read as an absent value.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize as SerializeDerive};

use crate::error::{Result, SessionError};

mod fs;
mod memory;

pub use fs::FsKvStore;
pub use memory::MemoryKvStore;

/// Stable key names used by the session controller.
///
/// The spelling of these keys is part of the durable-data contract; values
/// written by older builds must remain readable.
pub mod keys {
    /// JSON array of messages for one character.
    pub fn history(character: &str) -> String {
        format!("history-{character}")
    }

    /// Versioned voice-config record for one character.
    pub fn voice_config(character: &str) -> String {
        format!("voiceConfig-{character}")
    }

    /// Identity hash of the last clip that finished playing.
    pub fn last_played_hash(character: &str) -> String {
        format!("lastPlayedAudioHash-{character}")
    }

    /// Stringified boolean controlling playback globally.
    pub const AUDIO_ENABLED: &str = "audioEnabled";

    /// Snapshot of the last-created character (resolver tier 3).
    pub const CURRENT_CHARACTER: &str = "currentCharacter";
}

/// Async key-value store with string values.
///
/// The durable backend is an external collaborator; implementations may be
/// lossy (quota, missing backend) and the controller degrades gracefully.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value, `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, overwriting any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Current envelope version written by this build.
pub const RECORD_VERSION: u32 = 1;

/// Durable-storage envelope: `{v, createdAt, payload}`.
///
/// A record is valid only if `v` is an integer, `createdAt` is present, and
/// the `payload` key exists. Anything else decodes to absent, never an
/// error, so corrupt values degrade to a cache miss.
#[derive(Debug, Clone, PartialEq, SerializeDerive, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedRecord<T> {
    /// Schema version of the payload.
    pub v: u32,
    /// Unix epoch milliseconds when the record was written.
    pub created_at: i64,
    /// The wrapped value.
    pub payload: T,
}

impl<T: Serialize + DeserializeOwned> VersionedRecord<T> {
    /// Wrap a payload in a fresh envelope at [`RECORD_VERSION`].
    pub fn new(payload: T) -> Self {
        Self {
            v: RECORD_VERSION,
            created_at: chrono::Utc::now().timestamp_millis(),
            payload,
        }
    }

    /// Serialize the envelope to its stored JSON form.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| SessionError::Store(format!("failed to encode record: {e}")))
    }

    /// Parse a stored value, returning `None` for anything that is not a
    /// valid envelope.
    pub fn decode(raw: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        // The validity invariant is structural: reject a float or string
        // version even if serde could coerce it.
        if !value.get("v")?.is_u64() {
            return None;
        }
        value.get("createdAt")?;
        value.get("payload")?;
        serde_json::from_value(value).ok()
    }
}

/// Read and unwrap a versioned record, treating every failure as absence.
pub async fn read_record<T: Serialize + DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Option<VersionedRecord<T>> {
    match store.get(key).await {
        Ok(Some(raw)) => VersionedRecord::decode(&raw),
        Ok(None) => None,
        Err(e) => {
            tracing::debug!(key, error = %e, "record read failed, treating as absent");
            None
        }
    }
}
