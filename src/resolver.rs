//! Layered voice-config resolution.
//!
//! Produces a voice configuration for a character through a deterministic
//! fallback chain; the precedence is a first-class list ([`TIER_ORDER`])
//! rather than nested control flow, so the order is visible and testable:
//!
//! 1. Versioned record in the persistent store.
//! 2. Side-channel copy (base64 of a versioned JSON blob).
//! 3. The saved "current character" snapshot, on exact name match.
//! 4. The character's own voice-config field.
//! 5. Remote fetch from the voice endpoint.
//!
//! Every hit below tier 1 is back-filled into the store for future calls.
//! Back-fills are best-effort: a write failure never fails the resolution.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::api::CharacterApi;
use crate::error::{Result, SessionError};
use crate::store::{KvStore, VersionedRecord, keys, read_record};
use crate::types::{Character, VoiceConfig};

/// Read-only source for the encoded side-channel copy (resolver tier 2).
///
/// In the original client this is a browser cookie; embedders supply
/// whatever durable side channel they have. The value is base64 of a
/// versioned JSON blob.
#[async_trait]
pub trait SideChannel: Send + Sync {
    /// Read the encoded value stored under `key`, if any.
    async fn read(&self, key: &str) -> Option<String>;
}

/// The cache-backed fallback tiers, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Store,
    SideChannel,
    Snapshot,
    CharacterDefault,
}

/// Tiers tried before the remote fetch; first hit wins.
const TIER_ORDER: [Tier; 4] = [
    Tier::Store,
    Tier::SideChannel,
    Tier::Snapshot,
    Tier::CharacterDefault,
];

/// Resolves voice configurations through the fallback chain.
pub struct VoiceResolver {
    store: Arc<dyn KvStore>,
    api: Arc<dyn CharacterApi>,
    side_channel: Option<Arc<dyn SideChannel>>,
}

impl VoiceResolver {
    /// Create a resolver over the given store and service client.
    pub fn new(store: Arc<dyn KvStore>, api: Arc<dyn CharacterApi>) -> Self {
        Self {
            store,
            api,
            side_channel: None,
        }
    }

    /// Attach a side-channel source for tier 2.
    pub fn attach_side_channel(&mut self, side_channel: Arc<dyn SideChannel>) {
        self.side_channel = Some(side_channel);
    }

    /// Builder form of [`attach_side_channel`](Self::attach_side_channel).
    pub fn with_side_channel(mut self, side_channel: Arc<dyn SideChannel>) -> Self {
        self.attach_side_channel(side_channel);
        self
    }

    /// Resolve the voice configuration for `character`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::VoiceUnavailable`] only when every tier,
    /// including the remote fetch, produced nothing.
    pub async fn resolve(&self, character: &Character) -> Result<VoiceConfig> {
        for tier in TIER_ORDER {
            let Some(config) = self.try_tier(tier, character).await else {
                continue;
            };
            tracing::debug!(character = %character.name, ?tier, "voice config resolved");
            if tier != Tier::Store {
                self.backfill(&character.name, &config).await;
            }
            return Ok(config);
        }
        self.fetch_remote(character).await
    }

    async fn try_tier(&self, tier: Tier, character: &Character) -> Option<VoiceConfig> {
        match tier {
            Tier::Store => {
                let key = keys::voice_config(&character.name);
                read_record::<VoiceConfig>(self.store.as_ref(), &key)
                    .await
                    .map(|record| record.payload)
            }
            Tier::SideChannel => {
                let side_channel = self.side_channel.as_ref()?;
                let key = keys::voice_config(&character.name);
                let encoded = side_channel.read(&key).await?;
                decode_side_channel(&encoded)
            }
            Tier::Snapshot => {
                let raw = self.store.get(keys::CURRENT_CHARACTER).await.ok()??;
                let snapshot: Character = serde_json::from_str(&raw).ok()?;
                if snapshot.name != character.name {
                    return None;
                }
                snapshot.voice_config
            }
            Tier::CharacterDefault => character.voice_config.clone(),
        }
    }

    async fn fetch_remote(&self, character: &Character) -> Result<VoiceConfig> {
        let config = self
            .api
            .fetch_voice_config(&character.name, character.gender.as_deref())
            .await
            .map_err(|e| {
                SessionError::VoiceUnavailable(format!(
                    "every local tier empty and remote fetch failed: {}",
                    e.message()
                ))
            })?;
        self.backfill(&character.name, &config).await;
        Ok(config)
    }

    /// Write the resolved config into tier 1. Failures are logged and
    /// ignored; resolution already succeeded.
    async fn backfill(&self, character_name: &str, config: &VoiceConfig) {
        let record = VersionedRecord::new(config.clone());
        let encoded = match record.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(character = character_name, error = %e, "voice back-fill encode failed");
                return;
            }
        };
        let key = keys::voice_config(character_name);
        if let Err(e) = self.store.set(&key, &encoded).await {
            tracing::warn!(character = character_name, error = %e, "voice back-fill write failed");
        }
    }
}

/// Decode a side-channel value: base64 wrapping a versioned JSON blob.
fn decode_side_channel(encoded: &str) -> Option<VoiceConfig> {
    let bytes = BASE64.decode(encoded.trim()).ok()?;
    let raw = String::from_utf8(bytes).ok()?;
    VersionedRecord::<VoiceConfig>::decode(&raw).map(|record| record.payload)
}
