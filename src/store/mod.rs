//! Storage contracts: the per-broadcaster message queue, rewards, character
//! cards, user settings and image blobs.
//!
//! The runtime only talks to these traits. `memory` provides an in-process
//! implementation for tests and the CLI.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::{Fixture, MemoryImageStore, MemoryStore};

/// Default per-message TTS length in seconds.
pub const DEFAULT_TTS_LIMIT_SECS: u64 = 80;
/// Default number of SFX allowed in one universal message (0 = unlimited).
pub const DEFAULT_MAX_SFX_COUNT: usize = 10;
/// Default total SFX seconds in one universal message (0 = unlimited).
pub const DEFAULT_SFX_TOTAL_LIMIT_SECS: u64 = 0;

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The queue has nothing waiting for this broadcaster.
    #[error("no rows")]
    NoRows,

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, key: impl fmt::Display) -> Self {
        StoreError::NotFound {
            kind,
            key: key.to_string(),
        }
    }
}

// ── Queue ──

/// Lifecycle of a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Wait,
    Current,
    Processed,
    Deleted,
}

/// One queued redemption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub broadcaster_id: Uuid,
    /// Twitch login of the viewer who redeemed.
    pub requester: String,
    pub text: String,
    pub reward_id: String,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default)]
    pub image_ids: Vec<String>,
    #[serde(default)]
    pub show_images: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_response: Option<String>,
}

// ── Rewards and characters ──

/// What a redemption does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardType {
    Tts,
    UniversalTts,
    Ai,
    Agentic,
}

impl RewardType {
    /// Whether this reward needs a character card to run.
    pub fn is_character_bound(&self) -> bool {
        matches!(self, RewardType::Tts | RewardType::Ai)
    }
}

/// A channel-point reward as configured by the broadcaster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reward {
    pub twitch_reward_id: String,
    pub broadcaster_id: Uuid,
    pub reward_type: RewardType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageExample {
    pub request: String,
    pub response: String,
}

/// A persona: prompt material plus the reference audio its voice is cloned from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: Uuid,
    pub name: String,
    /// Short name used as a voice in the mini-DSL (`name:`).
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub message_examples: Vec<MessageExample>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default, with = "b64")]
    pub voice_reference: Vec<u8>,
}

/// The subset of a card the character detector sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterInfo {
    pub id: Uuid,
    pub name: String,
    pub short_name: String,
    pub description: String,
}

impl From<&Card> for CharacterInfo {
    fn from(card: &Card) -> Self {
        Self {
            id: card.id,
            name: card.name.clone(),
            short_name: card.short_name.clone(),
            description: card.description.clone(),
        }
    }
}

/// Per-character usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemCounts {
    pub redeems: u64,
    pub tts_redeems: u64,
}

// ── Users ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub twitch_login: String,
}

/// Per-broadcaster knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    /// Comma-separated regex patterns replaced with `(filtered)`.
    pub filters: String,
    /// Shared secret for the low-trust "current message" controls.
    pub control_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sfx_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sfx_total_limit: Option<u64>,
}

impl UserSettings {
    pub fn tts_limit_secs(&self) -> u64 {
        self.tts_limit.unwrap_or(DEFAULT_TTS_LIMIT_SECS)
    }

    pub fn max_sfx_count(&self) -> usize {
        self.max_sfx_count.unwrap_or(DEFAULT_MAX_SFX_COUNT)
    }

    pub fn sfx_total_limit_secs(&self) -> u64 {
        self.sfx_total_limit.unwrap_or(DEFAULT_SFX_TOTAL_LIMIT_SECS)
    }
}

// ── Traits ──

/// Relational store seen by the processor and handlers.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user(&self, broadcaster_id: Uuid) -> Result<User, StoreError>;

    async fn get_user_settings(&self, broadcaster_id: Uuid) -> Result<UserSettings, StoreError>;

    /// Oldest waiting message, or [`StoreError::NoRows`].
    async fn get_next_msg(&self, broadcaster_id: Uuid) -> Result<Message, StoreError>;

    async fn get_message(&self, msg_id: Uuid) -> Result<Message, StoreError>;

    async fn update_message_status(
        &self,
        msg_id: Uuid,
        status: MessageStatus,
    ) -> Result<(), StoreError>;

    /// Flip every `Current` message of the broadcaster to `Processed`.
    /// Returns how many rows changed.
    async fn update_current_messages(&self, broadcaster_id: Uuid) -> Result<u64, StoreError>;

    async fn set_show_images(&self, msg_id: Uuid, show: bool) -> Result<(), StoreError>;

    async fn update_ai_response(&self, msg_id: Uuid, response: &str) -> Result<(), StoreError>;

    async fn get_reward(&self, twitch_reward_id: &str) -> Result<Reward, StoreError>;

    async fn get_card(&self, card_id: Uuid) -> Result<Card, StoreError>;

    async fn list_characters(&self) -> Result<Vec<CharacterInfo>, StoreError>;

    /// Card whose short name matches, used as a universal voice.
    async fn get_voice_by_short_name(&self, short_name: &str) -> Result<Card, StoreError>;

    /// Every short name usable as a voice.
    async fn voice_short_names(&self) -> Result<Vec<String>, StoreError>;

    /// Count one AI redeem against a character.
    async fn increment_char_redeems(&self, card_id: Uuid) -> Result<(), StoreError>;

    /// Count one spoken TTS redeem against a character's voice.
    async fn increment_char_tts_redeems(&self, card_id: Uuid) -> Result<(), StoreError>;
}

/// Object storage for user-uploaded images.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn get_image(&self, image_id: &str) -> Result<Vec<u8>, StoreError>;
}

/// Serde adapter for binary blobs stored as base64 strings in fixtures.
mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.trim()).map_err(serde::de::Error::custom)
    }
}
