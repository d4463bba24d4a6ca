//! In-process store, seedable from a YAML fixture.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    Card, CharacterInfo, ImageStore, Message, MessageStatus, RedeemCounts, Reward, Store,
    StoreError, User, UserSettings,
};

/// A broadcaster entry in a fixture file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureUser {
    pub id: Uuid,
    pub twitch_login: String,
    #[serde(default)]
    pub settings: UserSettings,
}

/// Seed data for [`MemoryStore`] and [`MemoryImageStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub users: Vec<FixtureUser>,
    pub cards: Vec<Card>,
    pub rewards: Vec<Reward>,
    pub messages: Vec<Message>,
    /// Image ID to base64 bytes.
    pub images: HashMap<String, String>,
}

impl Fixture {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    settings: HashMap<Uuid, UserSettings>,
    cards: Vec<Card>,
    rewards: HashMap<String, Reward>,
    /// Insertion order is queue order.
    messages: Vec<Message>,
    redeems: HashMap<Uuid, RedeemCounts>,
}

/// `Store` backed by in-memory tables.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: &Fixture) -> Self {
        let store = Self::new();
        for user in &fixture.users {
            store.add_user(
                User {
                    id: user.id,
                    twitch_login: user.twitch_login.clone(),
                },
                user.settings.clone(),
            );
        }
        for card in &fixture.cards {
            store.add_card(card.clone());
        }
        for reward in &fixture.rewards {
            store.add_reward(reward.clone());
        }
        for msg in &fixture.messages {
            store.push_message(msg.clone());
        }
        store
    }

    pub fn add_user(&self, user: User, settings: UserSettings) {
        let mut tables = self.tables.write();
        tables.settings.insert(user.id, settings);
        tables.users.insert(user.id, user);
    }

    pub fn remove_user(&self, broadcaster_id: Uuid) {
        let mut tables = self.tables.write();
        tables.users.remove(&broadcaster_id);
        tables.settings.remove(&broadcaster_id);
    }

    pub fn add_card(&self, card: Card) {
        self.tables.write().cards.push(card);
    }

    pub fn add_reward(&self, reward: Reward) {
        self.tables
            .write()
            .rewards
            .insert(reward.twitch_reward_id.clone(), reward);
    }

    /// Enqueue a message at the back of its broadcaster's queue.
    pub fn push_message(&self, msg: Message) {
        self.tables.write().messages.push(msg);
    }

    pub fn message_status(&self, msg_id: Uuid) -> Option<MessageStatus> {
        self.tables
            .read()
            .messages
            .iter()
            .find(|m| m.id == msg_id)
            .map(|m| m.status)
    }

    pub fn redeem_counts(&self, card_id: Uuid) -> RedeemCounts {
        self.tables
            .read()
            .redeems
            .get(&card_id)
            .copied()
            .unwrap_or_default()
    }

    fn with_counts(
        &self,
        card_id: Uuid,
        f: impl FnOnce(&mut RedeemCounts),
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if !tables.cards.iter().any(|c| c.id == card_id) {
            return Err(StoreError::not_found("card", card_id));
        }
        f(tables.redeems.entry(card_id).or_default());
        Ok(())
    }

    fn with_message<T>(
        &self,
        msg_id: Uuid,
        f: impl FnOnce(&mut Message) -> T,
    ) -> Result<T, StoreError> {
        let mut tables = self.tables.write();
        tables
            .messages
            .iter_mut()
            .find(|m| m.id == msg_id)
            .map(f)
            .ok_or_else(|| StoreError::not_found("message", msg_id))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, broadcaster_id: Uuid) -> Result<User, StoreError> {
        self.tables
            .read()
            .users
            .get(&broadcaster_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("user", broadcaster_id))
    }

    async fn get_user_settings(&self, broadcaster_id: Uuid) -> Result<UserSettings, StoreError> {
        self.tables
            .read()
            .settings
            .get(&broadcaster_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("user settings", broadcaster_id))
    }

    async fn get_next_msg(&self, broadcaster_id: Uuid) -> Result<Message, StoreError> {
        self.tables
            .read()
            .messages
            .iter()
            .find(|m| m.broadcaster_id == broadcaster_id && m.status == MessageStatus::Wait)
            .cloned()
            .ok_or(StoreError::NoRows)
    }

    async fn get_message(&self, msg_id: Uuid) -> Result<Message, StoreError> {
        self.with_message(msg_id, |m| m.clone())
    }

    async fn update_message_status(
        &self,
        msg_id: Uuid,
        status: MessageStatus,
    ) -> Result<(), StoreError> {
        self.with_message(msg_id, |m| m.status = status)
    }

    async fn update_current_messages(&self, broadcaster_id: Uuid) -> Result<u64, StoreError> {
        let mut tables = self.tables.write();
        let mut updated = 0;
        for msg in tables
            .messages
            .iter_mut()
            .filter(|m| m.broadcaster_id == broadcaster_id && m.status == MessageStatus::Current)
        {
            msg.status = MessageStatus::Processed;
            updated += 1;
        }
        Ok(updated)
    }

    async fn set_show_images(&self, msg_id: Uuid, show: bool) -> Result<(), StoreError> {
        self.with_message(msg_id, |m| m.show_images = show)
    }

    async fn update_ai_response(&self, msg_id: Uuid, response: &str) -> Result<(), StoreError> {
        self.with_message(msg_id, |m| m.ai_response = Some(response.to_string()))
    }

    async fn get_reward(&self, twitch_reward_id: &str) -> Result<Reward, StoreError> {
        self.tables
            .read()
            .rewards
            .get(twitch_reward_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("reward", twitch_reward_id))
    }

    async fn get_card(&self, card_id: Uuid) -> Result<Card, StoreError> {
        self.tables
            .read()
            .cards
            .iter()
            .find(|c| c.id == card_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("card", card_id))
    }

    async fn list_characters(&self) -> Result<Vec<CharacterInfo>, StoreError> {
        Ok(self.tables.read().cards.iter().map(CharacterInfo::from).collect())
    }

    async fn get_voice_by_short_name(&self, short_name: &str) -> Result<Card, StoreError> {
        self.tables
            .read()
            .cards
            .iter()
            .find(|c| !c.short_name.is_empty() && c.short_name == short_name)
            .cloned()
            .ok_or_else(|| StoreError::not_found("voice", short_name))
    }

    async fn voice_short_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .tables
            .read()
            .cards
            .iter()
            .filter(|c| !c.short_name.is_empty())
            .map(|c| c.short_name.clone())
            .collect())
    }

    async fn increment_char_redeems(&self, card_id: Uuid) -> Result<(), StoreError> {
        self.with_counts(card_id, |c| c.redeems += 1)
    }

    async fn increment_char_tts_redeems(&self, card_id: Uuid) -> Result<(), StoreError> {
        self.with_counts(card_id, |c| c.tts_redeems += 1)
    }
}

/// `ImageStore` backed by a map of image ID to bytes.
#[derive(Default)]
pub struct MemoryImageStore {
    images: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: &Fixture) -> anyhow::Result<Self> {
        let store = Self::new();
        for (id, data) in &fixture.images {
            store.insert(id.clone(), STANDARD.decode(data.trim())?);
        }
        Ok(store)
    }

    pub fn insert(&self, id: impl Into<String>, data: Vec<u8>) {
        self.images.write().insert(id.into(), data);
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn get_image(&self, image_id: &str) -> Result<Vec<u8>, StoreError> {
        self.images
            .read()
            .get(image_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("image", image_id))
    }
}
