//! In-memory collaborators for integration tests.
//!
//! Audio is fake: one byte is one millisecond. `FakeTts` renders two bytes
//! per character of text, so durations are predictable without ffmpeg.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use avatarcast::audio::{AudioError, AudioProcessor, SfxLibrary};
use avatarcast::config::{ManagerConfig, ProcessorConfig};
use avatarcast::conns::{DataEvent, EventSink, EventType, NoopObserver, QueueObserver};
use avatarcast::llm::{Attachment, ChatMessage, LlmClient, LlmError};
use avatarcast::processor::{BroadcastProcessor, Collaborators, InteractionService};
use avatarcast::store::{
    Card, ImageStore, MemoryImageStore, MemoryStore, Message, MessageStatus, Reward, RewardType,
    User, UserSettings,
};
use avatarcast::tts::{Speech, Timing, TtsEngine, TtsError};

pub const BYTES_PER_CHAR: usize = 2;

pub fn fast_processor_config() -> ProcessorConfig {
    ProcessorConfig {
        queue_poll_ms: 10,
        playback_tick_ms: 5,
        response_gap_ms: 5,
        concat_padding_ms: 10,
        ..ProcessorConfig::default()
    }
}

pub fn fast_manager_config() -> ManagerConfig {
    ManagerConfig {
        write_attempts: 3,
        write_backoff_ms: 1,
        subscriber_buffer: 256,
        control_buffer: 16,
        no_user_retry_ms: 20,
        error_retry_ms: 50,
        pace_ms: 10,
    }
}

// ── TTS ──

#[derive(Default)]
pub struct FakeTts {
    pub calls: Mutex<Vec<(String, Vec<u8>)>>,
    pub fail: Mutex<bool>,
}

#[async_trait]
impl TtsEngine for FakeTts {
    async fn tts(&self, text: &str, voice_reference: &[u8]) -> Result<Speech, TtsError> {
        self.calls
            .lock()
            .push((text.to_string(), voice_reference.to_vec()));
        if *self.fail.lock() {
            return Err(TtsError::Api {
                status: 500,
                message: "tts down".into(),
            });
        }
        let len = text.chars().count() * BYTES_PER_CHAR;
        Ok(Speech {
            audio: vec![1u8; len],
            timings: vec![Timing {
                text: text.to_string(),
                start: Duration::ZERO,
                end: Duration::from_millis(len as u64),
            }],
        })
    }
}

// ── Audio ──

/// Filter `11` (slower) doubles the clip; every other filter is identity.
#[derive(Default)]
pub struct FakeAudio {
    pub applied: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl AudioProcessor for FakeAudio {
    async fn probe_duration(&self, audio: &[u8]) -> Result<Duration, AudioError> {
        Ok(Duration::from_millis(audio.len() as u64))
    }

    async fn to_mp3(&self, audio: &[u8]) -> Result<Vec<u8>, AudioError> {
        Ok(audio.to_vec())
    }

    async fn cut(&self, audio: &[u8], duration: Duration) -> Result<Vec<u8>, AudioError> {
        let keep = (duration.as_millis() as usize).min(audio.len());
        Ok(audio[..keep].to_vec())
    }

    async fn apply_filters(&self, audio: &[u8], filters: &[String]) -> Result<Vec<u8>, AudioError> {
        self.applied.lock().push(filters.to_vec());
        let mut out = audio.to_vec();
        for filter in filters {
            if filter == "11" {
                out.extend_from_slice(audio);
            }
        }
        Ok(out)
    }

    async fn concatenate(
        &self,
        padding: Duration,
        clips: Vec<Vec<u8>>,
    ) -> Result<Vec<u8>, AudioError> {
        if clips.is_empty() {
            return Err(AudioError::NoInput);
        }
        let pad = vec![0u8; padding.as_millis() as usize];
        let mut out = Vec::new();
        for (i, clip) in clips.iter().enumerate() {
            if i > 0 {
                out.extend_from_slice(&pad);
            }
            out.extend_from_slice(clip);
        }
        Ok(out)
    }
}

// ── Sound effects ──

/// Named effects with a fixed length in milliseconds.
#[derive(Default)]
pub struct FakeSfx {
    pub effects: Vec<(String, usize)>,
    /// Known to the parser but fail to load.
    pub broken: HashSet<String>,
}

impl FakeSfx {
    pub fn with(effects: &[(&str, usize)]) -> Self {
        Self {
            effects: effects.iter().map(|(n, l)| (n.to_string(), *l)).collect(),
            broken: HashSet::new(),
        }
    }
}

#[async_trait]
impl SfxLibrary for FakeSfx {
    fn contains(&self, name: &str) -> bool {
        self.effects.iter().any(|(n, _)| n == name) || self.broken.contains(name)
    }

    async fn load(&self, name: &str) -> Result<Vec<u8>, AudioError> {
        if self.broken.contains(name) {
            return Err(AudioError::SfxNotFound(name.to_string()));
        }
        self.effects
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, len)| vec![2u8; *len])
            .ok_or_else(|| AudioError::SfxNotFound(name.to_string()))
    }
}

// ── LLM ──

/// Replays queued answers. `ask` falls back to `default_reply` when its queue
/// is empty; an empty guided queue is an API error.
#[derive(Default)]
pub struct ScriptedLlm {
    pub replies: Mutex<VecDeque<String>>,
    pub guided: Mutex<VecDeque<String>>,
    pub default_reply: String,
    pub prompts: Mutex<Vec<String>>,
    pub guided_calls: Mutex<Vec<(Vec<ChatMessage>, serde_json::Value, f64)>>,
}

impl ScriptedLlm {
    pub fn new(default_reply: &str) -> Self {
        Self {
            default_reply: default_reply.to_string(),
            ..Self::default()
        }
    }

    pub fn push_reply(&self, reply: &str) {
        self.replies.lock().push_back(reply.to_string());
    }

    pub fn push_guided(&self, json: serde_json::Value) {
        self.guided.lock().push_back(json.to_string());
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn ask(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().push(prompt.to_string());
        Ok(self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone()))
    }

    async fn ask_messages(
        &self,
        _messages: Vec<ChatMessage>,
        _attachments: Vec<Attachment>,
    ) -> Result<String, LlmError> {
        Ok(self.default_reply.clone())
    }

    async fn ask_guided(
        &self,
        messages: Vec<ChatMessage>,
        schema: serde_json::Value,
        temperature: f64,
    ) -> Result<String, LlmError> {
        self.guided_calls.lock().push((messages, schema, temperature));
        self.guided.lock().pop_front().ok_or_else(|| LlmError::Api {
            status: 500,
            message: "no scripted guided reply".into(),
        })
    }
}

// ── Sink ──

/// Records every event written to it.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<Arc<DataEvent>>>,
}

impl RecordingSink {
    pub fn kinds(&self) -> Vec<EventType> {
        self.events.lock().iter().map(|e| e.event_type).collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == EventType::Text)
            .map(|e| e.data_str())
            .collect()
    }

    pub fn count(&self, kind: EventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == kind)
            .count()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn write(&self, event: Arc<DataEvent>) -> bool {
        self.events.lock().push(event);
        true
    }
}

// ── Fixtures ──

pub fn card(name: &str, short_name: &str) -> Card {
    Card {
        id: Uuid::new_v4(),
        name: name.to_string(),
        short_name: short_name.to_string(),
        description: format!("{name} from the test fixtures"),
        personality: "calm".into(),
        message_examples: vec![],
        system_prompt: String::new(),
        voice_reference: short_name.as_bytes().to_vec(),
    }
}

pub fn message(broadcaster_id: Uuid, reward_id: &str, text: &str) -> Message {
    Message {
        id: Uuid::new_v4(),
        broadcaster_id,
        requester: "viewer".into(),
        text: text.into(),
        reward_id: reward_id.into(),
        status: MessageStatus::Wait,
        image_ids: vec![],
        show_images: false,
        ai_response: None,
    }
}

/// A broadcaster plus the wiring every test needs.
pub struct Harness {
    pub broadcaster_id: Uuid,
    pub store: Arc<MemoryStore>,
    pub images: Arc<MemoryImageStore>,
    pub llm: Arc<ScriptedLlm>,
    pub vision_llm: Option<Arc<ScriptedLlm>>,
    pub tts: Arc<FakeTts>,
    pub audio: Arc<FakeAudio>,
    pub sfx: Arc<FakeSfx>,
    pub observer: Arc<dyn QueueObserver>,
    pub config: ProcessorConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(UserSettings::default())
    }

    pub fn with_settings(settings: UserSettings) -> Self {
        let broadcaster_id = Uuid::new_v4();
        let store = Arc::new(MemoryStore::new());
        store.add_user(
            User {
                id: broadcaster_id,
                twitch_login: "streamer".into(),
            },
            settings,
        );
        Self {
            broadcaster_id,
            store,
            images: Arc::new(MemoryImageStore::new()),
            llm: Arc::new(ScriptedLlm::new("a reply")),
            vision_llm: None,
            tts: Arc::new(FakeTts::default()),
            audio: Arc::new(FakeAudio::default()),
            sfx: Arc::new(FakeSfx::with(&[("boom", 40)])),
            observer: Arc::new(NoopObserver),
            config: fast_processor_config(),
        }
    }

    /// Register a reward, optionally bound to `card`.
    pub fn reward(&self, id: &str, reward_type: RewardType, card: Option<&Card>) {
        if let Some(card) = card {
            self.store.add_card(card.clone());
        }
        self.store.add_reward(Reward {
            twitch_reward_id: id.into(),
            broadcaster_id: self.broadcaster_id,
            reward_type,
            card_id: card.map(|c| c.id),
        });
    }

    pub fn enqueue(&self, reward_id: &str, text: &str) -> Uuid {
        let msg = message(self.broadcaster_id, reward_id, text);
        let id = msg.id;
        self.store.push_message(msg);
        id
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            images: Some(self.images.clone() as Arc<dyn ImageStore>),
            llm: self.llm.clone(),
            vision_llm: self
                .vision_llm
                .clone()
                .map(|llm| llm as Arc<dyn LlmClient>),
            tts: self.tts.clone(),
            audio: self.audio.clone(),
            sfx: self.sfx.clone(),
            observer: self.observer.clone(),
        }
    }

    pub fn service(&self) -> Arc<InteractionService> {
        Arc::new(InteractionService::new(
            self.collaborators(),
            self.config.clone(),
        ))
    }

    pub fn processor(&self) -> Arc<BroadcastProcessor> {
        Arc::new(BroadcastProcessor::new(self.service()))
    }
}

/// Poll `cond` every 5 ms until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
