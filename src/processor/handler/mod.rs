//! Interaction handlers, one per reward type.

pub mod agentic;
pub mod ai;
pub mod tts;
pub mod universal;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::error::HandlerError;
use super::service::InteractionService;
use super::state::ProcessorState;
use crate::cancel::CancelScope;
use crate::conns::{DataEvent, EventSink};
use crate::store::{Card, RewardType, UserSettings};

pub use agentic::AgenticHandler;
pub use ai::AiHandler;
pub use tts::TtsHandler;
pub use universal::UniversalHandler;

/// Everything a handler needs to know about one queued message.
#[derive(Clone)]
pub struct InteractionInput {
    pub broadcaster_id: Uuid,
    pub msg_id: Uuid,
    pub requester: String,
    pub message: String,
    pub character: Option<Card>,
    pub settings: Arc<UserSettings>,
    pub state: Arc<ProcessorState>,
}

impl InteractionInput {
    pub fn is_skipped(&self) -> bool {
        self.state.is_skipped(self.msg_id)
    }
}

/// Handles one interaction. Returns `Ok(())` without output when the
/// message is skipped or the scope is cancelled.
#[async_trait]
pub trait InteractionHandler: Send + Sync {
    async fn handle(
        &self,
        scope: &CancelScope,
        input: &InteractionInput,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), HandlerError>;
}

/// Blank the overlay text and image.
pub(crate) async fn reset_cues(sink: &Arc<dyn EventSink>) {
    for event in DataEvent::reset_cues() {
        sink.write(Arc::new(event)).await;
    }
}

/// The four handlers, selected by reward type.
pub struct Handlers {
    tts: TtsHandler,
    ai: AiHandler,
    universal: UniversalHandler,
    agentic: AgenticHandler,
}

impl Handlers {
    pub fn new(service: Arc<InteractionService>) -> Self {
        Self {
            tts: TtsHandler::new(service.clone()),
            ai: AiHandler::new(service.clone()),
            universal: UniversalHandler::new(service.clone()),
            agentic: AgenticHandler::new(service),
        }
    }

    pub fn for_reward(&self, reward_type: RewardType) -> &dyn InteractionHandler {
        match reward_type {
            RewardType::Tts => &self.tts,
            RewardType::Ai => &self.ai,
            RewardType::UniversalTts => &self.universal,
            RewardType::Agentic => &self.agentic,
        }
    }
}
