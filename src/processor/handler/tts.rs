//! Plain TTS: read the message in the character's voice.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{reset_cues, InteractionHandler, InteractionInput};
use crate::cancel::CancelScope;
use crate::conns::{DataEvent, EventSink};
use crate::processor::error::HandlerError;
use crate::processor::images::replace_image_tags_for_tts;
use crate::processor::service::InteractionService;

pub struct TtsHandler {
    service: Arc<InteractionService>,
}

impl TtsHandler {
    pub fn new(service: Arc<InteractionService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl InteractionHandler for TtsHandler {
    async fn handle(
        &self,
        scope: &CancelScope,
        input: &InteractionInput,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), HandlerError> {
        debug!(handler = "tts", msg_id = %input.msg_id, requester = %input.requester, "handling");

        if let Some(card) = &input.character {
            if let Err(e) = self.service.deps.store.increment_char_tts_redeems(card.id).await {
                warn!(character = %card.name, error = %e, "failed to count TTS redeem");
            }
            sink.write(Arc::new(DataEvent::character_image(card.id))).await;
        }

        let text = replace_image_tags_for_tts(&input.message);
        let text = self.service.filter_text(&input.settings, &text);
        let voice_ref = input
            .character
            .as_ref()
            .map(|c| c.voice_reference.as_slice())
            .unwrap_or_default();
        let speech = self.service.tts(&text, voice_ref).await?;

        if input.is_skipped() {
            return Ok(());
        }

        let playback = self
            .service
            .play_tts(scope, input, &sink, &text, speech)
            .await?;
        if !playback.wait(scope).await {
            return Ok(());
        }

        reset_cues(&sink).await;
        Ok(())
    }
}
