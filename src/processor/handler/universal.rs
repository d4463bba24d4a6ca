//! Universal TTS: multi-voice markup with filters and sound effects,
//! rendered into one clip.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{reset_cues, InteractionHandler, InteractionInput};
use crate::cancel::CancelScope;
use crate::conns::EventSink;
use crate::dsl::Action;
use crate::processor::error::HandlerError;
use crate::processor::images::replace_image_tags_for_tts;
use crate::processor::service::InteractionService;

pub struct UniversalHandler {
    service: Arc<InteractionService>,
}

impl UniversalHandler {
    pub fn new(service: Arc<InteractionService>) -> Self {
        Self { service }
    }

    /// Count one TTS redeem for every distinct voice that speaks.
    async fn count_voices(&self, actions: &[Action]) {
        let store = &self.service.deps.store;
        let mut voices = HashSet::new();
        for action in actions.iter().filter(|a| !a.text.trim().is_empty()) {
            let voice = if action.voice.is_empty() {
                self.service.config.default_voice.as_str()
            } else {
                action.voice.as_str()
            };
            match store.get_voice_by_short_name(voice).await {
                Ok(card) => {
                    voices.insert(card.id);
                }
                Err(e) => debug!(voice, error = %e, "voice not found, not counted"),
            }
        }
        for card_id in voices {
            if let Err(e) = store.increment_char_tts_redeems(card_id).await {
                warn!(card = %card_id, error = %e, "failed to count universal TTS redeem");
            }
        }
    }
}

#[async_trait]
impl InteractionHandler for UniversalHandler {
    async fn handle(
        &self,
        scope: &CancelScope,
        input: &InteractionInput,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), HandlerError> {
        let text = replace_image_tags_for_tts(&input.message);
        let text = self.service.filter_text(&input.settings, &text);
        let actions = self.service.parse_universal(&text, &input.settings).await?;
        debug!(handler = "universal", msg_id = %input.msg_id, actions = actions.len(), "parsed");
        self.count_voices(&actions).await;

        if input.is_skipped() {
            return Ok(());
        }

        let clip = self
            .service
            .craft_universal(&actions, &input.settings)
            .await?;
        if input.is_skipped() {
            return Ok(());
        }

        let playback = self
            .service
            .play_tts(scope, input, &sink, &clip.text, clip.speech)
            .await?;
        if !playback.wait(scope).await {
            return Ok(());
        }

        reset_cues(&sink).await;
        Ok(())
    }
}
