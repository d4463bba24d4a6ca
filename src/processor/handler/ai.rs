//! AI persona reply: read the request aloud, then answer it in character.
//!
//! Image analysis runs concurrently with the request utterance. The reply
//! is generated once both are done and played after the request finished.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{reset_cues, InteractionHandler, InteractionInput};
use crate::cancel::CancelScope;
use crate::conns::{DataEvent, EventSink, EventType, PromptImages};
use crate::processor::error::HandlerError;
use crate::processor::images::{describe_images, replace_image_tags_for_tts};
use crate::processor::prompts::craft_prompt;
use crate::processor::service::InteractionService;

/// Reply used when the model returns nothing.
pub const EMPTY_RESPONSE: &str = "empty response";

pub struct AiHandler {
    service: Arc<InteractionService>,
}

impl AiHandler {
    pub fn new(service: Arc<InteractionService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl InteractionHandler for AiHandler {
    async fn handle(
        &self,
        scope: &CancelScope,
        input: &InteractionInput,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), HandlerError> {
        let card = input
            .character
            .as_ref()
            .ok_or(HandlerError::MissingCharacter)?;
        let deps = &self.service.deps;
        debug!(handler = "ai", msg_id = %input.msg_id, character = %card.name, "handling");

        if let Err(e) = deps.store.increment_char_redeems(card.id).await {
            warn!(character = %card.name, error = %e, "failed to count AI redeem");
        }

        let (image_ids, show_images) = match deps.store.get_message(input.msg_id).await {
            Ok(msg) => (msg.image_ids, msg.show_images),
            Err(e) => {
                warn!(msg_id = %input.msg_id, error = %e, "failed to load message, continuing without images");
                (Vec::new(), false)
            }
        };

        // Aborted when dropped, so early returns cancel the analysis.
        let mut analysis = JoinSet::new();
        if let (Some(vision), Some(images)) = (&deps.vision_llm, &deps.images) {
            if !image_ids.is_empty() {
                let (vision, images) = (vision.clone(), images.clone());
                let ids = image_ids.clone();
                let message = input.message.clone();
                analysis.spawn(async move { describe_images(vision, images, &ids, &message).await });
            }
        }

        sink.write(Arc::new(DataEvent::character_image(card.id))).await;
        let prompt_images = PromptImages {
            image_ids,
            show_images: Some(show_images),
        };
        sink.write(Arc::new(DataEvent::new(
            EventType::PromptImage,
            serde_json::to_vec(&prompt_images)?,
        )))
        .await;

        let request = format!(
            "{} asked me: {}",
            input.requester,
            replace_image_tags_for_tts(&input.message)
        );
        let request = self.service.filter_text(&input.settings, &request);
        let request_speech = self.service.tts(&request, &card.voice_reference).await?;

        if input.is_skipped() {
            return Ok(());
        }
        let request_playback = self
            .service
            .play_tts(scope, input, &sink, &request, request_speech)
            .await?;

        let joined = tokio::select! {
            _ = scope.cancelled() => return Ok(()),
            joined = analysis.join_next() => joined,
        };
        let message = match joined {
            Some(Ok(described)) => described,
            Some(Err(e)) => {
                warn!(error = %e, "image analysis task failed");
                input.message.clone()
            }
            None => input.message.clone(),
        };

        if input.is_skipped() {
            return Ok(());
        }

        let prompt = craft_prompt(card, &input.requester, &message);
        let reply = tokio::select! {
            _ = scope.cancelled() => return Ok(()),
            reply = deps.llm.ask(&prompt) => reply?,
        };
        let reply = if reply.trim().is_empty() {
            EMPTY_RESPONSE.to_string()
        } else {
            reply
        };

        if let Err(e) = deps.store.update_ai_response(input.msg_id, &reply).await {
            warn!(msg_id = %input.msg_id, error = %e, "failed to store AI response");
        }
        deps.observer.queue_changed(input.broadcaster_id);

        let reply = self.service.filter_text(&input.settings, &reply);
        let reply_speech = self.service.tts(&reply, &card.voice_reference).await?;

        if !request_playback.wait(scope).await {
            return Ok(());
        }
        if !scope.sleep(self.service.config.response_gap()).await {
            return Ok(());
        }
        if input.is_skipped() {
            return Ok(());
        }

        let reply_playback = self
            .service
            .play_tts(scope, input, &sink, &reply, reply_speech)
            .await?;
        if !reply_playback.wait(scope).await {
            return Ok(());
        }

        reset_cues(&sink).await;
        Ok(())
    }
}
