//! Agentic dialogue: characters mentioned in the prompt talk to each other.
//!
//! Each turn is synthesized before it plays. While one turn plays, the next
//! speaker is chosen and their line generated, so turns follow each other
//! without a gap.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{InteractionHandler, InteractionInput};
use crate::agentic::{Detector, NextSpeaker, Planner};
use crate::cancel::CancelScope;
use crate::conns::{DataEvent, EventSink};
use crate::processor::error::HandlerError;
use crate::processor::prompts::dialogue_prompt;
use crate::processor::service::InteractionService;
use crate::store::{Card, UserSettings};
use crate::tts::Speech;

/// One synthesized line of dialogue.
struct AgenticTurn {
    card: Card,
    text: String,
    speech: Speech,
}

/// Characters taking part in one dialogue.
struct Cast {
    names: Vec<String>,
    by_name: HashMap<String, Uuid>,
    cards: HashMap<Uuid, Card>,
}

impl Cast {
    fn card(&self, name: &str) -> Option<&Card> {
        self.by_name
            .get(&name.trim().to_lowercase())
            .and_then(|id| self.cards.get(id))
    }
}

pub struct AgenticHandler {
    service: Arc<InteractionService>,
    detector: Detector,
    planner: Planner,
}

impl AgenticHandler {
    pub fn new(service: Arc<InteractionService>) -> Self {
        let llm = service.deps.llm.clone();
        Self {
            service,
            detector: Detector::new(llm.clone()),
            planner: Planner::new(llm),
        }
    }

    async fn build_turn(
        &self,
        card: Card,
        settings: &UserSettings,
        text: &str,
    ) -> Result<AgenticTurn, HandlerError> {
        let text = self.service.filter_text(settings, text);
        let speech = self.service.tts(&text, &card.voice_reference).await?;
        Ok(AgenticTurn { card, text, speech })
    }

    /// Pick the next speaker and generate their line. `None` ends the dialogue.
    async fn prepare_next(
        &self,
        scenario: &str,
        history: &mut Vec<String>,
        cast: &Cast,
        settings: &UserSettings,
    ) -> Result<Option<AgenticTurn>, HandlerError> {
        let window = self.service.config.transcript_window;
        let transcript = &history[history.len().saturating_sub(window)..];

        let name = match self
            .planner
            .select_next_speaker(scenario, transcript, &cast.names)
            .await?
        {
            NextSpeaker::End => return Ok(None),
            NextSpeaker::Character(name) => name,
        };
        let card = cast
            .card(&name)
            .ok_or_else(|| HandlerError::UnknownSpeaker(name.clone()))?
            .clone();

        let prompt = dialogue_prompt(&card, scenario, history);
        let line = self.service.deps.llm.ask(&prompt).await?;
        history.push(format!("{}: {}", card.name, line));

        self.build_turn(card, settings, &line).await.map(Some)
    }
}

#[async_trait]
impl InteractionHandler for AgenticHandler {
    async fn handle(
        &self,
        scope: &CancelScope,
        input: &InteractionInput,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), HandlerError> {
        let deps = &self.service.deps;

        let catalog = deps.store.list_characters().await?;
        let detected = self
            .detector
            .detect_characters(&input.message, &catalog)
            .await?;
        if detected.is_empty() {
            info!(msg_id = %input.msg_id, "no characters detected in prompt");
            return Ok(());
        }

        let mut cast = Cast {
            names: Vec::with_capacity(detected.len()),
            by_name: HashMap::new(),
            cards: HashMap::new(),
        };
        let mut cards = Vec::with_capacity(detected.len());
        for info in &detected {
            cast.by_name.insert(info.name.to_lowercase(), info.id);
            cast.names.push(info.name.clone());
            match deps.store.get_card(info.id).await {
                Ok(card) => {
                    cards.push(card.clone());
                    cast.cards.insert(info.id, card);
                }
                Err(e) => error!(character = %info.name, error = %e, "failed to prefetch character card"),
            }
        }
        debug!(handler = "agentic", msg_id = %input.msg_id, cast = ?cast.names, "cast detected");

        let plan = self.planner.plan_initial_turn(&input.message, &cards).await?;
        let first = cast
            .card(&plan.first_speaker_name)
            .ok_or_else(|| HandlerError::UnknownSpeaker(plan.first_speaker_name.clone()))?
            .clone();

        let mut history = vec![format!("{}: {}", first.name, plan.first_message_text)];
        let mut current = Some(
            self.build_turn(first, &input.settings, &plan.first_message_text)
                .await?,
        );

        let max_turns = self.service.config.max_agentic_turns;
        let mut turn = 0;
        while let Some(this) = current.take() {
            if turn >= max_turns || input.is_skipped() {
                break;
            }

            sink.write(Arc::new(DataEvent::character_image(this.card.id))).await;
            let playback = match self
                .service
                .play_tts(scope, input, &sink, &this.text, this.speech)
                .await
            {
                Ok(playback) => playback,
                Err(e) => {
                    error!(msg_id = %input.msg_id, error = %e, "failed to play agentic turn");
                    break;
                }
            };

            if turn + 1 < max_turns {
                let next = tokio::select! {
                    _ = scope.cancelled() => return Ok(()),
                    next = self.prepare_next(&input.message, &mut history, &cast, &input.settings) => next,
                };
                match next {
                    Ok(next) => current = next,
                    Err(e) => error!(msg_id = %input.msg_id, error = %e, "failed to prepare next agentic turn"),
                }
            }

            if !playback.wait(scope).await {
                return Ok(());
            }
            turn += 1;
        }

        Ok(())
    }
}
