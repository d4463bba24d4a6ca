//! The per-broadcaster processor.
//!
//! A run has two halves:
//! - the process loop, spawned as its own task, pulls queued messages and
//!   dispatches them to the handler for their reward type
//! - the control loop, on the caller's task, applies `Update`s (skip,
//!   image toggles, overlay reset, restart)
//!
//! Both share one `ProcessorState` and one cancel scope. A panic in the
//! process loop surfaces as `ProcessError::Panicked`.

pub mod error;
pub mod handler;
pub mod images;
pub mod playback;
pub mod prompts;
pub mod service;
pub mod state;

use std::any::Any;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cancel::CancelScope;
use crate::conns::{DataEvent, EventSink, EventType, ProcessError, Processor, Update, UpdateType};
use crate::store::{Card, Message, MessageStatus, RewardType, StoreError, UserSettings};

pub use error::HandlerError;
pub use handler::{Handlers, InteractionHandler, InteractionInput};
pub use service::{Collaborators, InteractionService};
pub use state::ProcessorState;

use state::CurrentGuard;

/// `Processor` that drives the four interaction handlers.
pub struct BroadcastProcessor {
    service: Arc<InteractionService>,
    handlers: Arc<Handlers>,
}

impl BroadcastProcessor {
    pub fn new(service: Arc<InteractionService>) -> Self {
        let handlers = Arc::new(Handlers::new(service.clone()));
        Self { service, handlers }
    }
}

/// Everything one run shares between its two loops.
#[derive(Clone)]
struct Run {
    service: Arc<InteractionService>,
    handlers: Arc<Handlers>,
    sink: Arc<dyn EventSink>,
    state: Arc<ProcessorState>,
    settings: Arc<UserSettings>,
    broadcaster_id: Uuid,
    scope: CancelScope,
}

#[async_trait]
impl Processor for BroadcastProcessor {
    async fn process(
        &self,
        scope: &CancelScope,
        updates: &mut mpsc::Receiver<Update>,
        sink: Arc<dyn EventSink>,
        broadcaster_id: Uuid,
    ) -> Result<(), ProcessError> {
        let store = &self.service.deps.store;
        let user = store
            .get_user(broadcaster_id)
            .await
            .map_err(|e| load_error(e, "failed to load user"))?;
        let settings = store
            .get_user_settings(broadcaster_id)
            .await
            .map_err(|e| load_error(e, "failed to load user settings"))?;

        let run = Run {
            service: self.service.clone(),
            handlers: self.handlers.clone(),
            sink,
            state: Arc::new(ProcessorState::new()),
            settings: Arc::new(settings),
            broadcaster_id,
            scope: scope.child(),
        };
        info!(broadcaster = %broadcaster_id, login = %user.twitch_login, "processor run started");

        let mut task = tokio::spawn(run.clone().process_loop());
        let result = loop {
            tokio::select! {
                joined = &mut task => {
                    break match joined {
                        Ok(result) => result,
                        Err(e) if e.is_panic() => Err(ProcessError::Panicked(panic_message(e.into_panic()))),
                        Err(_) => Ok(()),
                    };
                }
                update = updates.recv() => match update {
                    None => {
                        debug!(broadcaster = %broadcaster_id, "control channel closed");
                        break Err(ProcessError::ProcessingEnd);
                    }
                    Some(update) => {
                        if run.apply_update(update).await {
                            info!(broadcaster = %broadcaster_id, "restart requested");
                            break Ok(());
                        }
                    }
                },
                _ = scope.cancelled() => break Ok(()),
            }
        };

        run.scope.cancel();
        if !task.is_finished() {
            task.abort();
        }
        info!(broadcaster = %broadcaster_id, "processor run ended");
        result
    }
}

/// A missing user row is `NoUser`; anything else fails the run.
fn load_error(e: StoreError, what: &'static str) -> ProcessError {
    match e {
        StoreError::NotFound { .. } | StoreError::NoRows => ProcessError::NoUser,
        e => anyhow::Error::new(e).context(what).into(),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Run {
    // ── Process loop ──

    async fn process_loop(self) -> Result<(), ProcessError> {
        let store = self.service.deps.store.clone();
        let id = self.broadcaster_id;

        while !self.scope.is_cancelled() {
            let flushed = store
                .update_current_messages(id)
                .await
                .context("failed to flush current messages")?;
            if flushed > 0 {
                self.service.deps.observer.queue_changed(id);
            }

            let msg = match store.get_next_msg(id).await {
                Ok(msg) => msg,
                Err(StoreError::NoRows) => {
                    if !self.scope.sleep(self.service.config.queue_poll()).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context("failed to fetch next message")
                        .into())
                }
            };

            store
                .update_message_status(msg.id, MessageStatus::Current)
                .await
                .context("failed to mark message current")?;

            // A skip racing the fetch may have been overwritten by the mark above.
            if self.state.is_skipped(msg.id) {
                debug!(msg_id = %msg.id, "message skipped before dispatch");
                store
                    .update_message_status(msg.id, MessageStatus::Deleted)
                    .await
                    .context("failed to mark skipped message deleted")?;
                continue;
            }

            self.dispatch(msg).await?;
        }
        Ok(())
    }

    async fn resolve(&self, msg: &Message) -> Result<Option<(RewardType, Option<Card>)>, StoreError> {
        if msg.reward_id.is_empty() {
            return Ok(None);
        }
        let store = &self.service.deps.store;
        let reward = store.get_reward(&msg.reward_id).await?;
        let card = match reward.card_id {
            Some(card_id) if reward.reward_type.is_character_bound() => {
                Some(store.get_card(card_id).await?)
            }
            _ => None,
        };
        Ok(Some((reward.reward_type, card)))
    }

    async fn dispatch(&self, msg: Message) -> Result<(), ProcessError> {
        let _current = CurrentGuard::new(&self.state, msg.id);

        let (reward_type, character) = match self.resolve(&msg).await {
            Ok(Some(resolved)) => resolved,
            Ok(None) => {
                debug!(msg_id = %msg.id, "message has no reward");
                return Ok(());
            }
            Err(e) => {
                warn!(msg_id = %msg.id, reward = %msg.reward_id, error = %e, "failed to resolve reward");
                return Ok(());
            }
        };

        let input = InteractionInput {
            broadcaster_id: self.broadcaster_id,
            msg_id: msg.id,
            requester: msg.requester,
            message: msg.text,
            character,
            settings: self.settings.clone(),
            state: self.state.clone(),
        };
        info!(msg_id = %input.msg_id, ?reward_type, requester = %input.requester, "dispatching");

        let handler = self.handlers.for_reward(reward_type);
        match handler.handle(&self.scope, &input, self.sink.clone()).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_interaction_only() => {
                warn!(msg_id = %input.msg_id, error = %e, "interaction aborted");
                Ok(())
            }
            Err(e) => {
                error!(msg_id = %input.msg_id, ?reward_type, error = %e, "handler failed");
                Err(anyhow::Error::new(e)
                    .context(format!("{reward_type:?} handler failed"))
                    .into())
            }
        }
    }

    // ── Control loop ──

    /// Apply one control update. Returns true when the run should restart.
    async fn apply_update(&self, update: Update) -> bool {
        debug!(broadcaster = %self.broadcaster_id, ?update, "control update");
        match update.update_type {
            UpdateType::RestartProcessor => return true,
            UpdateType::SkipMessage => {
                if let Some(msg_id) = self.parse_msg_id(&update.data) {
                    self.skip(msg_id).await;
                }
            }
            UpdateType::SkipCurrent => {
                if let Some(msg_id) = self.authorized_current(&update.data) {
                    self.skip(msg_id).await;
                }
            }
            UpdateType::ShowImages => {
                if let Some(msg_id) = self.parse_msg_id(&update.data) {
                    self.set_show_images(msg_id, true).await;
                }
            }
            UpdateType::HideImages => {
                if let Some(msg_id) = self.parse_msg_id(&update.data) {
                    self.set_show_images(msg_id, false).await;
                }
            }
            UpdateType::ShowImagesCurrent => {
                if let Some(msg_id) = self.authorized_current(&update.data) {
                    self.set_show_images(msg_id, true).await;
                }
            }
            UpdateType::CleanOverlay => {
                for event in DataEvent::reset_cues() {
                    self.sink.write(Arc::new(event)).await;
                }
            }
        }
        false
    }

    fn parse_msg_id(&self, data: &str) -> Option<Uuid> {
        match Uuid::parse_str(data.trim()) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(broadcaster = %self.broadcaster_id, data, error = %e, "invalid message id in update");
                None
            }
        }
    }

    /// The current message, if `token` matches the broadcaster's control token.
    fn authorized_current(&self, token: &str) -> Option<Uuid> {
        if !self.token_matches(token) {
            warn!(broadcaster = %self.broadcaster_id, "control token mismatch");
            return None;
        }
        let current = self.state.current();
        if current.is_none() {
            debug!(broadcaster = %self.broadcaster_id, "no current message");
        }
        current
    }

    fn token_matches(&self, token: &str) -> bool {
        let expected = self.settings.control_token.as_str();
        if expected.is_empty() {
            let allowed = self.service.config.allow_empty_control_token;
            if allowed {
                warn!(broadcaster = %self.broadcaster_id, "control token not set, accepting any token");
            } else {
                warn!(broadcaster = %self.broadcaster_id, "control token not set, rejecting");
            }
            return allowed;
        }
        token == expected
    }

    async fn skip(&self, msg_id: Uuid) {
        self.state.add_skipped(msg_id);
        self.sink.write(Arc::new(DataEvent::skip(msg_id))).await;
        if let Err(e) = self
            .service
            .deps
            .store
            .update_message_status(msg_id, MessageStatus::Deleted)
            .await
        {
            warn!(msg_id = %msg_id, error = %e, "failed to mark skipped message deleted");
        }
        info!(msg_id = %msg_id, "message skipped");
    }

    async fn set_show_images(&self, msg_id: Uuid, show: bool) {
        if let Err(e) = self.service.deps.store.set_show_images(msg_id, show).await {
            warn!(msg_id = %msg_id, error = %e, "failed to update show_images");
        }
        let event_type = if show {
            EventType::ShowImages
        } else {
            EventType::HideImages
        };
        self.sink
            .write(Arc::new(DataEvent::new(event_type, msg_id.to_string())))
            .await;
    }
}
