//! Connections: per-broadcaster processor supervision and event fan-out.
//!
//! Architecture:
//! - `ConnectionManager` owns one supervisor task per broadcaster
//! - The supervisor calls `Processor::process` in a restart loop
//! - Events written by a processor are fanned out to every subscriber
//! - Control `Update`s flow the other way through a bounded channel

pub mod event;
pub mod manager;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::cancel::CancelScope;

pub use event::{AudioPayload, DataEvent, EventType, PromptImages, Update, UpdateType, WordTiming};
pub use manager::ConnectionManager;

/// How a processor run ended, as seen by the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Terminal: stop supervising this broadcaster.
    #[error("end of processing")]
    ProcessingEnd,

    /// The broadcaster is gone; retry shortly.
    #[error("no user")]
    NoUser,

    #[error("processor panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Best-effort event output bound to one broadcaster.
///
/// `false` means nobody received the event. Callers never retry on it.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn write(&self, event: Arc<DataEvent>) -> bool;
}

/// One broadcaster's message loop. A run lasts until it fails, the scope is
/// cancelled or a restart is requested through `updates`.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(
        &self,
        scope: &CancelScope,
        updates: &mut mpsc::Receiver<Update>,
        sink: Arc<dyn EventSink>,
        broadcaster_id: Uuid,
    ) -> Result<(), ProcessError>;
}

/// Told when a broadcaster's queue changed in a way a control panel shows.
pub trait QueueObserver: Send + Sync {
    fn queue_changed(&self, broadcaster_id: Uuid);
}

/// Observer that does nothing.
pub struct NoopObserver;

impl QueueObserver for NoopObserver {
    fn queue_changed(&self, _broadcaster_id: Uuid) {}
}

/// Fans queue-change notifications out to control panels.
#[derive(Clone)]
pub struct ControlPanelHub {
    tx: broadcast::Sender<Uuid>,
}

impl ControlPanelHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive the id of every broadcaster whose queue changes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Uuid> {
        self.tx.subscribe()
    }
}

impl Default for ControlPanelHub {
    fn default() -> Self {
        Self::new(64)
    }
}

impl QueueObserver for ControlPanelHub {
    fn queue_changed(&self, broadcaster_id: Uuid) {
        // No receivers is fine.
        let _ = self.tx.send(broadcaster_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hub_delivers_to_subscribers() {
        let hub = ControlPanelHub::default();
        hub.queue_changed(Uuid::new_v4());

        let mut rx = hub.subscribe();
        let id = Uuid::new_v4();
        hub.queue_changed(id);
        assert_eq!(rx.recv().await.unwrap(), id);
    }

    #[test]
    fn process_error_display() {
        assert_eq!(ProcessError::ProcessingEnd.to_string(), "end of processing");
        let err: ProcessError = anyhow::anyhow!("db down").into();
        assert_eq!(err.to_string(), "db down");
    }
}
