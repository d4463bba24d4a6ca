//! `ConnectionManager`: broadcaster registry, supervisors and fan-out.
//!
//! One `RwLock` guards the whole registry. Delivery snapshots the subscriber
//! senders under a read lock and sends without holding it, so a slow
//! subscriber never blocks subscribe/unsubscribe for anyone else.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{DataEvent, EventSink, ProcessError, Processor, Update, UpdateType};
use crate::cancel::CancelScope;
use crate::config::ManagerConfig;

#[derive(Default)]
struct Broadcaster {
    subscribers: HashMap<u64, mpsc::Sender<Arc<DataEvent>>>,
    control: Option<Control>,
}

struct Control {
    tx: mpsc::Sender<Update>,
    scope: CancelScope,
    /// Distinguishes this supervisor from a later one for the same broadcaster.
    generation: u64,
}

impl Broadcaster {
    fn is_empty(&self) -> bool {
        self.subscribers.is_empty() && self.control.is_none()
    }
}

pub struct ConnectionManager {
    config: ManagerConfig,
    processor: Arc<dyn Processor>,
    scope: CancelScope,
    broadcasters: RwLock<HashMap<Uuid, Broadcaster>>,
    supervisors: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new(config: ManagerConfig, processor: Arc<dyn Processor>) -> Arc<Self> {
        Arc::new(Self {
            config,
            processor,
            scope: CancelScope::new(),
            broadcasters: RwLock::new(HashMap::new()),
            supervisors: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    // ── Fan-out ──

    /// Register an output queue for `broadcaster_id`.
    ///
    /// The returned closure removes it; the receiver then yields `None` once
    /// drained.
    pub fn subscribe(
        self: &Arc<Self>,
        broadcaster_id: Uuid,
    ) -> (mpsc::Receiver<Arc<DataEvent>>, impl FnOnce() + Send + 'static) {
        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer.max(1));
        let sub_id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.broadcasters
            .write()
            .entry(broadcaster_id)
            .or_default()
            .subscribers
            .insert(sub_id, tx);
        debug!(broadcaster = %broadcaster_id, sub_id, "subscribed");

        let manager: Weak<Self> = Arc::downgrade(self);
        let unsubscribe = move || {
            if let Some(manager) = manager.upgrade() {
                manager.remove_subscriber(broadcaster_id, sub_id);
            }
        };
        (rx, unsubscribe)
    }

    fn remove_subscriber(&self, broadcaster_id: Uuid, sub_id: u64) {
        let mut map = self.broadcasters.write();
        if let Some(entry) = map.get_mut(&broadcaster_id) {
            entry.subscribers.remove(&sub_id);
            if entry.is_empty() {
                map.remove(&broadcaster_id);
            }
        }
        debug!(broadcaster = %broadcaster_id, sub_id, "unsubscribed");
    }

    /// Push `event` to every subscriber of `broadcaster_id`.
    ///
    /// Each subscriber gets `write_attempts` non-blocking tries spaced by
    /// `write_backoff`; after that the event is dropped for it. Returns true
    /// if at least one subscriber took the event.
    pub async fn try_write(&self, broadcaster_id: Uuid, event: Arc<DataEvent>) -> bool {
        let subscribers: Vec<_> = match self.broadcasters.read().get(&broadcaster_id) {
            Some(b) => b.subscribers.values().cloned().collect(),
            None => return false,
        };

        let attempts = self.config.write_attempts.max(1);
        let mut delivered = false;
        for tx in subscribers {
            if tx.is_closed() {
                continue;
            }
            for attempt in 1..=attempts {
                match tx.try_send(event.clone()) {
                    Ok(()) => {
                        delivered = true;
                        break;
                    }
                    Err(TrySendError::Closed(_)) => break,
                    Err(TrySendError::Full(_)) if attempt < attempts => {
                        tokio::time::sleep(self.config.write_backoff()).await;
                    }
                    Err(TrySendError::Full(_)) => {
                        debug!(broadcaster = %broadcaster_id, event = %event.event_type, "subscriber full, event dropped");
                    }
                }
            }
        }
        delivered
    }

    // ── Supervision ──

    /// Start supervising `broadcaster_id`'s processor. No-op if one is
    /// already running.
    pub fn handle_user(self: &Arc<Self>, broadcaster_id: Uuid) {
        let (tx, rx) = mpsc::channel(self.config.control_buffer.max(1));
        let scope = self.scope.child();
        let generation = self.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut map = self.broadcasters.write();
            let entry = map.entry(broadcaster_id).or_default();
            if entry.control.is_some() {
                warn!(broadcaster = %broadcaster_id, "processor already running");
                return;
            }
            entry.control = Some(Control {
                tx,
                scope: scope.clone(),
                generation,
            });
        }

        info!(broadcaster = %broadcaster_id, "starting processor");
        let handle = tokio::spawn(self.clone().supervise(broadcaster_id, scope, rx, generation));

        let mut supervisors = self.supervisors.lock();
        supervisors.retain(|h| !h.is_finished());
        supervisors.push(handle);
    }

    pub fn is_running(&self, broadcaster_id: Uuid) -> bool {
        self.broadcasters
            .read()
            .get(&broadcaster_id)
            .is_some_and(|b| b.control.is_some())
    }

    async fn supervise(
        self: Arc<Self>,
        broadcaster_id: Uuid,
        scope: CancelScope,
        mut updates: mpsc::Receiver<Update>,
        generation: u64,
    ) {
        let sink: Arc<dyn EventSink> = Arc::new(BroadcasterSink {
            manager: self.clone(),
            broadcaster_id,
        });

        while !scope.is_cancelled() {
            let run = scope.child();
            let result = self
                .processor
                .process(&run, &mut updates, sink.clone(), broadcaster_id)
                .await;
            run.cancel();

            let retry = match result {
                Ok(()) => Duration::ZERO,
                Err(ProcessError::ProcessingEnd) => {
                    debug!(broadcaster = %broadcaster_id, "processing ended");
                    break;
                }
                Err(ProcessError::NoUser) => {
                    debug!(broadcaster = %broadcaster_id, "no user, retrying");
                    self.config.no_user_retry()
                }
                Err(e) => {
                    error!(broadcaster = %broadcaster_id, error = %e, "processor run failed");
                    self.config.error_retry()
                }
            };

            if !scope.sleep(retry + self.config.pace()).await {
                break;
            }
        }

        scope.cancel();
        let mut map = self.broadcasters.write();
        if let Some(entry) = map.get_mut(&broadcaster_id) {
            if entry.control.as_ref().is_some_and(|c| c.generation == generation) {
                entry.control = None;
            }
            if entry.is_empty() {
                map.remove(&broadcaster_id);
            }
        }
        info!(broadcaster = %broadcaster_id, "stopped processor");
    }

    /// Stop supervising `broadcaster_id`. `handle_user` may start it again.
    pub fn disable_user(&self, broadcaster_id: Uuid) {
        let mut map = self.broadcasters.write();
        if let Some(entry) = map.get_mut(&broadcaster_id) {
            if let Some(control) = entry.control.take() {
                control.scope.cancel();
                info!(broadcaster = %broadcaster_id, "disabled processor");
            }
            if entry.is_empty() {
                map.remove(&broadcaster_id);
            }
        }
    }

    /// Cancel every supervisor. Follow with [`wait`](Self::wait).
    pub fn shutdown(&self) {
        self.scope.cancel();
    }

    /// Resolve once every supervisor started so far has exited.
    pub async fn wait(&self) {
        loop {
            let handles = std::mem::take(&mut *self.supervisors.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "supervisor task failed");
                }
            }
        }
    }

    // ── Control publishers ──

    /// Non-blocking send on the broadcaster's control channel. Dropped when
    /// no processor runs or the channel is full.
    fn publish(&self, broadcaster_id: Uuid, update: Update) -> bool {
        let map = self.broadcasters.read();
        let Some(control) = map.get(&broadcaster_id).and_then(|b| b.control.as_ref()) else {
            debug!(broadcaster = %broadcaster_id, ?update, "no processor, update dropped");
            return false;
        };
        match control.tx.try_send(update) {
            Ok(()) => true,
            Err(e) => {
                warn!(broadcaster = %broadcaster_id, error = %e, "control update dropped");
                false
            }
        }
    }

    /// Restart the processor so it picks up new settings.
    pub fn notify_update_settings(&self, broadcaster_id: Uuid) -> bool {
        self.publish(broadcaster_id, Update::restart())
    }

    pub fn skip_message(&self, broadcaster_id: Uuid, msg_id: Uuid) -> bool {
        self.publish(
            broadcaster_id,
            Update::new(UpdateType::SkipMessage, msg_id.to_string()),
        )
    }

    pub fn show_images(&self, broadcaster_id: Uuid, msg_id: Uuid) -> bool {
        self.publish(
            broadcaster_id,
            Update::new(UpdateType::ShowImages, msg_id.to_string()),
        )
    }

    pub fn hide_images(&self, broadcaster_id: Uuid, msg_id: Uuid) -> bool {
        self.publish(
            broadcaster_id,
            Update::new(UpdateType::HideImages, msg_id.to_string()),
        )
    }

    pub fn clean_overlay(&self, broadcaster_id: Uuid) -> bool {
        self.publish(broadcaster_id, Update::new(UpdateType::CleanOverlay, ""))
    }

    /// Skip whatever is playing, authorized by the broadcaster's control token.
    pub fn skip_current(&self, broadcaster_id: Uuid, token: &str) -> bool {
        self.publish(broadcaster_id, Update::new(UpdateType::SkipCurrent, token))
    }

    pub fn show_images_current(&self, broadcaster_id: Uuid, token: &str) -> bool {
        self.publish(
            broadcaster_id,
            Update::new(UpdateType::ShowImagesCurrent, token),
        )
    }
}

/// `EventSink` that writes to one broadcaster's subscribers.
struct BroadcasterSink {
    manager: Arc<ConnectionManager>,
    broadcaster_id: Uuid,
}

#[async_trait]
impl EventSink for BroadcasterSink {
    async fn write(&self, event: Arc<DataEvent>) -> bool {
        self.manager.try_write(self.broadcaster_id, event).await
    }
}
