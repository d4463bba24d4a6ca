//! Playback cueing.
//!
//! A playback task sends the text and audio cues, then stays alive for the
//! clip's real duration so callers can sequence utterances. It polls the
//! skip set on every tick and sends a skip cue if the message was skipped
//! mid-clip.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error};
use uuid::Uuid;

use super::state::ProcessorState;
use crate::cancel::CancelScope;
use crate::conns::{DataEvent, EventSink};
use crate::tts::Timing;

/// A clip ready to play.
pub struct Cue {
    pub msg_id: Uuid,
    pub text: String,
    pub audio: Vec<u8>,
    pub duration: Duration,
    /// Word timings sent with the audio cue.
    pub timings: Vec<Timing>,
}

/// A running playback.
pub struct Playback {
    handle: JoinHandle<()>,
}

impl Playback {
    /// Wait until the clip finished, was skipped, or `scope` was cancelled.
    /// Returns false on cancellation.
    pub async fn wait(mut self, scope: &CancelScope) -> bool {
        tokio::select! {
            biased;
            _ = scope.cancelled() => false,
            joined = &mut self.handle => {
                if let Err(e) = joined {
                    error!(error = %e, "playback task failed");
                }
                true
            }
        }
    }
}

/// Start playing `cue` on a background task. The last word timing is
/// stretched to the clip's end.
pub fn spawn(
    mut cue: Cue,
    sink: Arc<dyn EventSink>,
    state: Arc<ProcessorState>,
    scope: CancelScope,
    tick: Duration,
) -> Playback {
    if let Some(last) = cue.timings.last_mut() {
        last.end = cue.duration;
    }
    let handle = tokio::spawn(run(cue, sink, state, scope, tick));
    Playback { handle }
}

async fn run(
    cue: Cue,
    sink: Arc<dyn EventSink>,
    state: Arc<ProcessorState>,
    scope: CancelScope,
    tick: Duration,
) {
    if state.is_skipped(cue.msg_id) {
        return;
    }

    sink.write(Arc::new(DataEvent::text(cue.text))).await;
    match DataEvent::audio(&cue.audio, cue.msg_id, &cue.timings) {
        Ok(event) => {
            sink.write(Arc::new(event)).await;
        }
        Err(e) => {
            error!(msg_id = %cue.msg_id, error = %e, "failed to encode audio cue");
            return;
        }
    }

    let tick = tick.max(Duration::from_millis(1));
    let start = Instant::now();
    let mut ticker = interval_at(start + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = scope.cancelled() => return,
            _ = ticker.tick() => {
                if state.is_skipped(cue.msg_id) {
                    debug!(msg_id = %cue.msg_id, "playback skipped");
                    sink.write(Arc::new(DataEvent::skip(cue.msg_id))).await;
                    return;
                }
                if start.elapsed() > cue.duration {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conns::{AudioPayload, EventType};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Arc<DataEvent>>>,
    }

    #[async_trait]
    impl EventSink for Recorder {
        async fn write(&self, event: Arc<DataEvent>) -> bool {
            self.events.lock().push(event);
            true
        }
    }

    impl Recorder {
        fn types(&self) -> Vec<EventType> {
            self.events.lock().iter().map(|e| e.event_type).collect()
        }
    }

    fn cue(msg_id: Uuid, millis: u64) -> Cue {
        Cue {
            msg_id,
            text: "hello".into(),
            audio: vec![1, 2, 3],
            duration: Duration::from_millis(millis),
            timings: Vec::new(),
        }
    }

    fn timing(end_ms: u64) -> Timing {
        Timing {
            text: "w".into(),
            start: Duration::ZERO,
            end: Duration::from_millis(end_ms),
        }
    }

    #[tokio::test]
    async fn plays_for_clip_duration() {
        let sink = Arc::new(Recorder::default());
        let state = Arc::new(ProcessorState::new());
        let scope = CancelScope::new();
        let started = Instant::now();

        let mut clip = cue(Uuid::new_v4(), 40);
        clip.timings = vec![timing(10), timing(20)];
        let playback = spawn(
            clip,
            sink.clone(),
            state,
            scope.clone(),
            Duration::from_millis(5),
        );
        assert!(playback.wait(&scope).await);

        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(sink.types(), vec![EventType::Text, EventType::Audio]);

        let payload: AudioPayload = serde_json::from_slice(&sink.events.lock()[1].event_data).unwrap();
        let ends: Vec<f64> = payload.timings.iter().map(|t| t.end).collect();
        assert_eq!(ends, vec![0.01, 0.04]);
    }

    #[tokio::test]
    async fn skip_mid_clip_sends_skip_cue() {
        let sink = Arc::new(Recorder::default());
        let state = Arc::new(ProcessorState::new());
        let scope = CancelScope::new();
        let msg_id = Uuid::new_v4();

        let playback = spawn(
            cue(msg_id, 10_000),
            sink.clone(),
            state.clone(),
            scope.clone(),
            Duration::from_millis(5),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        state.add_skipped(msg_id);
        assert!(playback.wait(&scope).await);

        assert_eq!(
            sink.types(),
            vec![EventType::Text, EventType::Audio, EventType::Skip]
        );
        assert_eq!(sink.events.lock()[2].data_str(), msg_id.to_string());
    }

    #[tokio::test]
    async fn already_skipped_emits_nothing() {
        let sink = Arc::new(Recorder::default());
        let state = Arc::new(ProcessorState::new());
        let scope = CancelScope::new();
        let msg_id = Uuid::new_v4();
        state.add_skipped(msg_id);

        let playback = spawn(
            cue(msg_id, 10_000),
            sink.clone(),
            state,
            scope.clone(),
            Duration::from_millis(5),
        );
        assert!(playback.wait(&scope).await);
        assert!(sink.events.lock().is_empty());
    }

    #[tokio::test]
    async fn cancellation_ends_wait() {
        let sink = Arc::new(Recorder::default());
        let scope = CancelScope::new();
        let playback = spawn(
            cue(Uuid::new_v4(), 10_000),
            sink,
            Arc::new(ProcessorState::new()),
            scope.child(),
            Duration::from_millis(5),
        );
        scope.cancel();
        assert!(!playback.wait(&scope).await);
    }
}
