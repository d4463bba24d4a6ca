//! Speech synthesis seam.
//!
//! A `TtsEngine` turns text plus a reference voice clip into audio and
//! per-word timings. `client` talks to an HTTP synthesis server.

pub mod client;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use client::HttpTtsClient;

/// Errors from speech synthesis.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TTS server error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid TTS response: {0}")]
    InvalidResponse(String),
}

/// When one word is spoken, relative to the start of its clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub text: String,
    pub start: Duration,
    pub end: Duration,
}

impl Timing {
    /// Shift both ends by `offset`, saturating.
    pub fn shifted(mut self, offset: Duration) -> Self {
        self.start = self.start.saturating_add(offset);
        self.end = self.end.saturating_add(offset);
        self
    }

    /// Multiply both ends by `ratio`. Overflow saturates; a negative or NaN
    /// ratio collapses the timing to zero.
    pub fn scaled(mut self, ratio: f64) -> Self {
        self.start = scale(self.start, ratio);
        self.end = scale(self.end, ratio);
        self
    }

    /// Clamp both ends to `max`.
    pub fn clamped(mut self, max: Duration) -> Self {
        self.start = self.start.min(max);
        self.end = self.end.min(max);
        self
    }
}

fn scale(d: Duration, ratio: f64) -> Duration {
    if ratio.is_nan() || ratio <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(d.as_secs_f64() * ratio).unwrap_or(Duration::MAX)
}

/// Synthesized speech.
#[derive(Debug, Clone, Default)]
pub struct Speech {
    pub audio: Vec<u8>,
    pub timings: Vec<Timing>,
}

#[async_trait]
pub trait TtsEngine: Send + Sync {
    async fn tts(&self, text: &str, voice_reference: &[u8]) -> Result<Speech, TtsError>;
}
