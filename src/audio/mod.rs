//! Audio processing seam: probing, transcoding, cutting, effects and
//! concatenation, plus the sound-effect library.

pub mod ffmpeg;
pub mod filters;
pub mod sfx;

use std::time::Duration;

use async_trait::async_trait;

pub use ffmpeg::FfmpegClient;
pub use filters::{limit_filters, FilterKind};
pub use sfx::DirSfxLibrary;

/// Errors from audio operations.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} failed ({status}): {stderr}")]
    Tool {
        tool: &'static str,
        status: String,
        stderr: String,
    },

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("no audio to concatenate")]
    NoInput,

    #[error("sound effect not found: {0}")]
    SfxNotFound(String),
}

#[async_trait]
pub trait AudioProcessor: Send + Sync {
    async fn probe_duration(&self, audio: &[u8]) -> Result<Duration, AudioError>;

    async fn to_mp3(&self, audio: &[u8]) -> Result<Vec<u8>, AudioError>;

    /// Keep only the first `duration` of the clip.
    async fn cut(&self, audio: &[u8], duration: Duration) -> Result<Vec<u8>, AudioError>;

    /// Apply numbered filters in order.
    async fn apply_filters(&self, audio: &[u8], filters: &[String]) -> Result<Vec<u8>, AudioError>;

    /// Join clips with `padding` of silence between consecutive clips.
    async fn concatenate(
        &self,
        padding: Duration,
        clips: Vec<Vec<u8>>,
    ) -> Result<Vec<u8>, AudioError>;
}

/// Named sound effects usable as `[name]` in universal markup.
#[async_trait]
pub trait SfxLibrary: Send + Sync {
    /// Cheap validity check used while parsing.
    fn contains(&self, name: &str) -> bool;

    async fn load(&self, name: &str) -> Result<Vec<u8>, AudioError>;
}
