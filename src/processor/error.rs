use crate::agentic::AgenticError;
use crate::audio::AudioError;
use crate::llm::LlmError;
use crate::store::StoreError;
use crate::tts::TtsError;

/// Errors from one interaction handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("TTS failed: {0}")]
    Tts(#[from] TtsError),

    #[error("LLM failed: {0}")]
    Llm(#[from] LlmError),

    #[error("audio processing failed: {0}")]
    Audio(#[from] AudioError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("agentic planning failed: {0}")]
    Agentic(#[from] AgenticError),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("reward has no character")]
    MissingCharacter,

    #[error("unknown speaker {0:?}")]
    UnknownSpeaker(String),

    #[error("no audio generated")]
    NoAudio,
}

impl HandlerError {
    /// Errors caused by the message itself. They abort only that
    /// interaction; everything else fails the processor run.
    pub fn is_interaction_only(&self) -> bool {
        matches!(
            self,
            HandlerError::Agentic(AgenticError::Parse(_) | AgenticError::NoCharacters)
                | HandlerError::MissingCharacter
                | HandlerError::UnknownSpeaker(_)
                | HandlerError::NoAudio
        )
    }
}
