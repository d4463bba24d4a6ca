//! Multi-character dialogue planning.
//!
//! `Detector` finds which known characters a prompt refers to; `Planner`
//! picks who opens the dialogue and who speaks next. Both use
//! schema-constrained LLM calls so the answer is always a known name.

pub mod detector;
pub mod planner;

pub use detector::Detector;
pub use planner::{InitialPlan, NextSpeaker, Planner};

use crate::llm::LlmError;

/// Sentinel speaker name that ends a dialogue.
pub const END: &str = "END";

#[derive(Debug, thiserror::Error)]
pub enum AgenticError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("failed to parse LLM response: {0}")]
    Parse(String),

    #[error("no characters available")]
    NoCharacters,
}

impl From<serde_json::Error> for AgenticError {
    fn from(e: serde_json::Error) -> Self {
        AgenticError::Parse(e.to_string())
    }
}

/// Speaker prefix of a `Name: text` transcript line.
pub fn speaker_of(line: &str) -> &str {
    line.split_once(':').map_or(line, |(name, _)| name).trim()
}
