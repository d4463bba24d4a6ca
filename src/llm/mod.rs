//! LLM access: the `LlmClient` seam plus an OpenAI-compatible HTTP client.
//!
//! Handlers and the agentic planner only see the trait, so tests swap in
//! scripted fakes.

pub mod client;
pub mod types;

use async_trait::async_trait;

pub use client::{LlmError, OpenAiClient};
pub use types::{Attachment, ChatMessage};

/// Text-generation capability.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Free-form completion of a raw prompt.
    async fn ask(&self, prompt: &str) -> Result<String, LlmError>;

    /// Chat completion, optionally with images attached to the last user turn.
    async fn ask_messages(
        &self,
        messages: Vec<ChatMessage>,
        attachments: Vec<Attachment>,
    ) -> Result<String, LlmError>;

    /// Chat completion constrained to a JSON schema. Returns the raw JSON text.
    async fn ask_guided(
        &self,
        messages: Vec<ChatMessage>,
        schema: serde_json::Value,
        temperature: f64,
    ) -> Result<String, LlmError>;
}
