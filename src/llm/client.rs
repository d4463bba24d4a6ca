//! Raw HTTP client for OpenAI-compatible completion servers.
//!
//! No runtime awareness, just makes API calls via reqwest.

use async_trait::async_trait;
use reqwest::Client;

use super::types::{
    attach_images, Attachment, ChatMessage, ChatRequest, ChatResponse, CompletionRequest,
    CompletionResponse, STOP_TOKENS,
};
use super::LlmClient;
use crate::config::LlmConfig;

/// Errors from LLM operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Client for `/v1/completions` and `/v1/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    config: LlmConfig,
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> Self {
        Self::with_http(Client::new(), config)
    }

    pub fn with_http(http: Client, config: LlmConfig) -> Self {
        Self { http, config }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.url.trim_end_matches('/'))
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, LlmError>
    where
        B: serde::Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let mut request = self
            .http
            .post(self.endpoint(path))
            .header("content-type", "application/json")
            .json(body);
        if !self.config.access_token.is_empty() {
            request = request.bearer_auth(&self.config.access_token);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();

        if status != 200 {
            let body = response.text().await.unwrap_or_else(|_| "(no body)".into());
            return Err(LlmError::Api {
                status,
                message: body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("failed to parse response: {e}")))
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let resp: ChatResponse = self.post("/v1/chat/completions", request).await?;
        resp.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no choices returned".into()))
    }

    fn stop_tokens() -> Vec<String> {
        STOP_TOKENS.iter().map(|s| s.to_string()).collect()
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn ask(&self, prompt: &str) -> Result<String, LlmError> {
        let request = CompletionRequest {
            model: self.config.model.clone(),
            prompt: prompt.to_string(),
            max_tokens: self.config.max_tokens,
            temperature: 0.5,
            frequency_penalty: 1.1,
            stop: Self::stop_tokens(),
        };
        let resp: CompletionResponse = self.post("/v1/completions", &request).await?;
        Ok(resp.longest())
    }

    async fn ask_messages(
        &self,
        mut messages: Vec<ChatMessage>,
        attachments: Vec<Attachment>,
    ) -> Result<String, LlmError> {
        attach_images(&mut messages, &attachments);
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            min_tokens: self.config.min_tokens,
            stop: Self::stop_tokens(),
            guided_json: None,
            temperature: None,
        };
        self.chat(&request).await
    }

    async fn ask_guided(
        &self,
        messages: Vec<ChatMessage>,
        schema: serde_json::Value,
        temperature: f64,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            min_tokens: self.config.min_tokens,
            stop: Vec::new(),
            guided_json: Some(schema),
            temperature: Some(temperature),
        };
        self.chat(&request).await
    }
}
