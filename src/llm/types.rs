//! Wire types for OpenAI-compatible completion servers (vLLM and friends).
//!
//! Serde-serializable to JSON for HTTP calls.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Stop sequences used by every persona prompt.
pub const STOP_TOKENS: [&str; 3] = ["###", "<START>", "<END>"];

// ── Message content ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One part of a chat message: text or an inline image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Vec<ContentPart>,
}

impl ChatMessage {
    /// Create a message holding one text part.
    pub fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: vec![ContentPart::Text {
                text: content.into(),
            }],
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text("user", content)
    }

    /// First text part, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|p| match p {
            ContentPart::Text { text } => Some(text.as_str()),
            ContentPart::ImageUrl { .. } => None,
        })
    }
}

/// Binary attachment sent to a vision model as a data URL.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub data: Vec<u8>,
    pub content_type: String,
}

impl Attachment {
    pub fn png(data: Vec<u8>) -> Self {
        Self {
            data,
            content_type: "image/png".into(),
        }
    }

    pub fn data_url(&self) -> String {
        let ctype = if self.content_type.is_empty() {
            "image/png"
        } else {
            self.content_type.as_str()
        };
        format!("data:{ctype};base64,{}", STANDARD.encode(&self.data))
    }
}

/// Append attachments as image parts to the last user message, adding an
/// empty user message if there is none. Empty attachments are skipped.
pub fn attach_images(messages: &mut Vec<ChatMessage>, attachments: &[Attachment]) {
    if attachments.iter().all(|a| a.data.is_empty()) {
        return;
    }

    let idx = match messages.iter().rposition(|m| m.role == "user") {
        Some(idx) => idx,
        None => {
            messages.push(ChatMessage {
                role: "user".into(),
                content: Vec::new(),
            });
            messages.len() - 1
        }
    };

    for att in attachments.iter().filter(|a| !a.data.is_empty()) {
        messages[idx].content.push(ContentPart::ImageUrl {
            image_url: ImageUrl { url: att.data_url() },
        });
    }
}

// ── Requests / responses ──

/// Body of `POST /v1/chat/completions`.
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub min_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guided_json: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatChoiceMessage {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

/// Body of `POST /v1/completions`.
#[derive(Debug, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub frequency_penalty: f64,
    pub stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub message: ChatChoiceMessage,
}

impl CompletionChoice {
    /// Completion servers answer in `text`; some chat-style servers use `message`.
    pub fn content(&self) -> &str {
        if !self.text.is_empty() {
            &self.text
        } else {
            &self.message.content
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

impl CompletionResponse {
    /// The longest non-empty variant, or an empty string.
    pub fn longest(&self) -> String {
        self.choices
            .iter()
            .map(CompletionChoice::content)
            .fold("", |best, c| if c.len() > best.len() { c } else { best })
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_part_serializes_with_type_tag() {
        let msg = ChatMessage::user("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][0]["text"], "hi");
    }

    #[test]
    fn attachments_go_to_last_user_message() {
        let mut messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("first"),
            ChatMessage::text("assistant", "reply"),
        ];
        attach_images(&mut messages, &[Attachment::png(vec![1, 2, 3])]);

        assert_eq!(messages.len(), 3);
        assert_eq!(
            messages[1].content[1],
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "data:image/png;base64,AQID".into()
                }
            }
        );
    }

    #[test]
    fn attachments_without_user_message_add_one() {
        let mut messages = vec![ChatMessage::system("sys")];
        attach_images(&mut messages, &[Attachment::png(vec![9])]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, "user");
    }

    #[test]
    fn empty_attachments_are_ignored() {
        let mut messages = vec![ChatMessage::user("x")];
        attach_images(&mut messages, &[Attachment::png(vec![])]);
        assert_eq!(messages[0].content.len(), 1);
    }

    #[test]
    fn guided_request_omits_stop_when_empty() {
        let req = ChatRequest {
            model: "m".into(),
            messages: vec![],
            max_tokens: 10,
            min_tokens: 1,
            stop: vec![],
            guided_json: Some(serde_json::json!({"type": "object"})),
            temperature: Some(0.0),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("stop").is_none());
        assert_eq!(json["guided_json"]["type"], "object");
        assert_eq!(json["temperature"], 0.0);
    }

    #[test]
    fn longest_completion_wins() {
        let resp: CompletionResponse = serde_json::from_str(
            r#"{"choices":[{"text":"short"},{"text":"much longer"},{"message":{"content":"mid one"}}]}"#,
        )
        .unwrap();
        assert_eq!(resp.longest(), "much longer");
    }
}
