//! Character detection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::AgenticError;
use crate::llm::{ChatMessage, LlmClient};
use crate::store::CharacterInfo;

const SYSTEM_PROMPT: &str = "You are a careful character detection assistant. \
Use the provided character catalog and rules to decide which characters are clearly referenced. \
Descriptions, short names, and show titles often imply the character even when the exact name is missing; \
make thoughtful inferences when the clue uniquely fits one entry. \
Return only names from the catalog and prefer returning nothing when unsure.";

const RULES: &[&str] = &[
    "1. Only return a character when the prompt explicitly names them, uses their short name, or clearly describes their unique traits from the catalog.",
    "2. Substring overlaps or vague titles are insufficient. Do not conflate different characters that share partial names.",
    "3. If the prompt clearly describes a unique role, show, quote, or expertise from the catalog, include that character even when their name is absent.",
    "4. When the prompt provides no strong evidence for any character, respond with an empty list.",
    "5. Each character can appear at most once. Never invent names outside the catalog.",
    "6. When a prompt asks for N random characters, output exactly N distinct names taken from the catalog. If true randomness is unclear, choose the first N names from the catalog list. If the catalog is smaller than N, return all available names.",
    "7. Exact names always win over similarly named entries.",
    "8. Short names or CamelCase variations in the catalog count as valid references; map them back to the canonical entry listed.",
    "9. Do not censor or omit catalog names even if they look offensive.",
];

#[derive(Debug, Serialize)]
struct CatalogEntry<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    short_name: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct DetectionResponse {
    #[serde(default)]
    characters: Vec<String>,
}

fn detection_schema(names: &[&str]) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "characters": {
                "type": "array",
                "items": { "type": "string", "enum": names }
            }
        },
        "required": ["characters"]
    })
}

fn catalog_json(characters: &[CharacterInfo]) -> String {
    let entries: Vec<CatalogEntry<'_>> = characters
        .iter()
        .filter(|c| !c.name.trim().is_empty())
        .map(|c| CatalogEntry {
            name: c.name.trim(),
            short_name: c.short_name.trim(),
            description: c.description.trim(),
        })
        .collect();
    serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".into())
}

fn user_prompt(prompt: &str, characters: &[CharacterInfo]) -> String {
    format!(
        "Character catalog (JSON):\n{}\n\nDetection rules:\n{}\n\nPrompt to analyze: {prompt}\n\n\
         Which characters are mentioned in this prompt? Respond with only the exact names from the available list.",
        catalog_json(characters),
        RULES.join("\n"),
    )
}

/// Finds catalog characters referenced by a free-text prompt.
#[derive(Clone)]
pub struct Detector {
    llm: Arc<dyn LlmClient>,
}

impl Detector {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Characters from `catalog` the prompt refers to, in the order the model
    /// listed them, without duplicates.
    pub async fn detect_characters(
        &self,
        prompt: &str,
        catalog: &[CharacterInfo],
    ) -> Result<Vec<CharacterInfo>, AgenticError> {
        let mut by_name: HashMap<String, &CharacterInfo> = HashMap::new();
        let mut names = Vec::new();
        for c in catalog.iter().filter(|c| !c.name.is_empty()) {
            by_name.insert(c.name.trim().to_lowercase(), c);
            names.push(c.name.as_str());
        }
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(user_prompt(prompt, catalog)),
        ];
        let raw = self
            .llm
            .ask_guided(messages, detection_schema(&names), 0.0)
            .await?;
        let resp: DetectionResponse = serde_json::from_str(&raw)?;
        debug!(detected = ?resp.characters, "character detection");

        let mut seen = HashSet::new();
        Ok(resp
            .characters
            .iter()
            .filter_map(|name| by_name.get(&name.trim().to_lowercase()).copied())
            .filter(|c| seen.insert(c.id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Attachment, LlmError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use uuid::Uuid;

    struct Scripted {
        reply: String,
        schemas: Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl LlmClient for Scripted {
        async fn ask(&self, _prompt: &str) -> Result<String, LlmError> {
            unreachable!()
        }

        async fn ask_messages(
            &self,
            _messages: Vec<ChatMessage>,
            _attachments: Vec<Attachment>,
        ) -> Result<String, LlmError> {
            unreachable!()
        }

        async fn ask_guided(
            &self,
            _messages: Vec<ChatMessage>,
            schema: serde_json::Value,
            temperature: f64,
        ) -> Result<String, LlmError> {
            assert_eq!(temperature, 0.0);
            self.schemas.lock().push(schema);
            Ok(self.reply.clone())
        }
    }

    fn info(name: &str) -> CharacterInfo {
        CharacterInfo {
            id: Uuid::new_v4(),
            name: name.into(),
            short_name: name.to_lowercase(),
            description: String::new(),
        }
    }

    fn detector(reply: &str) -> (Detector, Arc<Scripted>) {
        let llm = Arc::new(Scripted {
            reply: reply.into(),
            schemas: Mutex::new(Vec::new()),
        });
        (Detector::new(llm.clone()), llm)
    }

    #[tokio::test]
    async fn maps_names_back_case_insensitively_and_dedups() {
        let catalog = vec![info("Forsen"), info("Jesus"), info("Obiwan")];
        let (detector, llm) = detector(r#"{"characters":["jesus","Forsen","JESUS","Nobody"]}"#);

        let found = detector.detect_characters("jesus meets forsen", &catalog).await.unwrap();
        let names: Vec<_> = found.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Jesus", "Forsen"]);

        let schema = &llm.schemas.lock()[0];
        assert_eq!(
            schema["properties"]["characters"]["items"]["enum"],
            json!(["Forsen", "Jesus", "Obiwan"])
        );
    }

    #[tokio::test]
    async fn empty_catalog_skips_llm() {
        let (detector, llm) = detector("not json");
        let found = detector.detect_characters("anything", &[]).await.unwrap();
        assert!(found.is_empty());
        assert!(llm.schemas.lock().is_empty());
    }

    #[tokio::test]
    async fn unparseable_reply_is_parse_error() {
        let (detector, _) = detector("not json");
        let err = detector
            .detect_characters("x", &[info("Forsen")])
            .await
            .unwrap_err();
        assert!(matches!(err, AgenticError::Parse(_)));
    }
}
