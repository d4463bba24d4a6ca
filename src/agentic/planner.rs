//! Turn planning for multi-character dialogues.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{speaker_of, AgenticError, END};
use crate::llm::{ChatMessage, LlmClient};
use crate::processor::prompts::build_character_context;
use crate::store::Card;

const PLANNER_PROMPT: &str = "You are a conversation planner. Your goal is to analyze the user's prompt \
and decide who should speak first and what they should say to strictly follow the user's intent.";

const DIRECTOR_PROMPT: &str = "You are a conversation director. Analyze the conversation history. \
Has it reached a natural conclusion? Has it reached an unending repeating loop? \
If there is any sign of either, select 'END'. \
If not, select the character who should speak next to continue the flow naturally.";

/// Who opens the dialogue and what they say.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InitialPlan {
    pub first_speaker_name: String,
    pub first_message_text: String,
}

#[derive(Debug, Deserialize)]
struct NextSpeakerResponse {
    next_speaker_name: String,
}

/// Outcome of next-speaker selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextSpeaker {
    Character(String),
    End,
}

impl NextSpeaker {
    fn from_name(name: &str) -> Self {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case(END) {
            NextSpeaker::End
        } else {
            NextSpeaker::Character(name.to_string())
        }
    }
}

#[derive(Clone)]
pub struct Planner {
    llm: Arc<dyn LlmClient>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Pick the opening speaker among `cards` and write their first line.
    pub async fn plan_initial_turn(
        &self,
        prompt: &str,
        cards: &[Card],
    ) -> Result<InitialPlan, AgenticError> {
        if cards.is_empty() {
            return Err(AgenticError::NoCharacters);
        }

        let names: Vec<&str> = cards.iter().map(|c| c.name.as_str()).collect();
        let schema = json!({
            "type": "object",
            "properties": {
                "first_speaker_name": { "type": "string", "enum": names },
                "first_message_text": { "type": "string" }
            },
            "required": ["first_speaker_name", "first_message_text"]
        });

        let mut characters = String::new();
        for card in cards {
            characters.push('\n');
            characters.push_str(&card.name);
            characters.push('\n');
            characters.push_str(&build_character_context(
                &card.name,
                &card.description,
                &card.personality,
                &card.message_examples,
            ));
        }
        let user = format!(
            "Available Characters:{characters}\n\n User Prompt: \"{prompt}\" \n\n \
             Task: Decide the first speaker and write ONLY their message text (without the character name prefix). \
             The message should be in character style and directly follow the user's prompt scenario."
        );

        let messages = vec![ChatMessage::system(PLANNER_PROMPT), ChatMessage::user(user)];
        let raw = self.llm.ask_guided(messages, schema, 1.0).await?;
        let plan: InitialPlan = serde_json::from_str(&raw)?;
        debug!(speaker = %plan.first_speaker_name, "initial turn planned");
        Ok(plan)
    }

    /// Choose who speaks after the last entry of `transcript`, or end the
    /// dialogue. The previous speaker is never chosen twice in a row.
    pub async fn select_next_speaker(
        &self,
        prompt: &str,
        transcript: &[String],
        names: &[String],
    ) -> Result<NextSpeaker, AgenticError> {
        if names.is_empty() {
            return Ok(NextSpeaker::End);
        }

        let last_speaker = transcript.last().map(|l| speaker_of(l)).unwrap_or_default();
        let candidates: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|n| !n.eq_ignore_ascii_case(last_speaker))
            .collect();
        let mut options = candidates.clone();
        options.push(END);

        let schema = json!({
            "type": "object",
            "properties": {
                "next_speaker_name": { "type": "string", "enum": options }
            },
            "required": ["next_speaker_name"]
        });

        let mut messages: Vec<ChatMessage> =
            transcript.iter().map(|line| ChatMessage::user(line.as_str())).collect();
        messages.push(ChatMessage::system(DIRECTOR_PROMPT));
        messages.push(ChatMessage::user(format!(
            "Topic: {prompt}. Who speaks next between following speakers? \
             END is chosen if the conversation reached its dead end or there is some repetition happening. \
             Available: {}, {END}",
            candidates.join(", ")
        )));

        let raw = self.llm.ask_guided(messages, schema, 0.0).await?;
        let resp: NextSpeakerResponse = serde_json::from_str(&raw)?;
        Ok(NextSpeaker::from_name(&resp.next_speaker_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Attachment, LlmError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct Recorder {
        reply: String,
        calls: Mutex<Vec<(Vec<ChatMessage>, serde_json::Value, f64)>>,
    }

    #[async_trait]
    impl LlmClient for Recorder {
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
            messages: Vec<ChatMessage>,
            schema: serde_json::Value,
            temperature: f64,
        ) -> Result<String, LlmError> {
            self.calls.lock().push((messages, schema, temperature));
            Ok(self.reply.clone())
        }
    }

    fn planner(reply: &str) -> (Planner, Arc<Recorder>) {
        let llm = Arc::new(Recorder {
            reply: reply.into(),
            ..Default::default()
        });
        (Planner::new(llm.clone()), llm)
    }

    fn card(name: &str) -> Card {
        Card {
            id: Uuid::new_v4(),
            name: name.into(),
            short_name: name.to_lowercase(),
            description: format!("{name} description"),
            personality: String::new(),
            message_examples: Vec::new(),
            system_prompt: String::new(),
            voice_reference: Vec::new(),
        }
    }

    #[tokio::test]
    async fn initial_turn_uses_character_enum() {
        let (planner, llm) =
            planner(r#"{"first_speaker_name":"Jesus","first_message_text":"Peace be with you"}"#);
        let plan = planner
            .plan_initial_turn("jesus vs forsen", &[card("Forsen"), card("Jesus")])
            .await
            .unwrap();
        assert_eq!(plan.first_speaker_name, "Jesus");
        assert_eq!(plan.first_message_text, "Peace be with you");

        let calls = llm.calls.lock();
        let (messages, schema, temperature) = &calls[0];
        assert_eq!(*temperature, 1.0);
        assert_eq!(
            schema["properties"]["first_speaker_name"]["enum"],
            json!(["Forsen", "Jesus"])
        );
        let user = messages[1].first_text().unwrap();
        assert!(user.contains("Description: Jesus description"));
        assert!(user.contains("User Prompt: \"jesus vs forsen\""));
    }

    #[tokio::test]
    async fn initial_turn_without_cards_fails() {
        let (planner, llm) = planner("{}");
        let err = planner.plan_initial_turn("x", &[]).await.unwrap_err();
        assert!(matches!(err, AgenticError::NoCharacters));
        assert!(llm.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn next_speaker_excludes_previous_and_offers_end() {
        let (planner, llm) = planner(r#"{"next_speaker_name":"Forsen"}"#);
        let names = vec!["Forsen".to_string(), "Jesus".to_string()];
        let transcript = vec!["Forsen: hi".to_string(), "jesus: hello".to_string()];

        let next = planner
            .select_next_speaker("topic", &transcript, &names)
            .await
            .unwrap();
        assert_eq!(next, NextSpeaker::Character("Forsen".into()));

        let calls = llm.calls.lock();
        let (messages, schema, temperature) = &calls[0];
        assert_eq!(*temperature, 0.0);
        assert_eq!(
            schema["properties"]["next_speaker_name"]["enum"],
            json!(["Forsen", "END"])
        );
        // transcript, director, question
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role, "system");
        assert!(messages[3].first_text().unwrap().ends_with("Available: Forsen, END"));
    }

    #[tokio::test]
    async fn end_and_empty_names() {
        let (planner, llm) = planner(r#"{"next_speaker_name":"END"}"#);
        let names = vec!["Forsen".to_string()];
        assert_eq!(
            planner.select_next_speaker("t", &[], &names).await.unwrap(),
            NextSpeaker::End
        );
        assert_eq!(
            planner.select_next_speaker("t", &[], &[]).await.unwrap(),
            NextSpeaker::End
        );
        assert_eq!(llm.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn malformed_reply_is_parse_error() {
        let (planner, _) = planner(r#"{"speaker":"x"}"#);
        let err = planner
            .select_next_speaker("t", &[], &["A".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AgenticError::Parse(_)));
    }
}
