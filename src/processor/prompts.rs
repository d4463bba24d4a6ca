//! Persona prompt construction.
//!
//! Every prompt uses the `<START>###Speaker: text<END>` turn format the
//! completion endpoint stops on (see `llm::types::STOP_TOKENS`).

use std::fmt::Write as _;

use crate::store::{Card, MessageExample};

/// Name, description, personality and examples for one persona.
/// Empty fields are omitted.
pub fn build_character_context(
    name: &str,
    description: &str,
    personality: &str,
    examples: &[MessageExample],
) -> String {
    let mut out = String::new();
    if !name.is_empty() {
        let _ = writeln!(out, "Name: {name}");
    }
    if !description.is_empty() {
        let _ = writeln!(out, "Description: {description}");
    }
    if !personality.is_empty() {
        let _ = writeln!(out, "Personality: {personality}");
    }
    if !examples.is_empty() {
        out.push_str("Message Examples: ");
        for ex in examples {
            let _ = writeln!(
                out,
                "<START>###UserName: {}\n###{name}: {}<END>",
                ex.request, ex.response
            );
        }
    }
    out
}

fn card_context(card: &Card) -> String {
    let mut out = build_character_context(
        &card.name,
        &card.description,
        &card.personality,
        &card.message_examples,
    );
    if !card.system_prompt.is_empty() {
        let _ = writeln!(out, "System Instructions: {}", card.system_prompt);
    }
    out
}

/// Single-turn prompt answering `message` from `requester` in character.
pub fn craft_prompt(card: &Card, requester: &str, message: &str) -> String {
    let mut out = card_context(card);
    let _ = write!(
        out,
        "Prompt: <START>###{requester}: {message}\n###{}: ",
        card.name
    );
    out
}

/// Prompt for the next line of a multi-character dialogue spoken by `card`.
/// `history` entries are `Name: text` lines.
pub fn dialogue_prompt(card: &Card, scenario: &str, history: &[String]) -> String {
    let mut out = card_context(card);
    if !scenario.is_empty() {
        let _ = writeln!(out, "Topic: {scenario}");
    }
    let _ = writeln!(
        out,
        "Task: Write the next single message spoken by {}. Return ONLY the message text.",
        card.name
    );
    out.push_str(
        "Do NOT include any speaker name prefixes (no \"Name:\"), do NOT write multiple turns, and do NOT add extra labels.\n",
    );
    for turn in history.iter().filter(|t| !t.is_empty()) {
        let _ = writeln!(out, "<START>###{turn}<END>");
    }
    let _ = write!(out, "<START>###{}: ", card.name);
    out
}
