//! Universal TTS markup.
//!
//! A message is scanned one character at a time:
//!
//! - `name:` switches the voice when `name` is a known voice.
//! - `{n}` pushes audio filter `n`; `{.}` pops the innermost filter.
//! - `[name]` plays a sound effect in place.
//!
//! Anything that does not validate stays in the text verbatim. The parser is
//! pure: validity is decided by caller-supplied predicates.

use serde::Serialize;

/// Token that pops the filter stack.
pub const FILTER_POP: &str = ".";

/// One step of a universal message: either spoken text or a sound effect.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Action {
    /// Filter stack active when this action plays, innermost last.
    pub filters: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub voice: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sfx: String,
}

impl Action {
    pub fn is_sfx(&self) -> bool {
        !self.sfx.is_empty()
    }
}

/// Scanner state. Kept private; `parse_message` is the entry point.
struct Parser<'a, V, F, S> {
    is_voice: &'a V,
    is_filter: &'a F,
    is_sfx: &'a S,
    filters: Vec<String>,
    voice: String,
    buf: String,
    actions: Vec<Action>,
}

impl<V, F, S> Parser<'_, V, F, S>
where
    V: Fn(&str) -> bool,
    F: Fn(&str) -> bool,
    S: Fn(&str) -> bool,
{
    fn emit_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.actions.push(Action {
            filters: self.filters.clone(),
            voice: self.voice.clone(),
            text: text.to_string(),
            sfx: String::new(),
        });
    }

    fn close_bracket(&mut self, closing: char) {
        let opening = if closing == ']' { '[' } else { '{' };

        let Some(open_at) = self.buf.rfind(opening) else {
            self.buf.push(closing);
            return;
        };

        let content = self.buf[open_at + opening.len_utf8()..].to_string();
        let before = self.buf[..open_at].to_string();

        if opening == '[' && (self.is_sfx)(&content) {
            self.emit_text(&before);
            self.actions.push(Action {
                filters: self.filters.clone(),
                sfx: content,
                ..Action::default()
            });
            self.buf.clear();
            return;
        }

        if opening == '{' && (content == FILTER_POP || (self.is_filter)(&content)) {
            self.emit_text(&before);
            self.buf.clear();
            if content == FILTER_POP {
                self.filters.pop();
            } else {
                self.filters.push(content);
            }
            return;
        }

        self.buf.push(closing);
    }

    fn colon(&mut self) {
        if self.buf.is_empty() {
            return;
        }

        let Some(last_space) = self.buf.rfind(' ') else {
            if (self.is_voice)(&self.buf) {
                self.voice = std::mem::take(&mut self.buf);
            } else {
                self.buf.push(':');
            }
            return;
        };

        let candidate = &self.buf[last_space + 1..];
        if (self.is_voice)(candidate) {
            let candidate = candidate.to_string();
            let before = self.buf[..=last_space].to_string();
            self.emit_text(&before);
            self.voice = candidate;
            self.buf.clear();
        } else {
            self.buf.push(':');
        }
    }

    fn finish(mut self) -> Vec<Action> {
        let rest = std::mem::take(&mut self.buf);
        self.emit_text(&rest);
        self.actions
    }
}

/// Split a universal message into ordered actions.
pub fn parse_message<V, F, S>(message: &str, is_voice: V, is_filter: F, is_sfx: S) -> Vec<Action>
where
    V: Fn(&str) -> bool,
    F: Fn(&str) -> bool,
    S: Fn(&str) -> bool,
{
    let mut parser = Parser {
        is_voice: &is_voice,
        is_filter: &is_filter,
        is_sfx: &is_sfx,
        filters: Vec::new(),
        voice: String::new(),
        buf: String::new(),
        actions: Vec::new(),
    };

    for ch in message.chars() {
        match ch {
            ']' | '}' => parser.close_bracket(ch),
            ':' => parser.colon(),
            _ => parser.buf.push(ch),
        }
    }

    parser.finish()
}
