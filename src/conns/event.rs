//! Overlay events and processor control updates.
//!
//! `DataEvent` is the only thing that ever leaves the runtime towards a
//! consumer. `Update` is the only thing that ever enters a running processor.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tts::Timing;

/// Blank payload used by the reset cues.
pub const BLANK: &str = " ";

/// Kind of cue carried by a [`DataEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Audio,
    Text,
    Image,
    SetModel,
    SetMotion,
    Info,
    Error,
    Ping,
    Skip,
    PromptImage,
    ShowImages,
    HideImages,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Audio => "audio",
            EventType::Text => "text",
            EventType::Image => "image",
            EventType::SetModel => "set_model",
            EventType::SetMotion => "set_motion",
            EventType::Info => "info",
            EventType::Error => "error",
            EventType::Ping => "ping",
            EventType::Skip => "skip",
            EventType::PromptImage => "prompt_image",
            EventType::ShowImages => "show_images",
            EventType::HideImages => "hide_images",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cue for the overlay. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(rename = "data")]
    pub event_data: Vec<u8>,
}

impl DataEvent {
    pub fn new(event_type: EventType, event_data: impl Into<Vec<u8>>) -> Self {
        Self {
            event_type,
            event_data: event_data.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(EventType::Text, text.into().into_bytes())
    }

    pub fn image(path: impl Into<String>) -> Self {
        Self::new(EventType::Image, path.into().into_bytes())
    }

    /// Image cue pointing at a character's portrait.
    pub fn character_image(card_id: Uuid) -> Self {
        Self::image(format!("/characters/{card_id}/image"))
    }

    pub fn skip(msg_id: Uuid) -> Self {
        Self::new(EventType::Skip, msg_id.to_string().into_bytes())
    }

    /// Audio cue: JSON `{"audio": <base64>, "msg_id": "<uuid>", "timings": [...]}`.
    /// `timings` is omitted when there are none.
    pub fn audio(audio: &[u8], msg_id: Uuid, timings: &[Timing]) -> Result<Self, serde_json::Error> {
        let payload = AudioPayload {
            audio: BASE64.encode(audio),
            msg_id: msg_id.to_string(),
            timings: timings.iter().map(WordTiming::from).collect(),
        };
        Ok(Self::new(EventType::Audio, serde_json::to_vec(&payload)?))
    }

    /// The pair of cues that blanks the overlay after an interaction.
    pub fn reset_cues() -> [Self; 2] {
        [Self::text(BLANK), Self::image(BLANK)]
    }

    /// Payload as UTF-8 text (lossy).
    pub fn data_str(&self) -> String {
        String::from_utf8_lossy(&self.event_data).into_owned()
    }
}

impl fmt::Display for DataEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.event_type, String::from_utf8_lossy(&self.event_data))
    }
}

/// JSON body of an audio cue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPayload {
    pub audio: String,
    pub msg_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timings: Vec<WordTiming>,
}

/// A word and when it is spoken, in seconds from the start of the clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl From<&Timing> for WordTiming {
    fn from(t: &Timing) -> Self {
        Self {
            text: t.text.clone(),
            start: t.start.as_secs_f64(),
            end: t.end.as_secs_f64(),
        }
    }
}

/// JSON body of a prompt-image cue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptImages {
    pub image_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_images: Option<bool>,
}

// ── Control plane ──

/// Kind of control signal sent into a running processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    RestartProcessor,
    SkipMessage,
    ShowImages,
    HideImages,
    CleanOverlay,
    SkipCurrent,
    ShowImagesCurrent,
}

/// Control signal. `data` is a message UUID or a shared token depending on
/// `update_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub update_type: UpdateType,
    #[serde(default)]
    pub data: String,
}

impl Update {
    pub fn new(update_type: UpdateType, data: impl Into<String>) -> Self {
        Self {
            update_type,
            data: data.into(),
        }
    }

    pub fn restart() -> Self {
        Self::new(UpdateType::RestartProcessor, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_type_and_data() {
        let event = DataEvent::text("hello");
        assert_eq!(event.to_string(), "text:hello");
    }

    #[test]
    fn audio_payload_shape() {
        let id = Uuid::new_v4();
        let event = DataEvent::audio(&[1, 2, 3], id, &[]).unwrap();
        assert_eq!(event.event_type, EventType::Audio);

        let json: serde_json::Value = serde_json::from_slice(&event.event_data).unwrap();
        assert_eq!(json["audio"], "AQID");
        assert_eq!(json["msg_id"], id.to_string());
        assert!(json.get("timings").is_none());
    }

    #[test]
    fn audio_payload_carries_word_timings() {
        let timings = [Timing {
            text: "hello".into(),
            start: std::time::Duration::from_millis(250),
            end: std::time::Duration::from_millis(1500),
        }];
        let event = DataEvent::audio(&[1], Uuid::new_v4(), &timings).unwrap();
        let payload: AudioPayload = serde_json::from_slice(&event.event_data).unwrap();
        assert_eq!(
            payload.timings,
            vec![WordTiming {
                text: "hello".into(),
                start: 0.25,
                end: 1.5,
            }]
        );
    }

    #[test]
    fn prompt_images_omits_missing_flag() {
        let payload = PromptImages {
            image_ids: vec!["abcde".into()],
            show_images: None,
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"image_ids":["abcde"]}"#);
    }

    #[test]
    fn reset_cues_are_blank_text_then_image() {
        let [text, image] = DataEvent::reset_cues();
        assert_eq!(text.event_type, EventType::Text);
        assert_eq!(text.event_data, b" ");
        assert_eq!(image.event_type, EventType::Image);
        assert_eq!(image.event_data, b" ");
    }

    #[test]
    fn character_image_path() {
        let id = Uuid::nil();
        let event = DataEvent::character_image(id);
        assert_eq!(
            event.data_str(),
            "/characters/00000000-0000-0000-0000-000000000000/image"
        );
    }

    #[test]
    fn update_serde_names() {
        let update = Update::new(UpdateType::SkipCurrent, "tok");
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["update_type"], "skip_current");
        assert_eq!(json["data"], "tok");
    }
}
