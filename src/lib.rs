//! avatarcast: live AI-avatar broadcast runtime.
//!
//! Channel-point redemptions are queued per broadcaster, turned into speech
//! (plain TTS, persona replies, multi-voice markup or multi-character
//! dialogue) and fanned out to overlay subscribers as timed cues.

pub mod agentic;
pub mod audio;
pub mod cancel;
pub mod config;
pub mod conns;
pub mod dsl;
pub mod llm;
pub mod processor;
pub mod store;
pub mod tts;
