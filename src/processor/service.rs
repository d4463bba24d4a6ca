//! Operations shared by every interaction handler: text filtering, speech
//! synthesis, audio shaping and playback, plus universal markup assembly.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, error, info, warn};

use super::error::HandlerError;
use super::handler::InteractionInput;
use super::playback::{self, Cue, Playback};
use crate::audio::{limit_filters, AudioError, AudioProcessor, FilterKind, SfxLibrary};
use crate::cancel::CancelScope;
use crate::config::ProcessorConfig;
use crate::conns::{EventSink, QueueObserver};
use crate::dsl::{self, Action};
use crate::llm::LlmClient;
use crate::store::{ImageStore, Store, StoreError, UserSettings};
use crate::tts::{Speech, Timing, TtsEngine, TtsError};

/// Replacement for every filtered match.
pub const FILTERED: &str = "(filtered)";

/// Relative length change above which universal timings are rescaled.
const RESCALE_TOLERANCE: f64 = 0.05;

/// External services the handlers talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    /// Image blobs for vision analysis; analysis is off without it.
    pub images: Option<Arc<dyn ImageStore>>,
    pub llm: Arc<dyn LlmClient>,
    pub vision_llm: Option<Arc<dyn LlmClient>>,
    pub tts: Arc<dyn TtsEngine>,
    pub audio: Arc<dyn AudioProcessor>,
    pub sfx: Arc<dyn SfxLibrary>,
    pub observer: Arc<dyn QueueObserver>,
}

/// Combined universal clip.
#[derive(Debug, Clone)]
pub struct UniversalClip {
    pub text: String,
    pub speech: Speech,
}

pub struct InteractionService {
    pub deps: Collaborators,
    pub config: ProcessorConfig,
}

impl InteractionService {
    pub fn new(deps: Collaborators, config: ProcessorConfig) -> Self {
        Self { deps, config }
    }

    /// Replace every global and per-broadcaster filter match with
    /// `(filtered)`, case-insensitively.
    pub fn filter_text(&self, settings: &UserSettings, text: &str) -> String {
        let patterns = self
            .config
            .global_filters
            .iter()
            .map(String::as_str)
            .chain(settings.filters.split(','))
            .map(str::trim)
            .filter(|p| !p.is_empty());

        let mut out = text.to_string();
        for pattern in patterns {
            match Regex::new(&format!("(?i){pattern}")) {
                Ok(re) => out = re.replace_all(&out, FILTERED).into_owned(),
                Err(e) => warn!(pattern, error = %e, "invalid filter pattern"),
            }
        }
        out
    }

    pub async fn tts(&self, text: &str, voice_reference: &[u8]) -> Result<Speech, TtsError> {
        self.deps.tts.tts(text, voice_reference).await
    }

    /// Cut `audio` down to the broadcaster's TTS limit. Probe or cut failures
    /// keep the original.
    pub async fn cut_tts_audio(&self, settings: &UserSettings, audio: Vec<u8>) -> Vec<u8> {
        let limit = Duration::from_secs(settings.tts_limit_secs());
        let len = match self.deps.audio.probe_duration(&audio).await {
            Ok(len) => len,
            Err(e) => {
                warn!(error = %e, "failed to probe audio for TTS limit");
                return audio;
            }
        };
        if len <= limit {
            return audio;
        }

        debug!(?len, ?limit, "cutting TTS audio to limit");
        match self.deps.audio.cut(&audio, limit).await {
            Ok(cut) => cut,
            Err(e) => {
                warn!(error = %e, "failed to cut audio, using original");
                audio
            }
        }
    }

    /// Apply a filter chain after capping it.
    pub async fn apply_audio_effects(
        &self,
        audio: &[u8],
        filters: &[String],
    ) -> Result<Vec<u8>, AudioError> {
        if filters.is_empty() {
            return Ok(audio.to_vec());
        }
        self.deps
            .audio
            .apply_filters(audio, &limit_filters(filters))
            .await
    }

    /// Normalize `speech` to mp3, enforce the TTS limit and start playing it
    /// as `text`.
    pub async fn play_tts(
        &self,
        scope: &CancelScope,
        input: &InteractionInput,
        sink: &Arc<dyn EventSink>,
        text: &str,
        speech: Speech,
    ) -> Result<Playback, HandlerError> {
        let audio = match self.deps.audio.to_mp3(&speech.audio).await {
            Ok(mp3) => mp3,
            Err(e) => {
                error!(msg_id = %input.msg_id, error = %e, "failed to convert audio to mp3");
                speech.audio
            }
        };
        let audio = self.cut_tts_audio(&input.settings, audio).await;
        let duration = self.deps.audio.probe_duration(&audio).await?;

        Ok(playback::spawn(
            Cue {
                msg_id: input.msg_id,
                text: text.to_string(),
                audio,
                duration,
                timings: speech.timings,
            },
            sink.clone(),
            input.state.clone(),
            scope.clone(),
            self.config.playback_tick(),
        ))
    }

    // ── Universal ──

    /// Parse universal markup against the known voices, filters and sound
    /// effects, keeping at most `max_sfx_count` effects (0 = unlimited).
    pub async fn parse_universal(
        &self,
        text: &str,
        settings: &UserSettings,
    ) -> Result<Vec<Action>, StoreError> {
        let voices: HashSet<String> = self.deps.store.voice_short_names().await?.into_iter().collect();
        let sfx = &self.deps.sfx;

        let actions = dsl::parse_message(
            text,
            |v| voices.contains(v.trim()),
            |f| FilterKind::from_name(f).is_some(),
            |s| sfx.contains(s),
        );

        let max_sfx = settings.max_sfx_count();
        let mut sfx_count = 0;
        Ok(actions
            .into_iter()
            .filter(|action| {
                if !action.is_sfx() || max_sfx == 0 {
                    return true;
                }
                sfx_count += 1;
                sfx_count <= max_sfx
            })
            .collect())
    }

    async fn voice_reference(&self, voice: &str) -> Vec<u8> {
        match self.deps.store.get_voice_by_short_name(voice).await {
            Ok(card) => card.voice_reference,
            Err(e) => {
                error!(voice, error = %e, "failed to get voice reference");
                Vec::new()
            }
        }
    }

    /// Synthesize and join every action into one clip, within the duration
    /// and sound-effect budgets.
    pub async fn craft_universal(
        &self,
        actions: &[Action],
        settings: &UserSettings,
    ) -> Result<UniversalClip, HandlerError> {
        let padding = self.config.concat_padding();
        let max_duration = Duration::from_secs(settings.tts_limit_secs());
        let max_sfx_duration = Duration::from_secs(settings.sfx_total_limit_secs());

        let mut clips = Vec::new();
        let mut text_parts: Vec<String> = Vec::new();
        let mut timings: Vec<Timing> = Vec::new();
        let mut offset = Duration::ZERO;
        let mut sfx_used = Duration::ZERO;

        for action in actions {
            if !action.text.is_empty() && action.text != " " {
                let voice = if action.voice.is_empty() {
                    self.config.default_voice.as_str()
                } else {
                    action.voice.as_str()
                };
                let voice_ref = self.voice_reference(voice).await;

                let speech = match self.tts(&action.text, &voice_ref).await {
                    Ok(speech) => speech,
                    Err(e) => {
                        error!(voice, error = %e, "TTS failed for universal action");
                        continue;
                    }
                };

                let original_len = match self.deps.audio.probe_duration(&speech.audio).await {
                    Ok(len) => len,
                    Err(e) => {
                        error!(error = %e, "failed to probe universal clip");
                        continue;
                    }
                };
                let processed = match self.apply_audio_effects(&speech.audio, &action.filters).await {
                    Ok(audio) => audio,
                    Err(e) => {
                        error!(filters = ?action.filters, error = %e, "failed to apply audio effects");
                        speech.audio.clone()
                    }
                };
                let processed_len = match self.deps.audio.probe_duration(&processed).await {
                    Ok(len) => len,
                    Err(e) => {
                        error!(error = %e, "failed to probe processed clip");
                        continue;
                    }
                };

                let mut clip_timings = speech.timings;
                if !original_len.is_zero() {
                    let ratio = processed_len.as_secs_f64() / original_len.as_secs_f64();
                    if (ratio - 1.0).abs() > RESCALE_TOLERANCE {
                        clip_timings = clip_timings.into_iter().map(|t| t.scaled(ratio)).collect();
                    }
                }

                clips.push(processed);
                text_parts.push(action.text.clone());
                timings.extend(clip_timings.into_iter().map(|t| t.shifted(offset)));

                offset = offset.saturating_add(processed_len).saturating_add(padding);
                if offset > max_duration {
                    info!(?offset, ?max_duration, "universal clip reached length limit");
                    break;
                }
            }

            if action.is_sfx() {
                let sfx_audio = match self.deps.sfx.load(&action.sfx).await {
                    Ok(audio) => audio,
                    Err(e) => {
                        error!(sfx = %action.sfx, error = %e, "failed to load sound effect");
                        text_parts.push(format!("[{}]", action.sfx));
                        continue;
                    }
                };
                let mut processed = match self.apply_audio_effects(&sfx_audio, &action.filters).await {
                    Ok(audio) => audio,
                    Err(e) => {
                        error!(filters = ?action.filters, error = %e, "failed to apply effects to sound effect");
                        sfx_audio
                    }
                };
                let mut sfx_len = match self.deps.audio.probe_duration(&processed).await {
                    Ok(len) => len,
                    Err(e) => {
                        error!(error = %e, "failed to probe sound effect");
                        continue;
                    }
                };

                if !max_sfx_duration.is_zero() && sfx_used.saturating_add(sfx_len) > max_sfx_duration {
                    let remaining = max_sfx_duration.saturating_sub(sfx_used);
                    if remaining.is_zero() {
                        info!(sfx = %action.sfx, "sound effect budget exhausted, skipping");
                        continue;
                    }
                    match self.deps.audio.cut(&processed, remaining).await {
                        Ok(cut) => {
                            processed = cut;
                            sfx_len = remaining;
                        }
                        Err(e) => {
                            warn!(sfx = %action.sfx, error = %e, "failed to cut sound effect to budget, skipping");
                            continue;
                        }
                    }
                }

                clips.push(processed);
                text_parts.push(format!("[{}]", action.sfx));
                sfx_used = sfx_used.saturating_add(sfx_len);
                offset = offset.saturating_add(sfx_len);
                if offset > max_duration {
                    info!(?offset, ?max_duration, "universal clip reached length limit");
                    break;
                }
            }
        }

        if clips.is_empty() {
            return Err(HandlerError::NoAudio);
        }

        let timings = timings.into_iter().map(|t| t.clamped(max_duration)).collect();
        let audio = self.deps.audio.concatenate(padding, clips).await?;
        Ok(UniversalClip {
            text: text_parts.join(" "),
            speech: Speech { audio, timings },
        })
    }
}
