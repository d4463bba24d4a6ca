//! HTTP client for a voice-cloning TTS server.
//!
//! `POST {url}/tts` with `{text, voice_reference}` (base64) returns
//! `{audio, timings}` where timings are seconds as floats.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Speech, Timing, TtsEngine, TtsError};
use crate::config::TtsConfig;

#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    voice_reference: String,
}

#[derive(Debug, Deserialize)]
struct WireTiming {
    text: String,
    start: f64,
    end: f64,
}

#[derive(Debug, Deserialize)]
struct TtsResponse {
    audio: String,
    #[serde(default)]
    timings: Vec<WireTiming>,
}

impl TtsResponse {
    fn into_speech(self) -> Result<Speech, TtsError> {
        let audio = STANDARD
            .decode(self.audio.trim())
            .map_err(|e| TtsError::InvalidResponse(format!("audio is not base64: {e}")))?;
        let timings = self
            .timings
            .into_iter()
            .map(|t| Timing {
                text: t.text,
                start: secs(t.start),
                end: secs(t.end),
            })
            .collect();
        Ok(Speech { audio, timings })
    }
}

/// Seconds from the wire. Negative or non-finite values become zero, values
/// too large for a `Duration` saturate.
fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone)]
pub struct HttpTtsClient {
    http: Client,
    url: String,
}

impl HttpTtsClient {
    pub fn new(config: &TtsConfig) -> Self {
        Self {
            http: Client::new(),
            url: config.url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TtsEngine for HttpTtsClient {
    async fn tts(&self, text: &str, voice_reference: &[u8]) -> Result<Speech, TtsError> {
        let body = TtsRequest {
            text,
            voice_reference: STANDARD.encode(voice_reference),
        };

        let response = self
            .http
            .post(format!("{}/tts", self.url))
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            let message = response.text().await.unwrap_or_else(|_| "(no body)".into());
            return Err(TtsError::Api { status, message });
        }

        let resp: TtsResponse = response
            .json()
            .await
            .map_err(|e| TtsError::InvalidResponse(format!("failed to parse response: {e}")))?;
        resp.into_speech()
    }
}
