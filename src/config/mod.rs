//! Runtime configuration: one YAML file, every section defaulted.
//!
//! `AppConfig::load(path)` reads the file, then applies env overrides.
//! An empty file is a valid config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Env var that overrides `llm.access_token`.
pub const LLM_TOKEN_ENV: &str = "AVATARCAST_LLM_TOKEN";

/// Errors from loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// An OpenAI-compatible completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub access_token: String,
    pub model: String,
    pub max_tokens: u32,
    pub min_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".into(),
            access_token: String::new(),
            model: String::new(),
            max_tokens: 256,
            min_tokens: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub url: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8001".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    /// Scratch directory; the system temp dir when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmp_dir: Option<PathBuf>,
    /// Directory of background loops used by filters 20 and up.
    pub background_dir: PathBuf,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".into(),
            ffprobe_bin: "ffprobe".into(),
            tmp_dir: None,
            background_dir: PathBuf::from("assets/backgrounds"),
        }
    }
}

/// Delivery and supervision knobs for the connection manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub write_attempts: u32,
    pub write_backoff_ms: u64,
    pub subscriber_buffer: usize,
    pub control_buffer: usize,
    pub no_user_retry_ms: u64,
    pub error_retry_ms: u64,
    pub pace_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            write_attempts: 5,
            write_backoff_ms: 50,
            subscriber_buffer: 16,
            control_buffer: 16,
            no_user_retry_ms: 2000,
            error_retry_ms: 10_000,
            pace_ms: 1000,
        }
    }
}

impl ManagerConfig {
    pub fn write_backoff(&self) -> Duration {
        Duration::from_millis(self.write_backoff_ms)
    }

    pub fn no_user_retry(&self) -> Duration {
        Duration::from_millis(self.no_user_retry_ms)
    }

    pub fn error_retry(&self) -> Duration {
        Duration::from_millis(self.error_retry_ms)
    }

    pub fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_ms)
    }
}

/// Timing and content knobs for processors and handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub queue_poll_ms: u64,
    pub playback_tick_ms: u64,
    /// Pause between the request and response utterances of an AI reply.
    pub response_gap_ms: u64,
    /// Silence inserted between universal segments.
    pub concat_padding_ms: u64,
    pub default_voice: String,
    pub max_agentic_turns: usize,
    /// Transcript entries shown to the next-speaker selector.
    pub transcript_window: usize,
    /// Accept any token for the "current message" controls when the
    /// broadcaster has not set one.
    pub allow_empty_control_token: bool,
    /// Patterns filtered for every broadcaster.
    pub global_filters: Vec<String>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            queue_poll_ms: 1000,
            playback_tick_ms: 100,
            response_gap_ms: 1000,
            concat_padding_ms: 500,
            default_voice: "obiwan".into(),
            max_agentic_turns: 20,
            transcript_window: 12,
            allow_empty_control_token: true,
            global_filters: Vec::new(),
        }
    }
}

impl ProcessorConfig {
    pub fn queue_poll(&self) -> Duration {
        Duration::from_millis(self.queue_poll_ms)
    }

    pub fn playback_tick(&self) -> Duration {
        Duration::from_millis(self.playback_tick_ms)
    }

    pub fn response_gap(&self) -> Duration {
        Duration::from_millis(self.response_gap_ms)
    }

    pub fn concat_padding(&self) -> Duration {
        Duration::from_millis(self.concat_padding_ms)
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub llm: LlmConfig,
    /// Vision model for image analysis; image analysis is off without it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision_llm: Option<LlmConfig>,
    pub tts: TtsConfig,
    pub ffmpeg: FfmpegConfig,
    pub sfx_dir: PathBuf,
    pub manager: ManagerConfig,
    pub processor: ProcessorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            vision_llm: None,
            tts: TtsConfig::default(),
            ffmpeg: FfmpegConfig::default(),
            sfx_dir: PathBuf::from("assets/sfx"),
            manager: ManagerConfig::default(),
            processor: ProcessorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from a YAML file and apply env overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml(&content)?;
        if let Ok(token) = std::env::var(LLM_TOKEN_ENV) {
            config.apply_token_override(token);
        }
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    fn apply_token_override(&mut self, token: String) {
        if token.is_empty() {
            return;
        }
        self.llm.access_token = token;
    }
}
