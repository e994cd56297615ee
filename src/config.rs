//! Session configuration
//!
//! A `SessionConfig` describes everything one connection attempt needs: the
//! endpoint and credentials, audio formats, voice/response selection, and the
//! noise-gate threshold. The engine clones the config wholesale into each
//! attempt; reconnects reuse the last config that was handed to `connect()`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default sample rate for outbound (captured) audio in Hz.
pub const DEFAULT_TARGET_SAMPLE_RATE: u32 = 16_000;

/// Default sample rate for inbound (model) audio in Hz.
pub const DEFAULT_PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Default RMS threshold below which captured audio is gated to silence.
pub const DEFAULT_NOISE_GATE_RMS: f32 = 0.002;

/// Default cap on automatic reconnection attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Response policy requested from the remote endpoint.
///
/// Forwarded opaquely in the setup message; the endpoint owns the actual
/// behavior difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionMode {
    /// Transcribe and listen, but do not volunteer spoken responses.
    Passive,
    /// Respond actively to completed user turns.
    Active,
}

/// Configuration for one live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// API key sent as a bearer credential during the transport handshake.
    pub api_key: String,

    /// WebSocket endpoint URL (`wss://...`).
    pub endpoint: String,

    /// Model identifier forwarded in the setup message.
    pub model: String,

    /// Voice selection forwarded in the setup message.
    pub voice: String,

    /// System prompt text. Treated as an opaque string to forward.
    pub system_prompt: String,

    /// Optional language hint (BCP-47 tag).
    pub language: Option<String>,

    /// Input device name, or `None` for the system default microphone.
    pub input_device: Option<String>,

    /// When enabled, a system-audio (loopback) source is mixed into the
    /// microphone stream. Failure to acquire it degrades to microphone-only.
    pub capture_system_audio: bool,

    /// Sample rate outbound audio is resampled to before transmission.
    pub target_sample_rate: u32,

    /// Sample rate of inbound model audio.
    pub playback_sample_rate: u32,

    /// RMS threshold for the voice gate. Blocks quieter than this are sent
    /// as silence of identical length, preserving cadence.
    pub noise_gate_rms: f32,

    /// Response policy requested from the endpoint.
    pub interaction_mode: InteractionMode,

    /// Cap on automatic reconnection attempts after an unexpected close.
    pub max_retries: u32,

    /// Directory for turn and session audio artifacts, or `None` for the
    /// per-user data directory.
    pub artifacts_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: String::new(),
            model: "default".to_string(),
            voice: "default".to_string(),
            system_prompt: String::new(),
            language: None,
            input_device: None,
            capture_system_audio: false,
            target_sample_rate: DEFAULT_TARGET_SAMPLE_RATE,
            playback_sample_rate: DEFAULT_PLAYBACK_SAMPLE_RATE,
            noise_gate_rms: DEFAULT_NOISE_GATE_RMS,
            interaction_mode: InteractionMode::Active,
            max_retries: DEFAULT_MAX_RETRIES,
            artifacts_dir: None,
        }
    }
}

impl SessionConfig {
    /// Build a config from the environment.
    ///
    /// Reads `VOICELINK_API_KEY` and `VOICELINK_ENDPOINT` (a `.env` file is
    /// loaded first when present); every other field keeps its default.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            api_key: std::env::var("VOICELINK_API_KEY").unwrap_or_default(),
            endpoint: std::env::var("VOICELINK_ENDPOINT").unwrap_or_default(),
            ..Self::default()
        }
    }

    /// Validate required fields before a connection attempt.
    ///
    /// Checked once at `connect()` entry so misconfiguration surfaces
    /// immediately instead of deep in the pipeline.
    pub fn validate(&self) -> Result<(), String> {
        if self.api_key.trim().is_empty() {
            return Err("API key is not configured".to_string());
        }
        if self.endpoint.trim().is_empty() {
            return Err("endpoint URL is not configured".to_string());
        }
        if self.target_sample_rate == 0 {
            return Err("target sample rate must be non-zero".to_string());
        }
        Ok(())
    }
}
