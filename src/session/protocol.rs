//! Wire message types for the live voice endpoint
//!
//! JSON messages exchanged over the WebSocket transport:
//!
//! 1. Send `session.setup` with model/voice/prompt and audio formats
//! 2. Receive `session.ready` once the endpoint accepts the setup
//! 3. Stream audio via `input_audio.append` (base64 PCM16, little-endian)
//! 4. Receive `transcript.delta` / `audio.delta` fragments per turn
//! 5. Receive `turn.complete` or `turn.interrupted` closing the open turns

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::sink::Role;

/// Setup parameters sent once after the transport opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupParams {
    pub model: String,
    pub voice: String,

    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub instructions: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Always "pcm16" for raw PCM frames.
    pub input_audio_format: String,

    pub input_sample_rate: u32,
    pub output_sample_rate: u32,

    /// "active" or "passive" response policy.
    pub interaction_mode: String,
}

/// Error information from the endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type", default)]
    pub error_type: String,

    #[serde(default)]
    pub code: Option<String>,

    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Client Messages (sent TO the endpoint)
// ============================================================================

/// Messages sent from the engine to the endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Configure the session right after connecting
    #[serde(rename = "session.setup")]
    Setup { session: SetupParams },

    /// Append captured audio to the input stream
    #[serde(rename = "input_audio.append")]
    AudioAppend {
        /// Base64-encoded PCM16 audio data
        audio: String,
    },

    /// Inject a typed user message into the conversation
    #[serde(rename = "input_text.send")]
    TextInput { text: String },
}

impl ClientMessage {
    /// Build the setup message from a session config.
    pub fn setup(config: &SessionConfig) -> Self {
        let mode = match config.interaction_mode {
            crate::config::InteractionMode::Passive => "passive",
            crate::config::InteractionMode::Active => "active",
        };

        Self::Setup {
            session: SetupParams {
                model: config.model.clone(),
                voice: config.voice.clone(),
                instructions: config.system_prompt.clone(),
                language: config.language.clone(),
                input_audio_format: "pcm16".to_string(),
                input_sample_rate: config.target_sample_rate,
                output_sample_rate: config.playback_sample_rate,
                interaction_mode: mode.to_string(),
            },
        }
    }

    /// Create an audio append message from raw PCM16 samples.
    pub fn audio_append(samples: &[i16]) -> Self {
        // Convert samples to bytes (little-endian)
        let bytes: Vec<u8> = samples.iter().flat_map(|&s| s.to_le_bytes()).collect();

        Self::AudioAppend {
            audio: STANDARD.encode(&bytes),
        }
    }

    pub fn text_input(text: &str) -> Self {
        Self::TextInput {
            text: text.to_string(),
        }
    }
}

// ============================================================================
// Server Messages (received FROM the endpoint)
// ============================================================================

/// Messages received from the endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Setup was accepted; streaming may begin
    #[serde(rename = "session.ready")]
    SessionReady {
        #[serde(default)]
        id: Option<String>,
    },

    /// Incremental transcript text for one role's open turn
    #[serde(rename = "transcript.delta")]
    TranscriptDelta { role: Role, delta: String },

    /// A chunk of synthesized model audio
    #[serde(rename = "audio.delta")]
    AudioDelta {
        /// Base64-encoded PCM16 audio data
        audio: String,
    },

    /// The open turns are complete
    #[serde(rename = "turn.complete")]
    TurnComplete,

    /// The model's in-progress turn was cut off
    #[serde(rename = "turn.interrupted")]
    Interrupted,

    /// An error occurred
    #[serde(rename = "error")]
    Error { error: ErrorInfo },

    /// Catch-all for message types we don't handle.
    /// This prevents deserialization failures for unknown types.
    #[serde(other)]
    Unknown,
}

/// Decode a base64 PCM16 payload into samples (little-endian).
pub fn decode_audio(payload: &str) -> Result<Vec<i16>, String> {
    let bytes = STANDARD.decode(payload).map_err(|e| e.to_string())?;
    if bytes.len() % 2 != 0 {
        return Err(format!("odd PCM16 payload length {}", bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}
