//! Audio capture, processing, and artifact modules
//!
//! Capture uses CPAL; WAV artifacts are written with hound. All sample
//! processing between the device and the wire happens on normalized `f32`
//! buffers and is converted to 16-bit PCM only at the transport boundary.

pub mod artifacts;
pub mod capture;
pub mod level;
pub mod pipeline;
pub mod playback;

pub use artifacts::SessionRecorder;
pub use capture::{CaptureBlockSender, CaptureHandle, CaptureSource, CpalCapture};
pub use level::LevelMeter;
pub use playback::PlaybackQueue;

/// Errors that can occur in the audio subsystem.
#[derive(Debug, Clone)]
pub enum AudioError {
    NoInputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
    FileCreationFailed(String),
    WriteFailed(String),
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::NoInputDevice => write!(f, "No audio input device found"),
            AudioError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            AudioError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            AudioError::FileCreationFailed(e) => write!(f, "Failed to create WAV file: {}", e),
            AudioError::WriteFailed(e) => write!(f, "Failed to write audio data: {}", e),
        }
    }
}

impl std::error::Error for AudioError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_error_display_includes_detail() {
        let err = AudioError::StreamCreationFailed("device busy".to_string());
        assert!(err.to_string().contains("device busy"));

        let err = AudioError::NoInputDevice;
        assert!(err.to_string().contains("input device"));
    }
}
