//! WAV artifacts: per-turn audio and the full-session recording
//!
//! Artifacts are stored in: ~/.local/share/voicelink/sessions/
//! (or the directory configured in `SessionConfig::artifacts_dir`).

use std::collections::VecDeque;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{WavSpec, WavWriter};
use uuid::Uuid;

use super::{pipeline, AudioError};
use crate::sink::Role;

/// Full-session recordings kept on disk by the cleanup pass.
const MAX_SESSION_RECORDINGS: usize = 10;

/// Resolve (and create) the artifacts directory.
pub fn artifacts_dir(override_dir: Option<&Path>) -> std::io::Result<PathBuf> {
    let dir = match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voicelink")
            .join("sessions"),
    };
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn timestamp() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

fn wav_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Encode one finalized turn's audio as a mono 16-bit WAV file.
///
/// User turns are written at the capture rate, model turns at the playback
/// rate; the caller passes whichever applies.
pub fn encode_turn_wav(
    dir: &Path,
    role: Role,
    turn_id: Uuid,
    samples: &[i16],
    sample_rate: u32,
) -> Result<PathBuf, AudioError> {
    let filename = format!("turn_{}_{}_{}.wav", timestamp(), role.as_str(), turn_id);
    let path = dir.join(filename);

    let mut writer = WavWriter::create(&path, wav_spec(sample_rate))
        .map_err(|e| AudioError::FileCreationFailed(e.to_string()))?;

    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| AudioError::WriteFailed(e.to_string()))?;
    }

    writer
        .finalize()
        .map_err(|e| AudioError::WriteFailed(e.to_string()))?;

    Ok(path)
}

/// Continuous recording of the whole conversation.
///
/// Capture blocks drive the write cadence; inbound model audio is resampled
/// to the capture rate, buffered, and mixed into the next blocks. The
/// recording spans reconnects and is finalized exactly once at session end.
pub struct SessionRecorder {
    writer: Option<WavWriter<BufWriter<fs::File>>>,
    path: PathBuf,
    sample_rate: u32,
    playback_rate: u32,
    pending_model: VecDeque<f32>,
}

impl SessionRecorder {
    /// Open a new recording in `dir` at the capture sample rate.
    pub fn create(dir: &Path, sample_rate: u32, playback_rate: u32) -> Result<Self, AudioError> {
        let filename = format!("session_{}_{}.wav", timestamp(), Uuid::new_v4());
        let path = dir.join(filename);

        let writer = WavWriter::create(&path, wav_spec(sample_rate))
            .map_err(|e| AudioError::FileCreationFailed(e.to_string()))?;

        log::info!("Session recording started: {:?}", path);

        Ok(Self {
            writer: Some(writer),
            path,
            sample_rate,
            playback_rate,
            pending_model: VecDeque::new(),
        })
    }

    /// Queue inbound model audio for mixing into upcoming capture blocks.
    pub fn push_model(&mut self, pcm: &[i16]) {
        let floats = pipeline::pcm16_to_f32(pcm);
        let resampled = pipeline::downsample(&floats, self.playback_rate, self.sample_rate);
        self.pending_model.extend(resampled);
    }

    /// Write one capture block, mixed with any pending model audio.
    pub fn write_block(&mut self, capture: &[f32]) -> Result<(), AudioError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };

        let model: Vec<f32> = {
            let take = capture.len().min(self.pending_model.len());
            self.pending_model.drain(..take).collect()
        };
        let mixed = pipeline::mix(capture, &model);

        for sample in pipeline::to_pcm16(&mixed) {
            writer
                .write_sample(sample)
                .map_err(|e| AudioError::WriteFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Flush leftover model audio and close the file. Idempotent; returns
    /// the recording path on the first call only.
    pub fn finalize(&mut self) -> Option<PathBuf> {
        let mut writer = self.writer.take()?;

        // Model audio that never overlapped a capture block still belongs in
        // the recording; write it against silence.
        let tail: Vec<f32> = self.pending_model.drain(..).collect();
        if !tail.is_empty() {
            let mixed = pipeline::mix(&[], &tail);
            for sample in pipeline::to_pcm16(&mixed) {
                if writer.write_sample(sample).is_err() {
                    log::warn!("Failed to flush session recording tail");
                    break;
                }
            }
        }

        if let Err(e) = writer.finalize() {
            log::warn!("Failed to finalize session recording: {}", e);
            return None;
        }

        log::info!("Session recording finalized: {:?}", self.path);
        Some(self.path.clone())
    }
}

/// Clean up old session recordings, keeping only the most recent N files.
pub fn cleanup_old_sessions(dir: &Path) -> std::io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            let path = e.path();
            path.extension().map(|ext| ext == "wav").unwrap_or(false)
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("session_"))
                    .unwrap_or(false)
        })
        .collect();

    if entries.len() <= MAX_SESSION_RECORDINGS {
        return Ok(0);
    }

    // Sort by modified time (oldest first)
    entries.sort_by(|a, b| {
        let time_a = a.metadata().and_then(|m| m.modified()).ok();
        let time_b = b.metadata().and_then(|m| m.modified()).ok();
        time_a.cmp(&time_b)
    });

    let to_delete = entries.len() - MAX_SESSION_RECORDINGS;
    let mut deleted = 0;

    for entry in entries.into_iter().take(to_delete) {
        if fs::remove_file(entry.path()).is_ok() {
            log::debug!("Cleaned up old session recording: {:?}", entry.path());
            deleted += 1;
        }
    }

    Ok(deleted)
}
