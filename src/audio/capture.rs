//! Microphone and system-audio capture using CPAL
//!
//! Capture runs on a dedicated thread that owns the CPAL streams; each device
//! callback folds the frame to mono `f32` and forwards it over a bounded
//! channel with `try_send`. The callback never blocks, never awaits, and
//! never panics across the FFI boundary; a full channel drops the block with
//! a log line instead of stalling the device.
//!
//! When system-audio capture is enabled, a second input stream (a loopback
//! "monitor" source) feeds a merge buffer; the microphone callback drains it
//! and emits one combined stream. Failure to acquire the secondary source is
//! non-fatal: the session degrades to microphone-only.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::AudioError;
use crate::config::SessionConfig;

/// Sender for mono `f32` capture blocks at the device's native rate.
pub type CaptureBlockSender = mpsc::Sender<Vec<f32>>;

/// How long to wait for the capture thread to report stream creation.
const CAPTURE_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on buffered system-audio samples awaiting the next mic block
/// (~500ms at 48kHz). Oldest samples are dropped beyond this.
const MERGE_BUFFER_CAP: usize = 24_000;

/// Source of capture blocks for a session.
///
/// The production implementation acquires CPAL devices; tests substitute a
/// scripted source that feeds blocks from a channel.
pub trait CaptureSource: Send + Sync + 'static {
    /// Acquire the device(s) and start delivering blocks to `tx`.
    fn start(
        &self,
        config: &SessionConfig,
        tx: CaptureBlockSender,
    ) -> Result<Box<dyn CaptureHandle>, AudioError>;
}

/// Handle to live capture. Dropping it releases every acquired OS stream.
pub trait CaptureHandle: Send {
    /// Native sample rate of the delivered blocks.
    fn sample_rate(&self) -> u32;
}

/// Merge point for the optional secondary (system-audio) source.
///
/// The system-audio callback appends samples; the microphone callback drains
/// matching sample counts and averages them in. The microphone drives the
/// block cadence, so a stalled secondary source only ever contributes
/// silence.
struct MixerGraph {
    pending: Mutex<VecDeque<f32>>,
}

impl MixerGraph {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(VecDeque::with_capacity(MERGE_BUFFER_CAP)),
        })
    }

    fn push_secondary(&self, samples: &[f32]) {
        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        let overflow = (pending.len() + samples.len()).saturating_sub(MERGE_BUFFER_CAP);
        if overflow > 0 {
            let drain_len = overflow.min(pending.len());
            pending.drain(0..drain_len);
        }
        pending.extend(samples);
    }

    fn merge_into(&self, block: &mut [f32]) {
        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        for sample in block.iter_mut() {
            match pending.pop_front() {
                Some(sys) => *sample = (*sample + sys) * 0.5,
                None => break,
            }
        }
    }
}

/// CPAL-backed capture source.
pub struct CpalCapture;

impl CpalCapture {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpalCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for CpalCapture {
    fn start(
        &self,
        config: &SessionConfig,
        tx: CaptureBlockSender,
    ) -> Result<Box<dyn CaptureHandle>, AudioError> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let config = config.clone();

        // CPAL streams are not guaranteed Send, so they live on a dedicated
        // thread for the duration of the session.
        let join = std::thread::Builder::new()
            .name("voicelink-capture".to_string())
            .spawn(move || match build_streams(&config, tx) {
                Ok((streams, sample_rate)) => {
                    let _ = ready_tx.send(Ok(sample_rate));
                    // Parked until the handle drops its sender.
                    let _ = stop_rx.recv();
                    drop(streams);
                    log::debug!("Capture thread exiting, streams released");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

        match ready_rx.recv_timeout(CAPTURE_START_TIMEOUT) {
            Ok(Ok(sample_rate)) => Ok(Box::new(CpalCaptureHandle {
                stop: Some(stop_tx),
                join: Some(join),
                sample_rate,
            })),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => Err(AudioError::StreamCreationFailed(
                "capture thread did not start in time".to_string(),
            )),
        }
    }
}

/// Handle for CPAL capture; dropping stops the capture thread and joins it.
struct CpalCaptureHandle {
    stop: Option<std::sync::mpsc::Sender<()>>,
    join: Option<std::thread::JoinHandle<()>>,
    sample_rate: u32,
}

impl CaptureHandle for CpalCaptureHandle {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CpalCaptureHandle {
    fn drop(&mut self) {
        // Dropping the sender unblocks the capture thread's recv().
        drop(self.stop.take());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Build the microphone stream, and the system-audio stream when requested.
/// Returns the streams plus the microphone's native sample rate.
fn build_streams(
    config: &SessionConfig,
    tx: CaptureBlockSender,
) -> Result<(Vec<Stream>, u32), AudioError> {
    let host = cpal::default_host();

    let mic = select_input_device(&host, config.input_device.as_deref())?;
    log::info!("Using audio input device: {:?}", mic.name());

    let supported = mic
        .default_input_config()
        .map_err(|_| AudioError::NoSupportedConfig)?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels();
    let sample_format = supported.sample_format();
    let stream_config: StreamConfig = supported.into();

    log::info!(
        "Audio config: {} Hz, {} channels, {:?}",
        sample_rate,
        channels,
        sample_format
    );

    let mut streams = Vec::with_capacity(2);

    let mixer = if config.capture_system_audio {
        match build_system_stream(&host, sample_rate) {
            Ok((stream, mixer)) => {
                streams.push(stream);
                Some(mixer)
            }
            Err(e) => {
                // Secondary source failure must not abort the microphone.
                log::warn!("System audio unavailable, using microphone only: {}", e);
                None
            }
        }
    } else {
        None
    };

    let mic_stream = build_input_stream(
        &mic,
        &stream_config,
        sample_format,
        channels,
        move |block: Vec<f32>| {
            let mut block = block;
            if let Some(mixer) = mixer.as_ref() {
                mixer.merge_into(&mut block);
            }
            if tx.try_send(block).is_err() {
                log::debug!("Capture channel full, dropping block");
            }
        },
    )?;

    mic_stream
        .play()
        .map_err(|e| AudioError::StreamCreationFailed(format!("Failed to start stream: {}", e)))?;
    streams.push(mic_stream);

    Ok((streams, sample_rate))
}

/// Pick the configured input device by name, or the host default.
fn select_input_device(host: &cpal::Host, name: Option<&str>) -> Result<Device, AudioError> {
    if let Some(wanted) = name {
        let devices = host
            .input_devices()
            .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;
        for device in devices {
            if device.name().map(|n| n == wanted).unwrap_or(false) {
                return Ok(device);
            }
        }
        log::warn!("Input device {:?} not found, falling back to default", wanted);
    }

    host.default_input_device().ok_or(AudioError::NoInputDevice)
}

/// Acquire a loopback ("monitor") input for system audio and wire it into a
/// fresh mixer graph.
fn build_system_stream(
    host: &cpal::Host,
    mic_rate: u32,
) -> Result<(Stream, Arc<MixerGraph>), AudioError> {
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

    let device = devices
        .into_iter()
        .find(|d| {
            d.name()
                .map(|n| n.to_lowercase().contains("monitor"))
                .unwrap_or(false)
        })
        .ok_or(AudioError::NoInputDevice)?;

    log::info!("Using system audio source: {:?}", device.name());

    let supported = device
        .default_input_config()
        .map_err(|_| AudioError::NoSupportedConfig)?;
    if supported.sample_rate().0 != mic_rate {
        // Keeping both sources at one rate keeps the merge sample-aligned.
        return Err(AudioError::StreamCreationFailed(format!(
            "system audio rate {} does not match microphone rate {}",
            supported.sample_rate().0,
            mic_rate
        )));
    }

    let channels = supported.channels();
    let sample_format = supported.sample_format();
    let stream_config: StreamConfig = supported.into();

    let mixer = MixerGraph::new();
    let mixer_for_callback = mixer.clone();

    let stream = build_input_stream(
        &device,
        &stream_config,
        sample_format,
        channels,
        move |block: Vec<f32>| {
            mixer_for_callback.push_secondary(&block);
        },
    )?;

    stream
        .play()
        .map_err(|e| AudioError::StreamCreationFailed(format!("Failed to start stream: {}", e)))?;

    Ok((stream, mixer))
}

/// Build an input stream for whatever sample format the device offers,
/// folding interleaved frames to mono `f32` before handing them to `on_block`.
fn build_input_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    channels: u16,
    on_block: impl FnMut(Vec<f32>) + Send + 'static,
) -> Result<Stream, AudioError> {
    match sample_format {
        SampleFormat::I16 => {
            build_input_stream_typed::<i16>(device, config, channels, on_block, |s| {
                s as f32 / 0x8000 as f32
            })
        }
        SampleFormat::U16 => {
            build_input_stream_typed::<u16>(device, config, channels, on_block, |s| {
                (s as f32 - 0x8000 as f32) / 0x8000 as f32
            })
        }
        SampleFormat::F32 => {
            build_input_stream_typed::<f32>(device, config, channels, on_block, |s| s)
        }
        _ => Err(AudioError::NoSupportedConfig),
    }
}

fn build_input_stream_typed<T>(
    device: &Device,
    config: &StreamConfig,
    channels: u16,
    mut on_block: impl FnMut(Vec<f32>) + Send + 'static,
    convert: impl Fn(T) -> f32 + Send + 'static,
) -> Result<Stream, AudioError>
where
    T: cpal::SizedSample + Send + 'static,
{
    let err_fn = |err| log::error!("Audio stream error: {}", err);
    let channels = channels.max(1) as usize;

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mut block = Vec::with_capacity(data.len() / channels);
                for frame in data.chunks(channels) {
                    let sum: f32 = frame.iter().map(|&s| convert(s)).sum();
                    block.push(sum / frame.len() as f32);
                }
                on_block(block);
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixer_averages_pending_secondary_samples() {
        let mixer = MixerGraph::new();
        mixer.push_secondary(&[0.2, 0.2]);

        let mut block = vec![0.4, 0.4, 0.4];
        mixer.merge_into(&mut block);

        assert!((block[0] - 0.3).abs() < 1e-6);
        assert!((block[1] - 0.3).abs() < 1e-6);
        // No secondary sample left for the third slot.
        assert!((block[2] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn mixer_drops_oldest_beyond_capacity() {
        let mixer = MixerGraph::new();
        mixer.push_secondary(&vec![0.1; MERGE_BUFFER_CAP]);
        mixer.push_secondary(&[0.9, 0.9]);

        let pending = mixer.pending.lock().unwrap();
        assert_eq!(pending.len(), MERGE_BUFFER_CAP);
        assert!((pending.back().copied().unwrap() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn mixer_merge_on_empty_buffer_leaves_block_unchanged() {
        let mixer = MixerGraph::new();
        let mut block = vec![0.5, -0.5];
        let original = block.clone();
        mixer.merge_into(&mut block);
        assert_eq!(block, original);
    }
}
