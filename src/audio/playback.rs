//! Playback scheduling for inbound model audio
//!
//! Decoded chunks are appended to a shared sample queue that an output
//! stream drains, so consecutive network-delivered chunks play back-to-back
//! with no gap. A running watermark tracks the scheduled end offset; an
//! interruption clears the queue and resets the watermark to zero.
//!
//! Output-muting silences the speaker while still draining the queue at the
//! normal rate, so mute/unmute never shifts timing. On hosts without an
//! output device the queue alone still provides the scheduling semantics.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};

use super::pipeline;

/// How long to wait for the playback thread to report stream creation.
const PLAYBACK_START_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct PlaybackShared {
    queue: VecDeque<f32>,
    muted: bool,
}

/// Queue of scheduled model audio with gapless back-to-back playback.
pub struct PlaybackQueue {
    shared: Arc<Mutex<PlaybackShared>>,
    sample_rate: u32,
    /// Seconds of audio scheduled since the last reset.
    next_start: f64,
    _output: Option<OutputHandle>,
}

impl PlaybackQueue {
    /// Create a queue with no audible output (scheduling only).
    pub fn new(sample_rate: u32) -> Self {
        Self {
            shared: Arc::new(Mutex::new(PlaybackShared::default())),
            sample_rate,
            next_start: 0.0,
            _output: None,
        }
    }

    /// Create a queue and try to open a speaker stream draining it.
    ///
    /// Output failure is non-fatal: the session continues without local
    /// playback and a warning is logged.
    pub fn with_output(sample_rate: u32) -> Self {
        let mut queue = Self::new(sample_rate);
        match OutputHandle::open(queue.shared.clone(), sample_rate) {
            Ok(handle) => queue._output = Some(handle),
            Err(e) => log::warn!("Audio output unavailable, playback disabled: {}", e),
        }
        queue
    }

    /// Schedule a decoded chunk directly after everything already queued.
    /// Returns the new watermark in seconds.
    pub fn schedule(&mut self, pcm: &[i16]) -> f64 {
        if let Ok(mut shared) = self.shared.lock() {
            shared.queue.extend(pipeline::pcm16_to_f32(pcm));
        }
        self.next_start += pcm.len() as f64 / self.sample_rate as f64;
        self.next_start
    }

    /// Drop everything scheduled and reset the watermark. Used on
    /// interruption and teardown.
    pub fn clear(&mut self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.queue.clear();
        }
        self.next_start = 0.0;
    }

    /// Silence the speaker without stopping queue consumption.
    pub fn set_muted(&mut self, muted: bool) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.muted = muted;
        }
    }

    /// Seconds of audio scheduled since the last reset.
    pub fn watermark(&self) -> f64 {
        self.next_start
    }

    /// Samples currently waiting to be played.
    pub fn queued_samples(&self) -> usize {
        self.shared.lock().map(|s| s.queue.len()).unwrap_or(0)
    }
}

/// Speaker stream on a dedicated thread, draining the shared queue.
struct OutputHandle {
    stop: Option<std::sync::mpsc::Sender<()>>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl OutputHandle {
    fn open(shared: Arc<Mutex<PlaybackShared>>, sample_rate: u32) -> Result<Self, String> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let join = std::thread::Builder::new()
            .name("voicelink-playback".to_string())
            .spawn(move || match build_output_stream(shared, sample_rate) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| e.to_string())?;

        match ready_rx.recv_timeout(PLAYBACK_START_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                stop: Some(stop_tx),
                join: Some(join),
            }),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => Err("playback thread did not start in time".to_string()),
        }
    }
}

impl Drop for OutputHandle {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn build_output_stream(
    shared: Arc<Mutex<PlaybackShared>>,
    sample_rate: u32,
) -> Result<Stream, String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "no output device".to_string())?;

    let supported = device.default_output_config().map_err(|e| e.to_string())?;
    if supported.sample_format() != SampleFormat::F32 {
        return Err(format!(
            "unsupported output sample format {:?}",
            supported.sample_format()
        ));
    }

    let channels = supported.channels().max(1);
    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = |err| log::error!("Audio output error: {}", err);
    let channels = channels as usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let Ok(mut shared) = shared.lock() else {
                    data.fill(0.0);
                    return;
                };
                let muted = shared.muted;
                for frame in data.chunks_mut(channels) {
                    let sample = shared.queue.pop_front().unwrap_or(0.0);
                    let value = if muted { 0.0 } else { sample };
                    frame.fill(value);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| e.to_string())?;

    stream.play().map_err(|e| e.to_string())?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_advances_by_chunk_duration() {
        let mut queue = PlaybackQueue::new(24_000);
        assert_eq!(queue.watermark(), 0.0);

        // 2400 samples at 24kHz is exactly 100ms.
        queue.schedule(&vec![0i16; 2400]);
        assert!((queue.watermark() - 0.1).abs() < 1e-9);

        queue.schedule(&vec![0i16; 2400]);
        assert!((queue.watermark() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn chunks_queue_back_to_back() {
        let mut queue = PlaybackQueue::new(24_000);
        queue.schedule(&[100i16; 10]);
        queue.schedule(&[200i16; 5]);
        assert_eq!(queue.queued_samples(), 15);
    }

    #[test]
    fn clear_resets_watermark_and_queue() {
        let mut queue = PlaybackQueue::new(24_000);
        queue.schedule(&vec![0i16; 4800]);
        assert!(queue.watermark() > 0.0);

        queue.clear();
        assert_eq!(queue.watermark(), 0.0);
        assert_eq!(queue.queued_samples(), 0);
    }

    #[test]
    fn muting_does_not_drop_queued_audio() {
        let mut queue = PlaybackQueue::new(24_000);
        queue.schedule(&[1000i16; 100]);
        queue.set_muted(true);
        assert_eq!(queue.queued_samples(), 100);
    }
}
