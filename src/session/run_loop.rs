//! The session actor
//!
//! One task owns the whole session: capture blocks, transport events, caller
//! commands, the reconnect timer, and the level/stability tick are
//! multiplexed through a single `select!` loop, so per-turn state is only
//! ever touched from one place and events apply in strict arrival order.
//!
//! ```text
//!            ┌──────────────┐   blocks    ┌───────────────────────────┐
//!            │ CPAL callback│ ──try_send─▶│                           │
//!            └──────────────┘             │        session actor      │
//!            ┌──────────────┐   events    │  downsample→gate→send     │
//!            │ WS reader    │ ───send────▶│  partial/audio→turns      │──▶ EventSink
//!            └──────────────┘             │  retry timer, level tick  │
//!            ┌──────────────┐  commands   │                           │
//!            │ SessionEngine│ ───send────▶│                           │
//!            └──────────────┘             └───────────────────────────┘
//! ```
//!
//! Reconnection fully releases the previous capture device and transport
//! before re-acquiring, so there is never more than one live handle of
//! either. The full-session recording spans reconnects and is finalized
//! exactly once.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::engine::{Command, TransportFactory};
use super::protocol::ClientMessage;
use super::state::{RetryState, SessionState, STABILITY_WINDOW};
use super::transport::{Transport, TransportEvent};
use super::turns::TurnAccumulator;
use super::SessionError;
use crate::audio::artifacts::{self, SessionRecorder};
use crate::audio::{pipeline, CaptureHandle, CaptureSource, LevelMeter, PlaybackQueue};
use crate::config::SessionConfig;
use crate::sink::{EventSink, Role, TranscriptUpdate};

/// Cadence of the audio-level decay and stability check.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the capture block channel. The callback drops blocks rather
/// than block when the actor falls behind.
const BLOCK_CHANNEL_CAPACITY: usize = 64;

/// Everything the actor needs, handed over by the engine at spawn.
pub(crate) struct SessionRuntime {
    pub(crate) config: SessionConfig,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) transport_factory: TransportFactory,
    pub(crate) capture_source: Arc<dyn CaptureSource>,
    pub(crate) cancel: CancellationToken,
    pub(crate) cmd_rx: mpsc::Receiver<Command>,
}

/// Resources of one connection attempt. Dropped wholesale on teardown.
struct Live {
    capture: Box<dyn CaptureHandle>,
    blocks: mpsc::Receiver<Vec<f32>>,
    transport: Box<dyn Transport>,
    events: mpsc::Receiver<TransportEvent>,
}

/// Caller-controlled toggles that survive reconnects.
#[derive(Default)]
struct Flags {
    muted: bool,
    output_muted: bool,
}

/// Why the connected phase ended.
enum ConnEnd {
    Stopped,
    UnexpectedClose(String),
    Fatal(String),
}

/// Why the whole session ended.
#[derive(Debug)]
enum Ended {
    Stopped,
    Fatal,
    Exhausted,
}

enum BackoffOutcome {
    Retry,
    Stopped,
    Exhausted,
}

fn transition(state: &mut SessionState, next: SessionState, sink: &Arc<dyn EventSink>) {
    if *state == next {
        return;
    }
    log::info!("Session state: {} -> {}", state, next);
    *state = next;
    sink.on_state_change(next);
}

/// Acquire the capture device and open a fresh transport.
async fn establish(
    config: &SessionConfig,
    factory: &TransportFactory,
    capture_source: &dyn CaptureSource,
) -> Result<Live, SessionError> {
    let (block_tx, blocks) = mpsc::channel(BLOCK_CHANNEL_CAPACITY);

    let capture = capture_source
        .start(config, block_tx)
        .map_err(|e| SessionError::DeviceFailed(e.to_string()))?;

    let mut transport = (factory)();
    let events = transport.open(config).await?;

    Ok(Live {
        capture,
        blocks,
        transport,
        events,
    })
}

pub(crate) async fn run(mut rt: SessionRuntime) {
    let artifacts_dir = match artifacts::artifacts_dir(rt.config.artifacts_dir.as_deref()) {
        Ok(dir) => Some(dir),
        Err(e) => {
            rt.sink
                .on_error(&format!("Artifacts directory unavailable: {}", e));
            None
        }
    };

    let max_retries = rt.config.max_retries;
    let mut state = SessionState::Disconnected;
    let mut retry = RetryState::new();
    let mut flags = Flags::default();
    let mut recorder: Option<SessionRecorder> = None;
    let mut ever_connected = false;

    let ended = loop {
        transition(&mut state, SessionState::Connecting, &rt.sink);

        let established = tokio::select! {
            biased;
            _ = rt.cancel.cancelled() => break Ended::Stopped,
            result = establish(&rt.config, &rt.transport_factory, rt.capture_source.as_ref()) => result,
        };

        let mut live = match established {
            Ok(live) => live,
            Err(e) => {
                if !ever_connected {
                    // Initial device or handshake failure is fatal, never retried.
                    rt.sink.on_error(&e.to_string());
                    transition(&mut state, SessionState::Error, &rt.sink);
                    break Ended::Fatal;
                }
                match backoff_or_exhaust(
                    &mut rt,
                    &mut state,
                    &mut retry,
                    max_retries,
                    &mut flags,
                    &e.to_string(),
                )
                .await
                {
                    BackoffOutcome::Retry => continue,
                    BackoffOutcome::Stopped => break Ended::Stopped,
                    BackoffOutcome::Exhausted => break Ended::Exhausted,
                }
            }
        };

        ever_connected = true;
        retry.mark_connected();

        // The full-session recording starts at the first successful connect
        // and keeps accumulating across reconnects.
        if recorder.is_none() {
            if let Some(dir) = artifacts_dir.as_deref() {
                match SessionRecorder::create(
                    dir,
                    rt.config.target_sample_rate,
                    rt.config.playback_sample_rate,
                ) {
                    Ok(r) => recorder = Some(r),
                    Err(e) => rt
                        .sink
                        .on_error(&format!("Session recording unavailable: {}", e)),
                }
            }
        }

        transition(&mut state, SessionState::Connected, &rt.sink);

        let end = connected_phase(
            &mut rt,
            &mut live,
            &mut retry,
            &mut flags,
            recorder.as_mut(),
            artifacts_dir.as_deref(),
        )
        .await;

        live.transport.close().await;
        drop(live);
        retry.mark_disconnected();

        match end {
            ConnEnd::Stopped => break Ended::Stopped,
            ConnEnd::Fatal(message) => {
                rt.sink.on_error(&message);
                transition(&mut state, SessionState::Error, &rt.sink);
                break Ended::Fatal;
            }
            ConnEnd::UnexpectedClose(reason) => {
                match backoff_or_exhaust(
                    &mut rt,
                    &mut state,
                    &mut retry,
                    max_retries,
                    &mut flags,
                    &reason,
                )
                .await
                {
                    BackoffOutcome::Retry => continue,
                    BackoffOutcome::Stopped => break Ended::Stopped,
                    BackoffOutcome::Exhausted => break Ended::Exhausted,
                }
            }
        }
    };

    let recording = recorder.as_mut().and_then(|r| r.finalize());
    if recording.is_some() {
        if let Some(dir) = artifacts_dir.as_deref() {
            if let Err(e) = artifacts::cleanup_old_sessions(dir) {
                log::warn!("Session cleanup failed: {}", e);
            }
        }
    }

    transition(&mut state, SessionState::Disconnected, &rt.sink);
    rt.sink.on_session_ended(recording.as_deref());
    log::info!("Session ended ({:?})", ended);
}

/// Schedule the next reconnect attempt, or give up when the cap is reached.
/// Commands arriving during the backoff window are still honored.
async fn backoff_or_exhaust(
    rt: &mut SessionRuntime,
    state: &mut SessionState,
    retry: &mut RetryState,
    max_retries: u32,
    flags: &mut Flags,
    reason: &str,
) -> BackoffOutcome {
    if retry.exhausted(max_retries) {
        rt.sink.on_error(&format!(
            "Connection lost: {} (gave up after {} attempts)",
            reason, max_retries
        ));
        return BackoffOutcome::Exhausted;
    }

    let delay = retry.begin_attempt();
    transition(state, SessionState::Reconnecting, &rt.sink);
    log::info!(
        "Reconnecting in {:?} (attempt {}/{}): {}",
        delay,
        retry.attempt(),
        max_retries,
        reason
    );

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            biased;
            _ = rt.cancel.cancelled() => return BackoffOutcome::Stopped,
            _ = &mut sleep => return BackoffOutcome::Retry,
            Some(cmd) = rt.cmd_rx.recv() => match cmd {
                Command::SendText(_) => {
                    log::warn!("sendText ignored while reconnecting");
                    rt.sink.on_error("Cannot send text: session is not connected");
                }
                Command::SetMuted(muted) => flags.muted = muted,
                Command::SetOutputMuted(muted) => flags.output_muted = muted,
            },
        }
    }
}

/// Drive one established connection until it ends.
async fn connected_phase(
    rt: &mut SessionRuntime,
    live: &mut Live,
    retry: &mut RetryState,
    flags: &mut Flags,
    mut recorder: Option<&mut SessionRecorder>,
    artifacts_dir: Option<&Path>,
) -> ConnEnd {
    let native_rate = live.capture.sample_rate();
    let target_rate = rt.config.target_sample_rate;
    let playback_rate = rt.config.playback_sample_rate;
    let gate_threshold = rt.config.noise_gate_rms;

    // Per-cycle accumulation state starts empty on every (re)connect.
    let mut turns = TurnAccumulator::new();
    let mut level = LevelMeter::new();
    let mut playback = PlaybackQueue::with_output(playback_rate);
    playback.set_muted(flags.output_muted);

    let mut tick = tokio::time::interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = rt.cancel.cancelled() => return ConnEnd::Stopped,

            Some(cmd) = rt.cmd_rx.recv() => match cmd {
                Command::SendText(text) => {
                    match live.transport.send(ClientMessage::text_input(&text)).await {
                        Ok(()) => {
                            // Local echo; the endpoint's own echo is deduped
                            // by the accumulator.
                            let update = turns.local_echo(&text);
                            rt.sink.on_transcript(&update);
                        }
                        Err(e) => rt.sink.on_error(&format!("Failed to send text: {}", e)),
                    }
                }
                Command::SetMuted(muted) => {
                    flags.muted = muted;
                    log::info!("Capture {}", if muted { "muted" } else { "unmuted" });
                }
                Command::SetOutputMuted(muted) => {
                    flags.output_muted = muted;
                    playback.set_muted(muted);
                }
            },

            block = live.blocks.recv() => match block {
                Some(block) => {
                    let mut block = pipeline::downsample(&block, native_rate, target_rate);
                    pipeline::apply_gate(&mut block, gate_threshold, flags.muted);
                    let pcm = pipeline::to_pcm16(&block);

                    turns.push_audio(Role::User, &pcm);
                    if let Some(rec) = recorder.as_deref_mut() {
                        if let Err(e) = rec.write_block(&block) {
                            log::warn!("Session recording write failed: {}", e);
                        }
                    }
                    // Blocks go out in capture order; a failed send is logged
                    // and the transport reader surfaces the close.
                    if let Err(e) = live.transport.send(ClientMessage::audio_append(&pcm)).await {
                        log::warn!("Audio send failed: {}", e);
                    }
                }
                None => return ConnEnd::Fatal("Audio capture stopped unexpectedly".to_string()),
            },

            event = live.events.recv() => match event {
                Some(TransportEvent::Partial { role, text }) => {
                    if let Some(update) = turns.append_partial(role, &text) {
                        rt.sink.on_transcript(&update);
                    }
                }
                Some(TransportEvent::Audio(pcm)) => {
                    level.observe_pcm(&pcm);
                    playback.schedule(&pcm);
                    turns.push_audio(Role::Model, &pcm);
                    if let Some(rec) = recorder.as_deref_mut() {
                        rec.push_model(&pcm);
                    }
                }
                Some(TransportEvent::TurnComplete) => {
                    for turn in turns.complete_turns() {
                        let rate = match turn.role {
                            Role::User => target_rate,
                            Role::Model => playback_rate,
                        };
                        let audio = artifacts_dir.and_then(|dir| {
                            match artifacts::encode_turn_wav(dir, turn.role, turn.id, &turn.audio, rate) {
                                Ok(path) => Some(path),
                                Err(e) => {
                                    rt.sink.on_error(&format!("Failed to encode turn audio: {}", e));
                                    None
                                }
                            }
                        });
                        rt.sink.on_transcript(&TranscriptUpdate {
                            turn_id: turn.id,
                            role: turn.role,
                            text: turn.text,
                            partial: false,
                            audio,
                        });
                    }
                }
                Some(TransportEvent::Interrupted) => {
                    if let Some(update) = turns.interrupt() {
                        rt.sink.on_transcript(&update);
                    }
                    // Anything already scheduled for playback stops now.
                    playback.clear();
                }
                Some(TransportEvent::Closed { reason }) => return ConnEnd::UnexpectedClose(reason),
                Some(TransportEvent::ProtocolError(message)) => return ConnEnd::Fatal(message),
                None => return ConnEnd::UnexpectedClose("transport event stream ended".to_string()),
            },

            _ = tick.tick() => {
                rt.sink.on_audio_level(level.tick());
                if retry.stabilize_if_due(STABILITY_WINDOW) {
                    log::debug!("Connection stable, retry counter reset");
                }
            }
        }
    }
}
