//! Realtime bidirectional voice session engine.
//!
//! `voicelink` maintains a live audio conversation with a remote streaming
//! endpoint: it captures microphone (and optionally system) audio, resamples
//! and noise-gates it in real time, streams it over a persistent session, and
//! reassembles the streamed replies into turn-by-turn transcripts with
//! per-turn audio artifacts. Mid-session connection loss is recovered
//! transparently with exponential backoff.
//!
//! # Architecture
//!
//! ```text
//! microphone ──┐
//!              ├─ mix ──▶ downsample ──▶ noise gate ──▶ PCM16 ──┐
//! system audio ┘                                                ▼
//!                                                        session actor ◀──▶ Transport
//!                                                              │
//!                              ┌───────────────────────────────┼──────────────────┐
//!                              ▼                               ▼                  ▼
//!                       TurnAccumulator                  PlaybackQueue     SessionRecorder
//!                              │
//!                              ▼
//!                  EventSink (state / transcript / audio level / errors)
//! ```
//!
//! The engine is single-session by design: exactly one live audio device
//! handle and one live transport connection at a time, both owned by a single
//! actor task that multiplexes capture blocks, transport events, and caller
//! commands in one ordered loop.

pub mod audio;
pub mod config;
pub mod session;
pub mod sink;

pub use audio::{AudioError, CaptureHandle, CaptureSource};
pub use config::{InteractionMode, SessionConfig};
pub use session::engine::{SessionEngine, TransportFactory};
pub use session::protocol::{ClientMessage, ServerMessage};
pub use session::state::SessionState;
pub use session::transport::{Transport, TransportEvent, WsTransport};
pub use session::SessionError;
pub use sink::{EventSink, Role, TranscriptUpdate};
