//! Public session engine handle
//!
//! One `SessionEngine` owns at most one live session at a time. `connect()`
//! spawns a single actor task that drives the whole lifecycle; `stop()`
//! cancels it and waits for teardown. A generation counter identifies each
//! session so results of async work started before a `stop()` can never
//! resurrect a stopped session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::run_loop::{self, SessionRuntime};
use super::transport::{Transport, WsTransport};
use super::SessionError;
use crate::audio::{CaptureSource, CpalCapture};
use crate::config::SessionConfig;
use crate::sink::EventSink;

/// Creates a fresh transport for each connection attempt. Reconnection never
/// reuses a transport: the prior one is fully closed first.
pub type TransportFactory = Arc<dyn Fn() -> Box<dyn Transport> + Send + Sync>;

/// Caller requests forwarded into the session actor.
#[derive(Debug)]
pub(crate) enum Command {
    SendText(String),
    SetMuted(bool),
    SetOutputMuted(bool),
}

struct ActiveSession {
    generation: u64,
    cmd_tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

/// Engine for live bidirectional voice sessions.
///
/// All results are reported through the `EventSink` passed at construction;
/// the public methods never panic and never throw caller mistakes back as
/// errors.
pub struct SessionEngine {
    sink: Arc<dyn EventSink>,
    transport_factory: TransportFactory,
    capture_source: Arc<dyn CaptureSource>,
    active: Mutex<Option<ActiveSession>>,
    generation: AtomicU64,
}

impl SessionEngine {
    /// Engine with the production WebSocket transport and CPAL capture.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_factories(
            sink,
            Arc::new(|| Box::new(WsTransport::new()) as Box<dyn Transport>),
            Arc::new(CpalCapture::new()),
        )
    }

    /// Engine with injected transport and capture implementations.
    pub fn with_factories(
        sink: Arc<dyn EventSink>,
        transport_factory: TransportFactory,
        capture_source: Arc<dyn CaptureSource>,
    ) -> Self {
        Self {
            sink,
            transport_factory,
            capture_source,
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Start a session with the given configuration.
    ///
    /// A no-op when a session is already active. Configuration problems are
    /// reported through the error sink; device and transport failures follow
    /// asynchronously through the state and error callbacks.
    pub async fn connect(&self, config: SessionConfig) {
        let mut active = self.active.lock().await;
        if let Some(session) = active.as_ref() {
            if !session.task.is_finished() {
                log::warn!("connect() ignored: a session is already active");
                return;
            }
        }

        if let Err(message) = config.validate() {
            let err = SessionError::InvalidConfig(message);
            log::warn!("{}", err);
            self.sink.on_error(&err.to_string());
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        log::info!("Starting session (generation {})", generation);

        let runtime = SessionRuntime {
            config,
            sink: self.sink.clone(),
            transport_factory: self.transport_factory.clone(),
            capture_source: self.capture_source.clone(),
            cancel: cancel.clone(),
            cmd_rx,
        };
        let task = tokio::spawn(run_loop::run(runtime));

        *active = Some(ActiveSession {
            generation,
            cmd_tx,
            cancel,
            task,
        });
    }

    /// Stop the session, releasing every acquired resource.
    ///
    /// Idempotent and safe from any state; cancels a pending reconnect
    /// outright. Returns once teardown has completed and the session-ended
    /// callback has fired.
    pub async fn stop(&self) {
        let session = { self.active.lock().await.take() };
        let Some(session) = session else {
            log::debug!("stop() with no active session");
            return;
        };

        // Bump the generation so anything still in flight for the old
        // session identifies itself as stale.
        self.generation.fetch_add(1, Ordering::SeqCst);
        session.cancel.cancel();

        if let Err(e) = session.task.await {
            if !e.is_cancelled() {
                log::warn!("Session task ended abnormally: {}", e);
            }
        }
        log::info!("Session stopped (generation {})", session.generation);
    }

    /// Send a typed user message into the conversation.
    ///
    /// Only meaningful while connected; otherwise a warning is reported
    /// through the error sink and nothing changes.
    pub async fn send_text(&self, text: &str) {
        self.command(Command::SendText(text.to_string()), true).await;
    }

    /// Toggle transmission of captured audio. Muted capture still sends
    /// zero-filled frames so transmission cadence is preserved.
    pub async fn set_muted(&self, muted: bool) {
        self.command(Command::SetMuted(muted), false).await;
    }

    /// Toggle local playback of received audio. Received audio is still
    /// processed into the transcript and turn buffers while output-muted.
    pub async fn set_output_muted(&self, muted: bool) {
        self.command(Command::SetOutputMuted(muted), false).await;
    }

    async fn command(&self, cmd: Command, report: bool) {
        let active = self.active.lock().await;
        let delivered = match active.as_ref() {
            Some(session) if !session.task.is_finished() => {
                session.cmd_tx.send(cmd).await.is_ok()
            }
            _ => false,
        };

        if !delivered {
            log::warn!("Command ignored: session is not connected");
            if report {
                self.sink
                    .on_error("Cannot send text: session is not connected");
            }
        }
    }
}

impl Drop for SessionEngine {
    fn drop(&mut self) {
        // Best effort: let a still-running actor wind down on its own.
        if let Ok(active) = self.active.try_lock() {
            if let Some(session) = active.as_ref() {
                session.cancel.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct ErrorSink {
        errors: StdMutex<Vec<String>>,
    }

    impl ErrorSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                errors: StdMutex::new(Vec::new()),
            })
        }
    }

    impl EventSink for ErrorSink {
        fn on_error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    fn unreachable_factory() -> TransportFactory {
        Arc::new(|| panic!("transport factory must not run for invalid config"))
    }

    struct UnreachableCapture;
    impl CaptureSource for UnreachableCapture {
        fn start(
            &self,
            _config: &SessionConfig,
            _tx: crate::audio::CaptureBlockSender,
        ) -> Result<Box<dyn crate::audio::CaptureHandle>, crate::audio::AudioError> {
            panic!("capture must not start for invalid config");
        }
    }

    #[tokio::test]
    async fn connect_rejects_invalid_config_via_sink() {
        let sink = ErrorSink::new();
        let engine = SessionEngine::with_factories(
            sink.clone(),
            unreachable_factory(),
            Arc::new(UnreachableCapture),
        );

        engine.connect(SessionConfig::default()).await;

        let errors = sink.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("config"), "got: {}", errors[0]);
    }

    #[tokio::test]
    async fn stop_without_session_is_idempotent() {
        let sink = ErrorSink::new();
        let engine = SessionEngine::with_factories(
            sink.clone(),
            unreachable_factory(),
            Arc::new(UnreachableCapture),
        );

        engine.stop().await;
        engine.stop().await;
        assert!(sink.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_text_without_session_reports_error() {
        let sink = ErrorSink::new();
        let engine = SessionEngine::with_factories(
            sink.clone(),
            unreachable_factory(),
            Arc::new(UnreachableCapture),
        );

        engine.send_text("hello?").await;

        let errors = sink.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("not connected"));
    }

    #[tokio::test]
    async fn mute_toggles_without_session_do_not_report() {
        let sink = ErrorSink::new();
        let engine = SessionEngine::with_factories(
            sink.clone(),
            unreachable_factory(),
            Arc::new(UnreachableCapture),
        );

        engine.set_muted(true).await;
        engine.set_output_muted(true).await;
        assert!(sink.errors.lock().unwrap().is_empty());
    }
}
