//! Session lifecycle: connection management, protocol mapping, and turn
//! assembly
//!
//! The submodules split along the data path: `transport` owns the wire,
//! `protocol` owns the message shapes, `turns` reassembles streamed events
//! into transcript entries, and `engine`/`run_loop` own the lifecycle state
//! machine that ties them to the audio pipeline.

pub mod engine;
pub mod protocol;
pub(crate) mod run_loop;
pub mod state;
pub mod transport;
pub mod turns;

pub use engine::SessionEngine;
pub use state::SessionState;

/// Errors that can occur while establishing or driving a session.
#[derive(Debug, Clone)]
pub enum SessionError {
    /// The configuration failed validation at connect entry.
    InvalidConfig(String),
    /// Microphone or system-audio acquisition failed.
    DeviceFailed(String),
    /// Failed to establish the transport connection.
    ConnectionFailed(String),
    /// Authentication with the endpoint failed.
    AuthenticationFailed(String),
    /// The endpoint reported a protocol error.
    ProtocolError(String),
    /// Connection was closed unexpectedly.
    Disconnected(String),
    /// Failed to send a frame.
    SendFailed(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::InvalidConfig(e) => write!(f, "Invalid session config: {}", e),
            SessionError::DeviceFailed(e) => write!(f, "Audio device unavailable: {}", e),
            SessionError::ConnectionFailed(e) => write!(f, "Failed to connect: {}", e),
            SessionError::AuthenticationFailed(e) => write!(f, "Authentication failed: {}", e),
            SessionError::ProtocolError(e) => write!(f, "Protocol error: {}", e),
            SessionError::Disconnected(e) => write!(f, "Connection closed: {}", e),
            SessionError::SendFailed(e) => write!(f, "Failed to send frame: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}
