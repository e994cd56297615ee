//! Session lifecycle states and retry bookkeeping

use std::time::Duration;

use tokio::time::Instant;

/// How long a connection must stay up before the retry counter resets.
pub const STABILITY_WINDOW: Duration = Duration::from_secs(5);

/// Lifecycle state of the engine, reported through the event sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Reconnection bookkeeping owned by the session actor.
///
/// The attempt counter doubles the backoff per attempt (2s, 4s, 8s, ...) and
/// resets to zero once a connection has stayed up past the stability window.
#[derive(Debug, Default)]
pub struct RetryState {
    attempt: u32,
    connected_at: Option<Instant>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no further automatic attempt is allowed.
    pub fn exhausted(&self, max_retries: u32) -> bool {
        self.attempt >= max_retries
    }

    /// Record the next attempt and return its backoff delay.
    ///
    /// The first attempt waits 2s, the second 4s, the third 8s.
    pub fn begin_attempt(&mut self) -> Duration {
        self.attempt += 1;
        Duration::from_secs(1u64 << self.attempt.min(16))
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Stamp the moment a connection was established.
    pub fn mark_connected(&mut self) {
        self.connected_at = Some(Instant::now());
    }

    pub fn mark_disconnected(&mut self) {
        self.connected_at = None;
    }

    /// Reset the attempt counter once the current connection has stayed up
    /// past `window`. Returns true on the tick that performed the reset.
    pub fn stabilize_if_due(&mut self, window: Duration) -> bool {
        if self.attempt == 0 {
            return false;
        }
        match self.connected_at {
            Some(since) if since.elapsed() >= window => {
                self.attempt = 0;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let mut retry = RetryState::new();
        assert_eq!(retry.begin_attempt(), Duration::from_secs(2));
        assert_eq!(retry.begin_attempt(), Duration::from_secs(4));
        assert_eq!(retry.begin_attempt(), Duration::from_secs(8));
    }

    #[test]
    fn exhaustion_respects_max_retries() {
        let mut retry = RetryState::new();
        assert!(!retry.exhausted(3));

        retry.begin_attempt();
        retry.begin_attempt();
        assert!(!retry.exhausted(3));

        retry.begin_attempt();
        assert!(retry.exhausted(3));
    }

    #[test]
    fn stabilize_requires_elapsed_window() {
        let mut retry = RetryState::new();
        retry.begin_attempt();
        retry.mark_connected();

        // Window has not elapsed yet.
        assert!(!retry.stabilize_if_due(Duration::from_secs(5)));
        assert_eq!(retry.attempt(), 1);

        // A zero-length window is due immediately.
        assert!(retry.stabilize_if_due(Duration::ZERO));
        assert_eq!(retry.attempt(), 0);

        // Already reset, nothing further to do.
        assert!(!retry.stabilize_if_due(Duration::ZERO));
    }

    #[test]
    fn stabilize_noop_while_disconnected() {
        let mut retry = RetryState::new();
        retry.begin_attempt();
        retry.mark_disconnected();
        assert!(!retry.stabilize_if_due(Duration::ZERO));
    }

    #[test]
    fn attempt_counter_resumes_doubling_after_reset() {
        let mut retry = RetryState::new();
        retry.begin_attempt();
        retry.begin_attempt();
        retry.mark_connected();
        assert!(retry.stabilize_if_due(Duration::ZERO));

        // After a stable connection the next failure backs off from 2s again.
        assert_eq!(retry.begin_attempt(), Duration::from_secs(2));
    }

    #[test]
    fn state_display_names() {
        assert_eq!(SessionState::Disconnected.to_string(), "disconnected");
        assert_eq!(SessionState::Reconnecting.to_string(), "reconnecting");
    }
}
