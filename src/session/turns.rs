//! Turn assembly from streamed transcript and audio events
//!
//! The accumulator holds at most one open turn per role. Partial text
//! fragments append to the open turn (never replace it) and every append
//! reports the full accumulated text under the turn's stable id, so UI
//! consumers update one entry in place. A completion flushes every role with
//! accumulated text into finalized turns; an interruption discards the
//! model's open turn outright.
//!
//! # Local echo
//!
//! Text sent by the caller is echoed to the transcript immediately as a
//! finalized user turn. If the endpoint then streams its own echo of that
//! text back, the matching inbound user turn is swallowed once so the
//! transcript does not show the message twice.

use uuid::Uuid;

use crate::sink::{Role, TranscriptUpdate};

/// One still-accumulating turn.
#[derive(Debug)]
struct OpenTurn {
    id: Uuid,
    text: String,
    audio: Vec<i16>,
}

impl OpenTurn {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            text: String::new(),
            audio: Vec::new(),
        }
    }
}

/// A turn flushed by a completion event. The audio is raw PCM16 at the
/// role's sample rate; encoding happens at the artifact layer.
#[derive(Debug)]
pub struct FinalizedTurn {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub audio: Vec<i16>,
}

/// Assembles streamed fragments into discrete conversation turns.
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    user: Option<OpenTurn>,
    model: Option<OpenTurn>,
    /// Text recently echoed locally via `local_echo`, pending dedup against
    /// the endpoint's server-side echo.
    pending_echo: Option<String>,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, role: Role) -> &mut Option<OpenTurn> {
        match role {
            Role::User => &mut self.user,
            Role::Model => &mut self.model,
        }
    }

    /// Append a partial text fragment to the role's open turn, creating the
    /// turn on the first fragment.
    ///
    /// Returns the partial update to report, or `None` when the fragment is
    /// suppressed as the in-flight server echo of locally sent text.
    pub fn append_partial(&mut self, role: Role, fragment: &str) -> Option<TranscriptUpdate> {
        let turn = self.slot_mut(role).get_or_insert_with(OpenTurn::new);
        turn.text.push_str(fragment);

        let update = TranscriptUpdate {
            turn_id: turn.id,
            role,
            text: turn.text.clone(),
            partial: true,
            audio: None,
        };

        if role == Role::User {
            if let Some(echo) = self.pending_echo.as_deref() {
                if echo.starts_with(&update.text) {
                    return None;
                }
            }
        }

        Some(update)
    }

    /// Append raw audio to the role's open turn, creating the turn if
    /// needed (audio can arrive before the first text fragment).
    pub fn push_audio(&mut self, role: Role, pcm: &[i16]) {
        let turn = self.slot_mut(role).get_or_insert_with(OpenTurn::new);
        turn.audio.extend_from_slice(pcm);
    }

    /// Flush every role with non-empty accumulated text into finalized
    /// turns, clearing the accumulation state. Audio-only turns are dropped.
    pub fn complete_turns(&mut self) -> Vec<FinalizedTurn> {
        let mut finalized = Vec::new();

        for role in [Role::User, Role::Model] {
            let Some(turn) = self.slot_mut(role).take() else {
                continue;
            };
            if turn.text.is_empty() {
                continue;
            }

            if role == Role::User {
                // One-shot dedup of the endpoint's echo of locally sent text.
                if self.pending_echo.take().is_some_and(|echo| echo == turn.text) {
                    log::debug!("Dropping server echo of locally sent text");
                    continue;
                }
            }

            finalized.push(FinalizedTurn {
                id: turn.id,
                role,
                text: turn.text,
                audio: turn.audio,
            });
        }

        finalized
    }

    /// Discard the model's in-progress turn after an interruption.
    ///
    /// Returns an empty partial update carrying the discarded turn's id so
    /// the UI can clear its in-progress entry. The next model fragment
    /// starts a fresh turn with a new id.
    pub fn interrupt(&mut self) -> Option<TranscriptUpdate> {
        let turn = self.model.take()?;
        Some(TranscriptUpdate {
            turn_id: turn.id,
            role: Role::Model,
            text: String::new(),
            partial: true,
            audio: None,
        })
    }

    /// Record locally sent text and return its finalized transcript entry.
    pub fn local_echo(&mut self, text: &str) -> TranscriptUpdate {
        self.pending_echo = Some(text.to_string());
        TranscriptUpdate {
            turn_id: Uuid::new_v4(),
            role: Role::User,
            text: text.to_string(),
            partial: false,
            audio: None,
        }
    }

    /// Drop all accumulation state. Called at the start of every
    /// connect/reconnect cycle.
    pub fn reset(&mut self) {
        self.user = None;
        self.model = None;
        self.pending_echo = None;
    }

    #[cfg(test)]
    fn open_turn_id(&self, role: Role) -> Option<Uuid> {
        match role {
            Role::User => self.user.as_ref().map(|t| t.id),
            Role::Model => self.model.as_ref().map(|t| t.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_concatenate_in_arrival_order() {
        let mut turns = TurnAccumulator::new();

        let first = turns.append_partial(Role::Model, "He").unwrap();
        assert_eq!(first.text, "He");
        assert!(first.partial);

        let second = turns.append_partial(Role::Model, "llo").unwrap();
        assert_eq!(second.text, "Hello");
        assert_eq!(second.turn_id, first.turn_id, "open turn id must be stable");

        let third = turns.append_partial(Role::Model, " world").unwrap();
        assert_eq!(third.text, "Hello world");
    }

    #[test]
    fn at_most_one_open_turn_per_role() {
        let mut turns = TurnAccumulator::new();

        let a = turns.append_partial(Role::Model, "one").unwrap();
        let b = turns.append_partial(Role::Model, " two").unwrap();
        assert_eq!(a.turn_id, b.turn_id);

        // A different role opens its own independent turn.
        let c = turns.append_partial(Role::User, "hi").unwrap();
        assert_ne!(c.turn_id, a.turn_id);
        assert_eq!(turns.open_turn_id(Role::Model), Some(a.turn_id));
        assert_eq!(turns.open_turn_id(Role::User), Some(c.turn_id));
    }

    #[test]
    fn completion_flushes_and_clears() {
        let mut turns = TurnAccumulator::new();
        turns.append_partial(Role::Model, "Hello");
        turns.push_audio(Role::Model, &[1, 2, 3]);

        let finalized = turns.complete_turns();
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].role, Role::Model);
        assert_eq!(finalized[0].text, "Hello");
        assert_eq!(finalized[0].audio, vec![1, 2, 3]);

        // Accumulation state is cleared; a second completion flushes nothing.
        assert!(turns.complete_turns().is_empty());
        assert_eq!(turns.open_turn_id(Role::Model), None);
    }

    #[test]
    fn completion_flushes_both_roles() {
        let mut turns = TurnAccumulator::new();
        turns.append_partial(Role::User, "question");
        turns.append_partial(Role::Model, "answer");

        let finalized = turns.complete_turns();
        assert_eq!(finalized.len(), 2);
        assert_eq!(finalized[0].role, Role::User);
        assert_eq!(finalized[1].role, Role::Model);
    }

    #[test]
    fn audio_only_turn_is_dropped() {
        let mut turns = TurnAccumulator::new();
        turns.push_audio(Role::Model, &[5; 100]);
        assert!(turns.complete_turns().is_empty());
    }

    #[test]
    fn audio_before_text_lands_in_same_turn() {
        let mut turns = TurnAccumulator::new();
        turns.push_audio(Role::Model, &[9; 10]);
        let update = turns.append_partial(Role::Model, "spoken").unwrap();

        let finalized = turns.complete_turns();
        assert_eq!(finalized[0].id, update.turn_id);
        assert_eq!(finalized[0].audio.len(), 10);
    }

    #[test]
    fn interruption_discards_model_turn() {
        let mut turns = TurnAccumulator::new();
        let open = turns.append_partial(Role::Model, "I was about to say").unwrap();
        turns.push_audio(Role::Model, &[7; 50]);

        let cleared = turns.interrupt().unwrap();
        assert_eq!(cleared.turn_id, open.turn_id);
        assert!(cleared.text.is_empty());
        assert!(cleared.partial);

        // Nothing survives to a later completion.
        assert!(turns.complete_turns().is_empty());

        // The next fragment starts a brand new turn.
        let fresh = turns.append_partial(Role::Model, "new thought").unwrap();
        assert_ne!(fresh.turn_id, open.turn_id);
        assert_eq!(fresh.text, "new thought");
    }

    #[test]
    fn interruption_without_open_turn_is_none() {
        let mut turns = TurnAccumulator::new();
        assert!(turns.interrupt().is_none());
    }

    #[test]
    fn interruption_leaves_user_turn_alone() {
        let mut turns = TurnAccumulator::new();
        turns.append_partial(Role::User, "still talking");
        turns.append_partial(Role::Model, "cut off");

        turns.interrupt();

        let finalized = turns.complete_turns();
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].role, Role::User);
    }

    #[test]
    fn local_echo_is_finalized_user_turn() {
        let mut turns = TurnAccumulator::new();
        let update = turns.local_echo("typed message");
        assert_eq!(update.role, Role::User);
        assert_eq!(update.text, "typed message");
        assert!(!update.partial);
    }

    #[test]
    fn server_echo_of_sent_text_is_swallowed_once() {
        let mut turns = TurnAccumulator::new();
        turns.local_echo("hi there");

        // Inbound echo fragments are suppressed while they prefix the echo.
        assert!(turns.append_partial(Role::User, "hi ").is_none());
        assert!(turns.append_partial(Role::User, "there").is_none());
        assert!(turns.complete_turns().is_empty());

        // Later genuine user speech flows through normally.
        let update = turns.append_partial(Role::User, "hi there").unwrap_or_else(|| {
            panic!("echo dedup must be one-shot");
        });
        assert_eq!(update.text, "hi there");
        let finalized = turns.complete_turns();
        assert_eq!(finalized.len(), 1);
    }

    #[test]
    fn diverging_text_is_not_treated_as_echo() {
        let mut turns = TurnAccumulator::new();
        turns.local_echo("hello");

        // Same start, different continuation: genuine speech.
        assert!(turns.append_partial(Role::User, "hel").is_none());
        let update = turns.append_partial(Role::User, "p me").unwrap();
        assert_eq!(update.text, "help me");

        let finalized = turns.complete_turns();
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].text, "help me");
    }

    #[test]
    fn reset_discards_everything() {
        let mut turns = TurnAccumulator::new();
        turns.append_partial(Role::User, "a");
        turns.append_partial(Role::Model, "b");
        turns.local_echo("c");

        turns.reset();
        assert!(turns.complete_turns().is_empty());
        assert_eq!(turns.open_turn_id(Role::User), None);
        assert_eq!(turns.open_turn_id(Role::Model), None);
    }
}
