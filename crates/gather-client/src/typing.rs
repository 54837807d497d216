use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use gather_types::events::GatewayCommand;
use gather_types::models::ConversationId;

/// Keystrokes within this window do not re-emit `TypingStart`; silence for
/// this long emits `TypingStop`.
pub const TYPING_IDLE_WINDOW: Duration = Duration::from_secs(2);

/// Receiver-side safety net: a typing indicator expires after this long even
/// if the stop event was dropped.
pub const TYPING_TTL: Duration = Duration::from_secs(5);

/// Debounced sender side. Owns no OS timers — the caller drives it with
/// explicit `now` values (keystrokes and a periodic tick), which keeps it
/// testable without a runtime.
#[derive(Debug, Default)]
pub struct TypingSender {
    active_in: Option<ConversationId>,
    last_keystroke: Option<Instant>,
}

impl TypingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called on every keystroke. Emits `TypingStart` at most once per idle
    /// period; switching conversations stops the old indicator first.
    pub fn keystroke(&mut self, conversation: ConversationId, now: Instant) -> Vec<GatewayCommand> {
        let mut out = Vec::new();
        match self.active_in {
            Some(active) if active == conversation => {
                // already typing here; just refresh the idle window
            }
            Some(active) => {
                out.push(GatewayCommand::TypingStop {
                    conversation: active,
                });
                out.push(GatewayCommand::TypingStart { conversation });
                self.active_in = Some(conversation);
            }
            None => {
                out.push(GatewayCommand::TypingStart { conversation });
                self.active_in = Some(conversation);
            }
        }
        self.last_keystroke = Some(now);
        out
    }

    /// Periodic tick: emits `TypingStop` once the idle window elapses with
    /// no further input.
    pub fn tick(&mut self, now: Instant) -> Option<GatewayCommand> {
        let conversation = self.active_in?;
        let last = self.last_keystroke?;
        if now.duration_since(last) >= TYPING_IDLE_WINDOW {
            self.active_in = None;
            self.last_keystroke = None;
            Some(GatewayCommand::TypingStop { conversation })
        } else {
            None
        }
    }

    /// Explicit stop: message sent, conversation switched, or teardown.
    pub fn stop(&mut self) -> Option<GatewayCommand> {
        let conversation = self.active_in.take()?;
        self.last_keystroke = None;
        Some(GatewayCommand::TypingStop { conversation })
    }

    pub fn is_typing(&self) -> bool {
        self.active_in.is_some()
    }
}

/// One remote typing indicator. Only one is shown per conversation; the last
/// sender wins when several participants type at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingState {
    pub user_id: Uuid,
    pub name: String,
    pub expires_at: Instant,
}

/// Receiver side: per-conversation ephemeral typing state, cleared by the
/// stop event or, defensively, by TTL expiry when the stop was dropped.
/// Never persisted.
#[derive(Debug, Default)]
pub struct TypingTracker {
    states: HashMap<ConversationId, TypingState>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_start(
        &mut self,
        conversation: ConversationId,
        user_id: Uuid,
        name: String,
        now: Instant,
    ) {
        self.states.insert(
            conversation,
            TypingState {
                user_id,
                name,
                expires_at: now + TYPING_TTL,
            },
        );
    }

    /// A stop only clears the indicator if it still belongs to that user —
    /// a newer sender's indicator survives an older sender's stop.
    pub fn observe_stop(&mut self, conversation: ConversationId, user_id: Uuid) {
        if let Some(state) = self.states.get(&conversation) {
            if state.user_id == user_id {
                self.states.remove(&conversation);
            }
        }
    }

    /// The indicator to show for a conversation, if any and not expired.
    pub fn current(&self, conversation: ConversationId, now: Instant) -> Option<&TypingState> {
        self.states
            .get(&conversation)
            .filter(|state| state.expires_at > now)
    }

    /// Drop expired indicators. Call from the caller's periodic tick.
    pub fn prune(&mut self, now: Instant) {
        self.states.retain(|_, state| state.expires_at > now);
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> ConversationId {
        ConversationId::room(Uuid::new_v4())
    }

    #[test]
    fn rapid_keystrokes_emit_exactly_one_start() {
        let mut sender = TypingSender::new();
        let conversation = conv();
        let t0 = Instant::now();

        let first = sender.keystroke(conversation, t0);
        assert_eq!(first.len(), 1);
        assert!(matches!(first[0], GatewayCommand::TypingStart { .. }));

        // keystrokes within the idle window do not re-emit
        for ms in [100, 500, 1500] {
            assert!(sender
                .keystroke(conversation, t0 + Duration::from_millis(ms))
                .is_empty());
        }
    }

    #[test]
    fn idle_pause_emits_stop_then_next_keystroke_restarts() {
        let mut sender = TypingSender::new();
        let conversation = conv();
        let t0 = Instant::now();

        sender.keystroke(conversation, t0);
        // still inside the window: no stop yet
        assert!(sender.tick(t0 + Duration::from_millis(1900)).is_none());

        // 2.1s of silence
        let stop = sender.tick(t0 + Duration::from_millis(2100)).unwrap();
        assert!(matches!(stop, GatewayCommand::TypingStop { .. }));
        assert!(!sender.is_typing());

        let again = sender.keystroke(conversation, t0 + Duration::from_secs(3));
        assert_eq!(again.len(), 1);
        assert!(matches!(again[0], GatewayCommand::TypingStart { .. }));
    }

    #[test]
    fn switching_conversations_stops_the_old_indicator() {
        let mut sender = TypingSender::new();
        let a = conv();
        let b = conv();
        let t0 = Instant::now();

        sender.keystroke(a, t0);
        let cmds = sender.keystroke(b, t0 + Duration::from_millis(500));
        assert_eq!(cmds.len(), 2);
        assert!(matches!(cmds[0], GatewayCommand::TypingStop { conversation } if conversation == a));
        assert!(matches!(cmds[1], GatewayCommand::TypingStart { conversation } if conversation == b));
    }

    #[test]
    fn explicit_stop_fires_once() {
        let mut sender = TypingSender::new();
        sender.keystroke(conv(), Instant::now());
        assert!(sender.stop().is_some());
        assert!(sender.stop().is_none());
    }

    #[test]
    fn tracker_expires_indicators_without_a_stop_event() {
        let mut tracker = TypingTracker::new();
        let conversation = conv();
        let user = Uuid::new_v4();
        let t0 = Instant::now();

        tracker.observe_start(conversation, user, "bob".into(), t0);
        assert!(tracker.current(conversation, t0 + Duration::from_secs(1)).is_some());

        // the stop event was dropped; TTL clears it anyway
        assert!(tracker.current(conversation, t0 + TYPING_TTL).is_none());
        tracker.prune(t0 + TYPING_TTL);
        assert!(tracker.current(conversation, t0).is_none());
    }

    #[test]
    fn last_sender_wins_and_stops_match_by_user() {
        let mut tracker = TypingTracker::new();
        let conversation = conv();
        let bob = Uuid::new_v4();
        let carol = Uuid::new_v4();
        let t0 = Instant::now();

        tracker.observe_start(conversation, bob, "bob".into(), t0);
        tracker.observe_start(conversation, carol, "carol".into(), t0);
        assert_eq!(tracker.current(conversation, t0).unwrap().name, "carol");

        // bob's late stop must not clear carol's indicator
        tracker.observe_stop(conversation, bob);
        assert_eq!(tracker.current(conversation, t0).unwrap().name, "carol");

        tracker.observe_stop(conversation, carol);
        assert!(tracker.current(conversation, t0).is_none());
    }
}
