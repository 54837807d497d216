use std::time::Instant;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use gather_types::api::{DirectConversationEntry, RoomOverview};
use gather_types::events::{ErrorCode, GatewayCommand, GatewayEvent};
use gather_types::models::{ChatMessage, ConversationId, ConversationSummary};

use crate::directory::ConversationDirectory;
use crate::history::{ConversationHistory, PageRequest};
use crate::outbox::Outbox;
use crate::typing::{TypingSender, TypingState, TypingTracker};
use crate::{ClientError, UserProfile};

/// What a user action wants the runtime to do next: commands to emit over
/// the gateway and, possibly, a history page to fetch over REST.
#[derive(Debug, Default)]
pub struct Effects {
    pub commands: Vec<GatewayCommand>,
    pub fetch: Option<PageRequest>,
}

/// The explicit, passed-down application state for messaging: directory,
/// open-conversation history, optimistic outbox, and typing state, with no
/// ambient globals. All methods are synchronous; the surrounding event loop
/// performs the IO the returned [`Effects`] describe.
pub struct ChatSession {
    profile: UserProfile,
    directory: ConversationDirectory,
    outbox: Outbox,
    history: Option<ConversationHistory>,
    typing_out: TypingSender,
    typing_in: TypingTracker,
    /// Bumped on every conversation switch; stale page results carry an
    /// older value and are dropped on arrival.
    selection_seq: u64,
    connected: bool,
    last_error: Option<ClientError>,
}

impl ChatSession {
    pub fn new(profile: UserProfile, cached: Vec<ConversationSummary>) -> Self {
        let mut directory = ConversationDirectory::new(profile.user_id);
        directory.apply_cached(cached);
        Self {
            profile,
            directory,
            outbox: Outbox::new(),
            history: None,
            typing_out: TypingSender::new(),
            typing_in: TypingTracker::new(),
            selection_seq: 0,
            connected: false,
            last_error: None,
        }
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }

    pub fn history(&self) -> Option<&ConversationHistory> {
        self.history.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Last rejected action, surfaced as inline UI state.
    pub fn take_last_error(&mut self) -> Option<ClientError> {
        self.last_error.take()
    }

    // -- Snapshots --

    /// Merge the REST room snapshot; returns the summaries to cache.
    pub fn apply_room_snapshot(
        &mut self,
        rooms: Vec<RoomOverview>,
    ) -> Vec<ConversationSummary> {
        self.directory.apply_room_snapshot(rooms);
        self.directory.snapshot_for_cache()
    }

    /// Merge the REST direct-conversation snapshot; returns the summaries to
    /// cache.
    pub fn apply_direct_snapshot(
        &mut self,
        entries: Vec<DirectConversationEntry>,
    ) -> Vec<ConversationSummary> {
        self.directory.apply_direct_snapshot(entries);
        self.directory.snapshot_for_cache()
    }

    // -- Conversation selection --

    /// Switch the open conversation. Clears the history store, begins a
    /// fresh initial load, resets the unseen count, and stops any typing
    /// indicator we were sending to the previous conversation.
    pub fn select_conversation(&mut self, conversation: Option<ConversationId>) -> Effects {
        let mut effects = Effects::default();
        if let Some(stop) = self.typing_out.stop() {
            effects.commands.push(stop);
        }

        self.directory.select(conversation);
        self.selection_seq += 1;
        self.history = conversation.map(|cid| {
            let mut history = ConversationHistory::new(cid, self.selection_seq);
            effects.fetch = history.begin_initial_load();
            history
        });
        effects
    }

    /// Scroll-up trigger: at most one older-page request in flight.
    pub fn load_older(&mut self) -> Option<PageRequest> {
        self.history.as_mut()?.begin_older_load()
    }

    /// Commit a fetched page. Stale results (conversation switched since the
    /// request) are dropped and `false` is returned.
    pub fn apply_page(&mut self, request: PageRequest, page: Vec<ChatMessage>) -> bool {
        match self.history.as_mut() {
            Some(history) => history.apply_page(request, page),
            None => false,
        }
    }

    // -- Sending --

    /// Optimistically send to the open conversation: the message lands in
    /// the history store immediately, and the returned effects carry the
    /// gateway command (plus a typing stop, since sending ends typing).
    pub fn send_message(&mut self, content: &str) -> Result<Effects, ClientError> {
        let Some(history) = self.history.as_mut() else {
            return Err(ClientError::Validation("no conversation selected".into()));
        };

        let (message, command) = self
            .outbox
            .prepare(&self.profile, history.conversation(), content)?;
        history.insert_optimistic(message.clone());
        self.directory.record_message(&message);

        let mut effects = Effects::default();
        if let Some(stop) = self.typing_out.stop() {
            effects.commands.push(stop);
        }
        effects.commands.push(command);
        Ok(effects)
    }

    /// The transport reported the emit failed: mark the optimistic entry
    /// Failed. It stays visible for manual retry or discard.
    pub fn handle_send_failure(&mut self, temp_id: Uuid) {
        self.outbox.mark_failed(temp_id);
    }

    /// Resubmit a failed send under a fresh temp id. Works even if the user
    /// has switched conversations meanwhile — the optimistic entry is only
    /// re-rendered when its conversation is still the open one.
    pub fn retry_send(&mut self, temp_id: Uuid) -> Option<Effects> {
        let failed = self.outbox.take_failed(temp_id)?;
        if let Some(history) = self.history.as_mut() {
            history.remove_optimistic(temp_id);
        }

        let (message, command) = self
            .outbox
            .prepare(&self.profile, failed.conversation, failed.message.content())
            .ok()?;
        if let Some(history) = self.history.as_mut() {
            if history.conversation() == failed.conversation {
                history.insert_optimistic(message.clone());
            }
        }
        self.directory.record_message(&message);
        Some(Effects {
            commands: vec![command],
            fetch: None,
        })
    }

    /// Drop a failed send entirely.
    pub fn discard_send(&mut self, temp_id: Uuid) {
        self.outbox.discard(temp_id);
        if let Some(history) = self.history.as_mut() {
            history.remove_optimistic(temp_id);
        }
    }

    pub fn failed_sends(&self) -> Vec<Uuid> {
        self.outbox.failed().map(|s| s.temp_id).collect()
    }

    // -- Reactions and deletes --

    /// Optimistically flip a reaction and emit the toggle. The server's
    /// `ReactionUpdated` push replaces the whole set, winning any race.
    pub fn toggle_reaction(&mut self, message_id: Uuid, emoji: &str) -> Option<GatewayCommand> {
        let history = self.history.as_mut()?;
        let kind = history
            .messages()
            .iter()
            .find(|m| m.id() == message_id)?
            .kind();
        history.toggle_reaction_local(message_id, self.profile.user_id, emoji);
        Some(GatewayCommand::ReactionToggle {
            sender_id: self.profile.user_id,
            kind,
            message_id,
            emoji: emoji.to_string(),
        })
    }

    /// Request deletion of one of our own messages. The store is not touched
    /// until the authoritative `MessageDeleted` push comes back, so there is
    /// nothing to roll back if the server rejects it.
    pub fn delete_message(&mut self, message_id: Uuid) -> Result<GatewayCommand, ClientError> {
        let Some(history) = self.history.as_ref() else {
            return Err(ClientError::Validation("no conversation selected".into()));
        };
        let message = history
            .messages()
            .iter()
            .find(|m| m.id() == message_id)
            .ok_or_else(|| ClientError::NotFound(format!("message {message_id}")))?;
        if message.sender_id() != self.profile.user_id {
            return Err(ClientError::Authorization(
                "only the sender may delete a message".into(),
            ));
        }
        Ok(GatewayCommand::MessageDelete {
            sender_id: self.profile.user_id,
            kind: message.kind(),
            message_id,
        })
    }

    // -- Typing --

    /// Called on every keystroke in the composer.
    pub fn keystroke(&mut self, now: Instant) -> Vec<GatewayCommand> {
        match self.directory.selected() {
            Some(conversation) => self.typing_out.keystroke(conversation, now),
            None => Vec::new(),
        }
    }

    /// Periodic tick: typing idle timeout and indicator expiry.
    pub fn tick(&mut self, now: Instant) -> Vec<GatewayCommand> {
        self.typing_in.prune(now);
        self.typing_out.tick(now).into_iter().collect()
    }

    /// The typing indicator to render for the open conversation.
    pub fn typing_indicator(&self, now: Instant) -> Option<&TypingState> {
        self.typing_in.current(self.directory.selected()?, now)
    }

    // -- Gateway events --

    pub fn handle_event(&mut self, event: GatewayEvent, now: Instant) {
        match event {
            GatewayEvent::Ready { .. } => {
                self.connected = true;
            }

            GatewayEvent::MessageNew { message } => {
                if let Some(temp_id) = message.temp_id() {
                    // Only a confirmation if *we* have that temp id pending;
                    // other participants see the echo and ignore it.
                    self.outbox.confirm(temp_id);
                }
                let cid = message.conversation_id(self.profile.user_id);
                if let Some(history) = self.history.as_mut() {
                    if history.conversation() == cid {
                        history.apply_push(message.clone());
                    }
                }
                self.directory.record_message(&message);
            }

            GatewayEvent::MessageDeleted { message_id, .. } => {
                if let Some(history) = self.history.as_mut() {
                    history.remove(message_id);
                }
                // The summary line may now be stale; the next snapshot
                // fetch corrects it.
            }

            GatewayEvent::ReactionUpdated {
                message_id,
                reactions,
                ..
            } => {
                if let Some(history) = self.history.as_mut() {
                    history.set_reactions(message_id, reactions);
                }
            }

            GatewayEvent::UserTyping {
                conversation,
                user_id,
                name,
            } => {
                if user_id != self.profile.user_id {
                    self.typing_in.observe_start(conversation, user_id, name, now);
                }
            }

            GatewayEvent::UserStoppedTyping {
                conversation,
                user_id,
            } => {
                self.typing_in.observe_stop(conversation, user_id);
            }

            GatewayEvent::PresenceUpdate {
                user_id, online, ..
            } => {
                self.directory.apply_presence(user_id, online, Utc::now());
            }

            GatewayEvent::Error { code, message } => {
                debug!("gateway rejected a command: {code:?} {message}");
                self.last_error = Some(match code {
                    ErrorCode::Validation => ClientError::Validation(message),
                    ErrorCode::Unauthorized | ErrorCode::Forbidden => {
                        ClientError::Authorization(message)
                    }
                    ErrorCode::NotFound => ClientError::NotFound(message),
                    ErrorCode::Internal => ClientError::Network(message),
                });
            }
        }
    }

    /// The channel went away: messaging is disabled until a reconnect.
    pub fn connection_lost(&mut self) {
        self.connected = false;
        self.typing_in.clear();
    }

    /// After a successful reconnect the caller refetches snapshots; this
    /// reloads the open conversation so nothing missed while offline is lost.
    pub fn on_reconnect(&mut self) -> Effects {
        self.connected = true;
        match self.directory.selected() {
            Some(conversation) => self.select_conversation(Some(conversation)),
            None => Effects::default(),
        }
    }
}
