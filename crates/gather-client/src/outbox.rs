use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use gather_types::events::GatewayCommand;
use gather_types::models::{ChatMessage, ConversationId, ConversationKind};

use crate::{ClientError, UserProfile};

/// State machine for one outgoing message:
/// `Pending` (optimistic, rendered) -> `Confirmed` | `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PendingSend {
    pub temp_id: Uuid,
    pub conversation: ConversationId,
    pub state: SendState,
    /// The optimistic message as rendered, kept so a failed send can be
    /// retried under a fresh temp id without re-asking the UI for anything.
    pub message: ChatMessage,
}

/// Tracks this client's optimistic sends by temp id. Confirmation is
/// idempotent; there is no automatic retry — a failed send stays here until
/// the caller retries (fresh temp id) or discards it.
#[derive(Debug, Default)]
pub struct Outbox {
    sends: HashMap<Uuid, PendingSend>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the optimistic message and the wire command for a send. The
    /// message is keyed by its temp id (mirrored into `id` until the
    /// canonical id replaces it on confirmation).
    pub fn prepare(
        &mut self,
        profile: &UserProfile,
        conversation: ConversationId,
        content: &str,
    ) -> Result<(ChatMessage, GatewayCommand), ClientError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::Validation("content must not be empty".into()));
        }

        let temp_id = Uuid::new_v4();
        let created_at = Utc::now();

        let (message, command) = match conversation.kind {
            ConversationKind::Room => (
                ChatMessage::Group {
                    id: temp_id,
                    temp_id: Some(temp_id),
                    room_id: conversation.id,
                    sender_id: profile.user_id,
                    sender_name: profile.username.clone(),
                    content: content.to_string(),
                    created_at,
                    reactions: vec![],
                    is_optimistic: true,
                },
                GatewayCommand::GroupSend {
                    sender_id: profile.user_id,
                    room_id: conversation.id,
                    content: content.to_string(),
                    temp_id,
                },
            ),
            ConversationKind::Direct => (
                ChatMessage::Direct {
                    id: temp_id,
                    temp_id: Some(temp_id),
                    sender_id: profile.user_id,
                    sender_name: profile.username.clone(),
                    recipient_id: conversation.id,
                    content: content.to_string(),
                    created_at,
                    reactions: vec![],
                    is_optimistic: true,
                },
                GatewayCommand::DmSend {
                    sender_id: profile.user_id,
                    recipient_id: conversation.id,
                    content: content.to_string(),
                    temp_id,
                },
            ),
        };

        self.sends.insert(
            temp_id,
            PendingSend {
                temp_id,
                conversation,
                state: SendState::Pending,
                message: message.clone(),
            },
        );

        Ok((message, command))
    }

    /// Apply a server confirmation. Returns true only on the first call for
    /// a given temp id — replays are no-ops.
    pub fn confirm(&mut self, temp_id: Uuid) -> bool {
        match self.sends.get_mut(&temp_id) {
            Some(send) if send.state != SendState::Confirmed => {
                send.state = SendState::Confirmed;
                // Confirmed entries have no further use; drop them.
                self.sends.remove(&temp_id);
                true
            }
            _ => false,
        }
    }

    /// Transport reported the emit failed. The entry stays for retry/discard.
    pub fn mark_failed(&mut self, temp_id: Uuid) -> bool {
        match self.sends.get_mut(&temp_id) {
            Some(send) if send.state == SendState::Pending => {
                send.state = SendState::Failed;
                true
            }
            _ => false,
        }
    }

    /// Take a failed send out for resubmission. The caller prepares a fresh
    /// message (and temp id) from the returned entry's content.
    pub fn take_failed(&mut self, temp_id: Uuid) -> Option<PendingSend> {
        match self.sends.get(&temp_id) {
            Some(send) if send.state == SendState::Failed => self.sends.remove(&temp_id),
            _ => None,
        }
    }

    /// Drop a send entirely (user chose discard).
    pub fn discard(&mut self, temp_id: Uuid) -> Option<PendingSend> {
        self.sends.remove(&temp_id)
    }

    pub fn state_of(&self, temp_id: Uuid) -> Option<SendState> {
        self.sends.get(&temp_id).map(|s| s.state)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PendingSend> {
        self.sends.values().filter(|s| s.state == SendState::Failed)
    }

    pub fn is_pending(&self, temp_id: Uuid) -> bool {
        self.state_of(temp_id) == Some(SendState::Pending)
    }
}
