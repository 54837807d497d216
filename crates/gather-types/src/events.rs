use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, ConversationId, ConversationKind, Reaction};

/// Commands sent FROM client TO server over the gateway WebSocket.
///
/// Every command after `Identify` carries the sender's declared id; the
/// server checks it against the identity bound at Identify and rejects
/// mismatches without touching state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection.
    Identify { token: String },

    /// Send a message to a room. `temp_id` is echoed back in `MessageNew`
    /// so the sender can reconcile its optimistic entry.
    GroupSend {
        sender_id: Uuid,
        room_id: Uuid,
        content: String,
        temp_id: Uuid,
    },

    /// Send a direct message to a peer.
    DmSend {
        sender_id: Uuid,
        recipient_id: Uuid,
        content: String,
        temp_id: Uuid,
    },

    /// Delete a message. Only the original sender may delete; deletion
    /// cascades to the message's reactions.
    MessageDelete {
        sender_id: Uuid,
        kind: ConversationKind,
        message_id: Uuid,
    },

    /// Toggle a (user, message, emoji) reaction.
    ReactionToggle {
        sender_id: Uuid,
        kind: ConversationKind,
        message_id: Uuid,
        emoji: String,
    },

    /// Indicate typing in a conversation.
    TypingStart { conversation: ConversationId },

    /// Explicitly stop the typing indicator.
    TypingStop { conversation: ConversationId },
}

/// Events pushed FROM server TO clients. Message/reaction/typing events go
/// to all participants of the affected conversation, including the sender;
/// presence updates are global.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication.
    Ready { user_id: Uuid, username: String },

    /// A new message was persisted. Carries the `temp_id` echo when the
    /// message arrived over the gateway with one.
    MessageNew { message: ChatMessage },

    /// A message (and its reactions) was deleted.
    MessageDeleted {
        kind: ConversationKind,
        message_id: Uuid,
    },

    /// The authoritative reaction set for a message after a toggle.
    ReactionUpdated {
        kind: ConversationKind,
        message_id: Uuid,
        reactions: Vec<Reaction>,
    },

    /// A participant started typing. `conversation` is already rewritten to
    /// the receiver's perspective for direct conversations.
    UserTyping {
        conversation: ConversationId,
        user_id: Uuid,
        name: String,
    },

    /// A participant stopped typing.
    UserStoppedTyping {
        conversation: ConversationId,
        user_id: Uuid,
    },

    /// A user came online or went offline.
    PresenceUpdate {
        user_id: Uuid,
        username: String,
        online: bool,
    },

    /// A command was rejected. No state changed on the server.
    Error { code: ErrorCode, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_round_trip_as_tagged_json() {
        let cmd = GatewayCommand::GroupSend {
            sender_id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            content: "hello".into(),
            temp_id: Uuid::new_v4(),
        };

        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"type\":\"GroupSend\""));

        let back: GatewayCommand = serde_json::from_str(&json).unwrap();
        match back {
            GatewayCommand::GroupSend { content, .. } => assert_eq!(content, "hello"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_fails_to_parse() {
        let raw = r#"{"type":"SelfDestruct","data":{}}"#;
        assert!(serde_json::from_str::<GatewayEvent>(raw).is_err());
    }
}
