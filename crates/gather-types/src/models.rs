use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which table/stream a conversation (and its messages) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Room,
    Direct,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Room => "room",
            Self::Direct => "direct",
        }
    }
}

impl std::str::FromStr for ConversationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "room" => Ok(Self::Room),
            "direct" => Ok(Self::Direct),
            other => Err(format!("unknown conversation kind: {other}")),
        }
    }
}

/// Conversation identity. For rooms the id is the room id; for direct
/// conversations it is the *counterpart's* user id, so the same DM thread
/// has a different id on each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId {
    pub kind: ConversationKind,
    pub id: Uuid,
}

impl ConversationId {
    pub fn room(id: Uuid) -> Self {
        Self {
            kind: ConversationKind::Room,
            id,
        }
    }

    pub fn direct(peer_id: Uuid) -> Self {
        Self {
            kind: ConversationKind::Direct,
            id: peer_id,
        }
    }
}

/// A conversation as the client sees it: a multi-member room or a 1:1 peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Conversation {
    Room {
        id: Uuid,
        name: String,
        image_ref: Option<String>,
        member_ids: Vec<Uuid>,
    },
    DirectPeer {
        id: Uuid,
        name: String,
        image_ref: Option<String>,
        is_online: bool,
        last_seen_at: Option<DateTime<Utc>>,
    },
}

impl Conversation {
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            Self::Room { id, .. } => ConversationId::room(*id),
            Self::DirectPeer { id, .. } => ConversationId::direct(*id),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Room { name, .. } => name,
            Self::DirectPeer { name, .. } => name,
        }
    }
}

/// A single reaction row. At most one exists per (message, user, emoji);
/// toggling an identical reaction removes the first instead of duplicating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub id: Uuid,
    pub emoji: String,
    pub user_id: Uuid,
}

/// A group or direct message. `temp_id` is set only on the sending client
/// while the message is optimistic; after server confirmation the message is
/// keyed solely by `id`. `is_optimistic` never crosses the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatMessage {
    Group {
        id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp_id: Option<Uuid>,
        room_id: Uuid,
        sender_id: Uuid,
        sender_name: String,
        content: String,
        created_at: DateTime<Utc>,
        #[serde(default)]
        reactions: Vec<Reaction>,
        #[serde(default, skip_serializing)]
        is_optimistic: bool,
    },
    Direct {
        id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp_id: Option<Uuid>,
        sender_id: Uuid,
        sender_name: String,
        recipient_id: Uuid,
        content: String,
        created_at: DateTime<Utc>,
        #[serde(default)]
        reactions: Vec<Reaction>,
        #[serde(default, skip_serializing)]
        is_optimistic: bool,
    },
}

impl ChatMessage {
    pub fn kind(&self) -> ConversationKind {
        match self {
            Self::Group { .. } => ConversationKind::Room,
            Self::Direct { .. } => ConversationKind::Direct,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Group { id, .. } | Self::Direct { id, .. } => *id,
        }
    }

    pub fn temp_id(&self) -> Option<Uuid> {
        match self {
            Self::Group { temp_id, .. } | Self::Direct { temp_id, .. } => *temp_id,
        }
    }

    pub fn sender_id(&self) -> Uuid {
        match self {
            Self::Group { sender_id, .. } | Self::Direct { sender_id, .. } => *sender_id,
        }
    }

    pub fn sender_name(&self) -> &str {
        match self {
            Self::Group { sender_name, .. } | Self::Direct { sender_name, .. } => sender_name,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Group { content, .. } | Self::Direct { content, .. } => content,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Group { created_at, .. } | Self::Direct { created_at, .. } => *created_at,
        }
    }

    pub fn reactions(&self) -> &[Reaction] {
        match self {
            Self::Group { reactions, .. } | Self::Direct { reactions, .. } => reactions,
        }
    }

    pub fn set_reactions(&mut self, set: Vec<Reaction>) {
        match self {
            Self::Group { reactions, .. } | Self::Direct { reactions, .. } => *reactions = set,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        match self {
            Self::Group { is_optimistic, .. } | Self::Direct { is_optimistic, .. } => {
                *is_optimistic
            }
        }
    }

    /// Replace the provisional identity with the server-canonical one.
    pub fn confirm(&mut self, canonical_id: Uuid, created_at: DateTime<Utc>) {
        match self {
            Self::Group {
                id,
                temp_id,
                created_at: at,
                is_optimistic,
                ..
            }
            | Self::Direct {
                id,
                temp_id,
                created_at: at,
                is_optimistic,
                ..
            } => {
                *id = canonical_id;
                *temp_id = None;
                *at = created_at;
                *is_optimistic = false;
            }
        }
    }

    /// The conversation this message belongs to, from `viewer`'s perspective.
    /// For direct messages that is the counterpart, whichever side sent it.
    pub fn conversation_id(&self, viewer: Uuid) -> ConversationId {
        match self {
            Self::Group { room_id, .. } => ConversationId::room(*room_id),
            Self::Direct {
                sender_id,
                recipient_id,
                ..
            } => {
                let peer = if *sender_id == viewer {
                    *recipient_id
                } else {
                    *sender_id
                };
                ConversationId::direct(peer)
            }
        }
    }

    /// Rendering order is ascending by this key; the id is an opaque tiebreak.
    pub fn sort_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at(), self.id())
    }
}

/// Per-conversation summary carried by the directory and the local cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unseen_count: u32,
}

impl ConversationSummary {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            last_message: None,
            last_message_at: None,
            unseen_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_conversation_id_is_the_counterpart() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let msg = ChatMessage::Direct {
            id: Uuid::new_v4(),
            temp_id: None,
            sender_id: alice,
            sender_name: "alice".into(),
            recipient_id: bob,
            content: "hi".into(),
            created_at: Utc::now(),
            reactions: vec![],
            is_optimistic: false,
        };

        assert_eq!(msg.conversation_id(alice), ConversationId::direct(bob));
        assert_eq!(msg.conversation_id(bob), ConversationId::direct(alice));
    }

    #[test]
    fn confirm_clears_temp_identity() {
        let mut msg = ChatMessage::Group {
            id: Uuid::nil(),
            temp_id: Some(Uuid::new_v4()),
            room_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            sender_name: "alice".into(),
            content: "hello".into(),
            created_at: Utc::now(),
            reactions: vec![],
            is_optimistic: true,
        };

        let canonical = Uuid::new_v4();
        let at = Utc::now();
        msg.confirm(canonical, at);

        assert_eq!(msg.id(), canonical);
        assert_eq!(msg.temp_id(), None);
        assert!(!msg.is_optimistic());
    }

    #[test]
    fn optimistic_flag_does_not_cross_the_wire() {
        let msg = ChatMessage::Group {
            id: Uuid::new_v4(),
            temp_id: None,
            room_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            sender_name: "a".into(),
            content: "x".into(),
            created_at: Utc::now(),
            reactions: vec![],
            is_optimistic: true,
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("is_optimistic"));

        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert!(!back.is_optimistic());
    }
}
