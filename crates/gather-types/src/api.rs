use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims shared across gather-api (REST middleware) and gather-gateway
/// (WebSocket Identify). Tokens are issued by an external auth service; this
/// subsystem only validates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Messages --

/// Body of the REST fallback send (used when the gateway channel is down).
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<Uuid>,
}

// -- Reactions --

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleReactionResponse {
    pub added: bool,
}

// -- Conversation snapshots --

/// One of the caller's rooms, with its latest message for the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomOverview {
    pub room_id: Uuid,
    pub name: String,
    pub image_ref: Option<String>,
    pub member_ids: Vec<Uuid>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// One row of the direct-conversation list: the latest message exchanged
/// with each counterpart, ordered newest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectConversationEntry {
    pub peer_id: Uuid,
    pub peer_name: String,
    pub peer_image_ref: Option<String>,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
    pub last_sender_id: Uuid,
}
