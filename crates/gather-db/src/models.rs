/// Database row types — these map directly to SQLite rows.
/// Distinct from gather-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub image_ref: Option<String>,
}

pub struct RoomRow {
    pub id: String,
    pub name: String,
    pub image_ref: Option<String>,
}

pub struct RoomOverviewRow {
    pub id: String,
    pub name: String,
    pub image_ref: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
}

pub struct GroupMessageRow {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub created_at: String,
}

pub struct DirectMessageRow {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub recipient_id: String,
    pub content: String,
    pub created_at: String,
}

pub struct ReactionRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

/// One row of the direct-conversation aggregation: the latest message
/// exchanged with `peer_id`.
pub struct DirectConversationRow {
    pub peer_id: String,
    pub peer_name: String,
    pub peer_image_ref: Option<String>,
    pub last_message: String,
    pub last_message_at: String,
    pub last_sender_id: String,
}
