use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            image_ref   TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS rooms (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            image_ref   TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS room_members (
            room_id     TEXT NOT NULL REFERENCES rooms(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            joined_at   TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (room_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS group_messages (
            id          TEXT PRIMARY KEY,
            room_id     TEXT NOT NULL REFERENCES rooms(id),
            sender_id   TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_group_messages_room
            ON group_messages(room_id, created_at);

        CREATE TABLE IF NOT EXISTS direct_messages (
            id            TEXT PRIMARY KEY,
            sender_id     TEXT NOT NULL REFERENCES users(id),
            recipient_id  TEXT NOT NULL REFERENCES users(id),
            content       TEXT NOT NULL,
            created_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_direct_messages_sender
            ON direct_messages(sender_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_direct_messages_recipient
            ON direct_messages(recipient_id, created_at);

        -- message_kind is 'room' or 'direct'; message ids are only unique
        -- within their own table, so the kind is part of every reaction key.
        CREATE TABLE IF NOT EXISTS reactions (
            id            TEXT PRIMARY KEY,
            message_kind  TEXT NOT NULL CHECK (message_kind IN ('room', 'direct')),
            message_id    TEXT NOT NULL,
            user_id       TEXT NOT NULL REFERENCES users(id),
            emoji         TEXT NOT NULL,
            created_at    TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(message_kind, message_id, user_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_kind, message_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
