use anyhow::{Result, anyhow};
use rusqlite::Connection;

use crate::Database;
use crate::models::{
    DirectConversationRow, DirectMessageRow, GroupMessageRow, ReactionRow, RoomOverviewRow,
    UserRow,
};

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, image_ref: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, image_ref) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, username, image_ref],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, username, image_ref FROM users WHERE id = ?1")?;
            let row = stmt
                .query_row([id], |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        image_ref: row.get(2)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_username(&self, id: &str) -> Result<String> {
        self.with_conn(|conn| {
            conn.query_row("SELECT username FROM users WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .map_err(|_| anyhow!("User not found: {}", id))
        })
    }

    // -- Rooms --

    pub fn create_room(&self, id: &str, name: &str, image_ref: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO rooms (id, name, image_ref) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, name, image_ref],
            )?;
            Ok(())
        })
    }

    pub fn add_room_member(&self, room_id: &str, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO room_members (room_id, user_id) VALUES (?1, ?2)",
                rusqlite::params![room_id, user_id],
            )?;
            Ok(())
        })
    }

    pub fn room_exists(&self, room_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<String> = conn
                .query_row("SELECT id FROM rooms WHERE id = ?1", [room_id], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn is_room_member(&self, room_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<String> = conn
                .query_row(
                    "SELECT user_id FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                    rusqlite::params![room_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn room_member_ids(&self, room_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT user_id FROM room_members WHERE room_id = ?1")?;
            let rows = stmt
                .query_map([room_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The caller's rooms with their latest message, for the directory snapshot.
    pub fn rooms_for_user(&self, user_id: &str) -> Result<Vec<RoomOverviewRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.name, r.image_ref,
                        (SELECT m.content FROM group_messages m WHERE m.room_id = r.id
                         ORDER BY m.created_at DESC, m.id DESC LIMIT 1),
                        (SELECT m.created_at FROM group_messages m WHERE m.room_id = r.id
                         ORDER BY m.created_at DESC, m.id DESC LIMIT 1)
                 FROM rooms r
                 JOIN room_members rm ON rm.room_id = r.id
                 WHERE rm.user_id = ?1
                 ORDER BY r.name",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(RoomOverviewRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        image_ref: row.get(2)?,
                        last_message: row.get(3)?,
                        last_message_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Group messages --

    pub fn insert_group_message(
        &self,
        id: &str,
        room_id: &str,
        sender_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO group_messages (id, room_id, sender_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, room_id, sender_id, content, created_at],
            )?;
            Ok(())
        })
    }

    /// Newest-first page of a room's history. The client reverses for display.
    pub fn group_history(&self, room_id: &str, take: u32, skip: u32) -> Result<Vec<GroupMessageRow>> {
        self.with_conn(|conn| {
            // JOIN users to fetch sender_name in a single query (eliminates N+1)
            let mut stmt = conn.prepare(
                "SELECT m.id, m.room_id, m.sender_id, u.username, m.content, m.created_at
                 FROM group_messages m
                 LEFT JOIN users u ON m.sender_id = u.id
                 WHERE m.room_id = ?1
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![room_id, take, skip], |row| {
                    Ok(GroupMessageRow {
                        id: row.get(0)?,
                        room_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        sender_name: row
                            .get::<_, Option<String>>(3)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        content: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Direct messages --

    pub fn insert_direct_message(
        &self,
        id: &str,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO direct_messages (id, sender_id, recipient_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, sender_id, recipient_id, content, created_at],
            )?;
            Ok(())
        })
    }

    /// Newest-first page of the 1:1 history between two users, both directions.
    pub fn direct_history(
        &self,
        user_id: &str,
        peer_id: &str,
        take: u32,
        skip: u32,
    ) -> Result<Vec<DirectMessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.sender_id, u.username, m.recipient_id, m.content, m.created_at
                 FROM direct_messages m
                 LEFT JOIN users u ON m.sender_id = u.id
                 WHERE (m.sender_id = ?1 AND m.recipient_id = ?2)
                    OR (m.sender_id = ?2 AND m.recipient_id = ?1)
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?3 OFFSET ?4",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, peer_id, take, skip], |row| {
                    Ok(DirectMessageRow {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                        sender_name: row
                            .get::<_, Option<String>>(2)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        recipient_id: row.get(3)?,
                        content: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The direct-conversation list: one row per counterpart carrying the
    /// latest message exchanged with them, newest-first. Recomputed from
    /// scratch on every call; incremental maintenance happens client-side.
    pub fn direct_conversations(&self, user_id: &str) -> Result<Vec<DirectConversationRow>> {
        self.with_conn(|conn| {
            // SQLite's bare-column semantics: with MAX() in the select list,
            // non-aggregate columns come from the row that carries the max.
            let mut stmt = conn.prepare(
                "SELECT t.counterpart, u.username, u.image_ref,
                        t.content, t.created_at, t.sender_id
                 FROM (
                     SELECT CASE WHEN sender_id = ?1 THEN recipient_id ELSE sender_id END
                                AS counterpart,
                            content, created_at, sender_id,
                            MAX(created_at || '/' || id)
                     FROM direct_messages
                     WHERE sender_id = ?1 OR recipient_id = ?1
                     GROUP BY counterpart
                 ) t
                 LEFT JOIN users u ON u.id = t.counterpart
                 ORDER BY t.created_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(DirectConversationRow {
                        peer_id: row.get(0)?,
                        peer_name: row
                            .get::<_, Option<String>>(1)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        peer_image_ref: row.get(2)?,
                        last_message: row.get(3)?,
                        last_message_at: row.get(4)?,
                        last_sender_id: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Shared message operations --

    /// Sender of a message in either table, for delete authorization.
    pub fn message_sender(&self, kind: &str, message_id: &str) -> Result<Option<String>> {
        let sql = match kind {
            "room" => "SELECT sender_id FROM group_messages WHERE id = ?1",
            "direct" => "SELECT sender_id FROM direct_messages WHERE id = ?1",
            other => return Err(anyhow!("unknown message kind: {}", other)),
        };
        self.with_conn(|conn| {
            let sender = conn
                .query_row(sql, [message_id], |row| row.get(0))
                .optional()?;
            Ok(sender)
        })
    }

    /// Room a group message belongs to, for fan-out after delete/react.
    pub fn group_message_room(&self, message_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let room = conn
                .query_row(
                    "SELECT room_id FROM group_messages WHERE id = ?1",
                    [message_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(room)
        })
    }

    /// Both parties of a direct message, for fan-out after delete/react.
    pub fn direct_message_parties(&self, message_id: &str) -> Result<Option<(String, String)>> {
        self.with_conn(|conn| {
            let parties = conn
                .query_row(
                    "SELECT sender_id, recipient_id FROM direct_messages WHERE id = ?1",
                    [message_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(parties)
        })
    }

    /// Delete a message and cascade its reactions in one transaction.
    /// Returns false if no such message existed. Authorization happens in
    /// the router before this is called.
    pub fn delete_message(&self, kind: &str, message_id: &str) -> Result<bool> {
        let table = match kind {
            "room" => "group_messages",
            "direct" => "direct_messages",
            other => return Err(anyhow!("unknown message kind: {}", other)),
        };
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM reactions WHERE message_kind = ?1 AND message_id = ?2",
                rusqlite::params![kind, message_id],
            )?;
            let deleted = tx.execute(
                &format!("DELETE FROM {table} WHERE id = ?1"),
                [message_id],
            )?;
            tx.commit()?;
            Ok(deleted > 0)
        })
    }

    // -- Reactions --

    /// Toggle a reaction: removes if exists, inserts if not.
    /// Returns true if the reaction was added, false if removed.
    pub fn toggle_reaction(
        &self,
        id: &str,
        kind: &str,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM reactions
                     WHERE message_kind = ?1 AND message_id = ?2 AND user_id = ?3 AND emoji = ?4",
                    rusqlite::params![kind, message_id, user_id, emoji],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing_id) = existing {
                conn.execute("DELETE FROM reactions WHERE id = ?1", [&existing_id])?;
                Ok(false)
            } else {
                conn.execute(
                    "INSERT INTO reactions (id, message_kind, message_id, user_id, emoji)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![id, kind, message_id, user_id, emoji],
                )?;
                Ok(true)
            }
        })
    }

    /// The full reaction set for one message, pushed after every toggle.
    pub fn reactions_for_message(&self, kind: &str, message_id: &str) -> Result<Vec<ReactionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message_id, user_id, emoji FROM reactions
                 WHERE message_kind = ?1 AND message_id = ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![kind, message_id], |row| {
                    Ok(ReactionRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        user_id: row.get(2)?,
                        emoji: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch reactions for a page of messages.
    pub fn reactions_for_messages(
        &self,
        kind: &str,
        message_ids: &[String],
    ) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (2..=message_ids.len() + 1).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, message_id, user_id, emoji FROM reactions
                 WHERE message_kind = ?1 AND message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&kind];
            params.extend(
                message_ids
                    .iter()
                    .map(|id| id as &dyn rusqlite::types::ToSql),
            );

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReactionRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        user_id: row.get(2)?,
                        emoji: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user("u-alice", "alice", None).unwrap();
        db.create_user("u-bob", "bob", Some("avatars/bob.png")).unwrap();
        db.create_user("u-carol", "carol", None).unwrap();
        db.create_room("r-main", "main", None).unwrap();
        db.add_room_member("r-main", "u-alice").unwrap();
        db.add_room_member("r-main", "u-bob").unwrap();
        db
    }

    fn ts(n: u32) -> String {
        format!("2026-08-07T10:00:{:02}.000000Z", n)
    }

    #[test]
    fn group_history_pages_newest_first() {
        let db = seeded();
        for i in 0..45u32 {
            db.insert_group_message(&format!("m-{i:03}"), "r-main", "u-alice", &format!("msg {i}"), &ts(i))
                .unwrap();
        }

        let first = db.group_history("r-main", 30, 0).unwrap();
        assert_eq!(first.len(), 30);
        assert_eq!(first[0].content, "msg 44");
        assert_eq!(first[0].sender_name, "alice");

        let second = db.group_history("r-main", 30, 30).unwrap();
        assert_eq!(second.len(), 15);
        assert_eq!(second[14].content, "msg 0");
    }

    #[test]
    fn toggle_reaction_is_exclusive_per_user_emoji() {
        let db = seeded();
        db.insert_group_message("m-1", "r-main", "u-alice", "hi", &ts(0)).unwrap();

        assert!(db.toggle_reaction("re-1", "room", "m-1", "u-bob", "👍").unwrap());
        // second identical toggle removes rather than duplicating
        assert!(!db.toggle_reaction("re-2", "room", "m-1", "u-bob", "👍").unwrap());
        assert!(db.reactions_for_message("room", "m-1").unwrap().is_empty());

        // toggle pair lands back where it started: exactly one row after re-add
        assert!(db.toggle_reaction("re-3", "room", "m-1", "u-bob", "👍").unwrap());
        let set = db.reactions_for_message("room", "m-1").unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].emoji, "👍");
    }

    #[test]
    fn delete_cascades_reactions() {
        let db = seeded();
        db.insert_group_message("m-9", "r-main", "u-alice", "bye", &ts(0)).unwrap();
        db.toggle_reaction("re-1", "room", "m-9", "u-bob", "😀").unwrap();

        assert_eq!(db.message_sender("room", "m-9").unwrap().as_deref(), Some("u-alice"));
        assert!(db.delete_message("room", "m-9").unwrap());
        assert!(db.reactions_for_message("room", "m-9").unwrap().is_empty());
        assert!(db.message_sender("room", "m-9").unwrap().is_none());

        // deleting again is a no-op
        assert!(!db.delete_message("room", "m-9").unwrap());
    }

    #[test]
    fn direct_conversations_keep_latest_message_per_counterpart() {
        let db = seeded();
        db.insert_direct_message("d-1", "u-alice", "u-bob", "hey bob", &ts(1)).unwrap();
        db.insert_direct_message("d-2", "u-bob", "u-alice", "hey alice", &ts(2)).unwrap();
        db.insert_direct_message("d-3", "u-alice", "u-carol", "hey carol", &ts(3)).unwrap();

        let list = db.direct_conversations("u-alice").unwrap();
        assert_eq!(list.len(), 2);
        // newest counterpart first
        assert_eq!(list[0].peer_id, "u-carol");
        assert_eq!(list[0].last_message, "hey carol");
        assert_eq!(list[1].peer_id, "u-bob");
        assert_eq!(list[1].last_message, "hey alice");
        assert_eq!(list[1].last_sender_id, "u-bob");
    }

    #[test]
    fn direct_history_spans_both_directions() {
        let db = seeded();
        db.insert_direct_message("d-1", "u-alice", "u-bob", "one", &ts(1)).unwrap();
        db.insert_direct_message("d-2", "u-bob", "u-alice", "two", &ts(2)).unwrap();
        db.insert_direct_message("d-3", "u-alice", "u-carol", "other thread", &ts(3)).unwrap();

        let page = db.direct_history("u-alice", "u-bob", 30, 0).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content, "two");
        assert_eq!(page[1].content, "one");
    }

    #[test]
    fn rooms_for_user_carry_last_message() {
        let db = seeded();
        db.insert_group_message("m-1", "r-main", "u-bob", "first", &ts(1)).unwrap();
        db.insert_group_message("m-2", "r-main", "u-alice", "latest", &ts(2)).unwrap();

        let rooms = db.rooms_for_user("u-alice").unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].last_message.as_deref(), Some("latest"));

        // carol is in no rooms
        assert!(db.rooms_for_user("u-carol").unwrap().is_empty());
    }
}
