use std::path::Path;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use rusqlite::Connection;
use tracing::{info, warn};

use gather_types::models::ConversationSummary;

use crate::ClientError;

/// Durable read-through cache of conversation summaries, keyed by
/// `(kind, id)`. The UI renders these instantly on load; REST snapshots
/// overwrite entries as they arrive (last write wins).
///
/// Writes go through an unbounded channel to a dedicated writer thread and
/// never block the caller. Only summaries are persisted — message history is
/// always re-fetched when a conversation is opened.
pub struct SummaryCache {
    tx: Sender<CacheOp>,
    writer: Option<JoinHandle<()>>,
}

enum CacheOp {
    Upsert(Vec<ConversationSummary>),
    /// Test/shutdown aid: acknowledged once every prior op has been applied.
    Flush(Sender<()>),
    Shutdown,
}

impl SummaryCache {
    /// Open (or create) the cache and return whatever it already holds.
    pub fn open(path: &Path) -> Result<(Self, Vec<ConversationSummary>), ClientError> {
        let conn = Connection::open(path).map_err(|e| ClientError::Cache(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversation_summaries (
                kind     TEXT NOT NULL,
                id       TEXT NOT NULL,
                payload  TEXT NOT NULL,
                PRIMARY KEY (kind, id)
            );",
        )
        .map_err(|e| ClientError::Cache(e.to_string()))?;

        let cached = load_all(&conn).map_err(|e| ClientError::Cache(e.to_string()))?;
        info!("Summary cache opened with {} entries", cached.len());

        let (tx, rx) = unbounded();
        let writer = std::thread::spawn(move || writer_loop(conn, rx));

        Ok((
            Self {
                tx,
                writer: Some(writer),
            },
            cached,
        ))
    }

    /// Fire-and-forget bulk upsert. Never blocks; failures are logged by the
    /// writer thread and self-heal on the next snapshot.
    pub fn upsert(&self, summaries: Vec<ConversationSummary>) {
        if summaries.is_empty() {
            return;
        }
        let _ = self.tx.send(CacheOp::Upsert(summaries));
    }

    /// Wait until every previously enqueued write has been applied.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = bounded(1);
        if self.tx.send(CacheOp::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }
}

impl Drop for SummaryCache {
    fn drop(&mut self) {
        let _ = self.tx.send(CacheOp::Shutdown);
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

fn writer_loop(conn: Connection, rx: Receiver<CacheOp>) {
    while let Ok(op) = rx.recv() {
        match op {
            CacheOp::Upsert(summaries) => {
                for summary in &summaries {
                    if let Err(e) = upsert_one(&conn, summary) {
                        warn!("Cache write failed: {}", e);
                    }
                }
            }
            CacheOp::Flush(ack) => {
                let _ = ack.send(());
            }
            CacheOp::Shutdown => break,
        }
    }
}

fn upsert_one(conn: &Connection, summary: &ConversationSummary) -> rusqlite::Result<()> {
    let cid = summary.conversation.conversation_id();
    let payload = match serde_json::to_string(summary) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Unserializable summary for {:?}: {}", cid, e);
            return Ok(());
        }
    };
    conn.execute(
        "INSERT INTO conversation_summaries (kind, id, payload) VALUES (?1, ?2, ?3)
         ON CONFLICT(kind, id) DO UPDATE SET payload = excluded.payload",
        rusqlite::params![cid.kind.as_str(), cid.id.to_string(), payload],
    )?;
    Ok(())
}

fn load_all(conn: &Connection) -> rusqlite::Result<Vec<ConversationSummary>> {
    let mut stmt = conn.prepare("SELECT payload FROM conversation_summaries")?;
    let payloads = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(payloads
        .iter()
        .filter_map(|payload| match serde_json::from_str(payload) {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("Dropping corrupt cache entry: {}", e);
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use gather_types::models::{Conversation, ConversationId};
    use uuid::Uuid;

    fn temp_db() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("gather-cache-test-{}.db", Uuid::new_v4()))
    }

    fn summary(peer: Uuid, name: &str, last: &str) -> ConversationSummary {
        ConversationSummary {
            conversation: Conversation::DirectPeer {
                id: peer,
                name: name.into(),
                image_ref: None,
                is_online: false,
                last_seen_at: None,
            },
            last_message: Some(last.into()),
            last_message_at: Some(Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap()),
            unseen_count: 3,
        }
    }

    #[test]
    fn upserts_survive_reopen() {
        let path = temp_db();
        let peer = Uuid::new_v4();

        {
            let (cache, cached) = SummaryCache::open(&path).unwrap();
            assert!(cached.is_empty());
            cache.upsert(vec![summary(peer, "bob", "hello")]);
            cache.flush();
        }

        let (_cache, cached) = SummaryCache::open(&path).unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].last_message.as_deref(), Some("hello"));
        assert_eq!(
            cached[0].conversation.conversation_id(),
            ConversationId::direct(peer)
        );

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn last_write_wins_per_key() {
        let path = temp_db();
        let peer = Uuid::new_v4();

        {
            let (cache, _) = SummaryCache::open(&path).unwrap();
            cache.upsert(vec![summary(peer, "bob", "first")]);
            cache.upsert(vec![summary(peer, "bob", "second")]);
            cache.flush();
        }

        let (_cache, cached) = SummaryCache::open(&path).unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].last_message.as_deref(), Some("second"));

        let _ = std::fs::remove_file(&path);
    }
}
