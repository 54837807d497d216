use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use gather_types::api::{DirectConversationEntry, RoomOverview};
use gather_types::models::{
    ChatMessage, Conversation, ConversationId, ConversationKind, ConversationSummary,
};

/// The user's room list and direct-peer list, each item carrying a summary
/// (last message, timestamp, unseen count, online flag for peers).
///
/// Entities live in flat maps keyed by id; relationships are id references.
/// Snapshots come from REST; increments come from gateway pushes. Unseen
/// counts are purely local and reset the instant a conversation is opened.
#[derive(Debug)]
pub struct ConversationDirectory {
    me: Uuid,
    rooms: HashMap<Uuid, ConversationSummary>,
    peers: HashMap<Uuid, ConversationSummary>,
    selected: Option<ConversationId>,
}

impl ConversationDirectory {
    pub fn new(me: Uuid) -> Self {
        Self {
            me,
            rooms: HashMap::new(),
            peers: HashMap::new(),
            selected: None,
        }
    }

    /// Seed from the local cache before any network fetch resolves.
    pub fn apply_cached(&mut self, summaries: Vec<ConversationSummary>) {
        for mut summary in summaries {
            // cached unseen counts are stale by definition
            summary.unseen_count = 0;
            match summary.conversation.conversation_id() {
                ConversationId {
                    kind: ConversationKind::Room,
                    id,
                } => {
                    self.rooms.entry(id).or_insert(summary);
                }
                ConversationId {
                    kind: ConversationKind::Direct,
                    id,
                } => {
                    self.peers.entry(id).or_insert(summary);
                }
            }
        }
    }

    /// Merge the room snapshot. Last snapshot wins per field; the local
    /// unseen count survives because the server does not track read state.
    pub fn apply_room_snapshot(&mut self, rooms: Vec<RoomOverview>) {
        for room in rooms {
            let unseen = self.rooms.get(&room.room_id).map_or(0, |s| s.unseen_count);
            self.rooms.insert(
                room.room_id,
                ConversationSummary {
                    conversation: Conversation::Room {
                        id: room.room_id,
                        name: room.name,
                        image_ref: room.image_ref,
                        member_ids: room.member_ids,
                    },
                    last_message: room.last_message,
                    last_message_at: room.last_message_at,
                    unseen_count: unseen,
                },
            );
        }
    }

    /// Merge the direct-conversation snapshot.
    pub fn apply_direct_snapshot(&mut self, entries: Vec<DirectConversationEntry>) {
        for entry in entries {
            let existing = self.peers.get(&entry.peer_id);
            let unseen = existing.map_or(0, |s| s.unseen_count);
            let (is_online, last_seen_at) = match existing.map(|s| &s.conversation) {
                Some(Conversation::DirectPeer {
                    is_online,
                    last_seen_at,
                    ..
                }) => (*is_online, *last_seen_at),
                _ => (false, None),
            };
            self.peers.insert(
                entry.peer_id,
                ConversationSummary {
                    conversation: Conversation::DirectPeer {
                        id: entry.peer_id,
                        name: entry.peer_name,
                        image_ref: entry.peer_image_ref,
                        is_online,
                        last_seen_at,
                    },
                    last_message: Some(entry.last_message),
                    last_message_at: Some(entry.last_message_at),
                    unseen_count: unseen,
                },
            );
        }
    }

    /// Open a conversation: unseen resets to 0 the instant it is selected.
    pub fn select(&mut self, conversation: Option<ConversationId>) {
        self.selected = conversation;
        if let Some(cid) = conversation {
            if let Some(summary) = self.summary_mut(cid) {
                summary.unseen_count = 0;
            }
        }
    }

    pub fn selected(&self) -> Option<ConversationId> {
        self.selected
    }

    /// Fold a `MessageNew` push into the summaries: bump last message if it
    /// is the newest observed, and count it unseen unless the conversation
    /// is currently open or we sent it ourselves.
    pub fn record_message(&mut self, message: &ChatMessage) {
        let cid = message.conversation_id(self.me);
        let own = message.sender_id() == self.me;
        let open = self.selected == Some(cid);

        let summary = match self.summary_mut(cid) {
            Some(summary) => summary,
            None => {
                // First exchange with an unknown counterpart: materialize a
                // minimal entry; the next snapshot fills in the image ref.
                if cid.kind != ConversationKind::Direct {
                    return;
                }
                let name = if own {
                    // we know nothing about the peer yet
                    String::new()
                } else {
                    message.sender_name().to_string()
                };
                self.peers.entry(cid.id).or_insert(ConversationSummary::new(
                    Conversation::DirectPeer {
                        id: cid.id,
                        name,
                        image_ref: None,
                        is_online: false,
                        last_seen_at: None,
                    },
                ))
            }
        };

        if summary.last_message_at.is_none_or(|at| message.created_at() >= at) {
            summary.last_message = Some(message.content().to_string());
            summary.last_message_at = Some(message.created_at());
        }
        if !open && !own {
            summary.unseen_count += 1;
        }
    }

    /// Presence flips the peer's online flag; going offline stamps last-seen.
    pub fn apply_presence(&mut self, user_id: Uuid, online: bool, at: DateTime<Utc>) {
        if let Some(summary) = self.peers.get_mut(&user_id) {
            if let Conversation::DirectPeer {
                is_online,
                last_seen_at,
                ..
            } = &mut summary.conversation
            {
                if *is_online && !online {
                    *last_seen_at = Some(at);
                }
                *is_online = online;
            }
        }
    }

    pub fn unseen_count(&self, conversation: ConversationId) -> u32 {
        self.summary(conversation).map_or(0, |s| s.unseen_count)
    }

    pub fn summary(&self, conversation: ConversationId) -> Option<&ConversationSummary> {
        match conversation.kind {
            ConversationKind::Room => self.rooms.get(&conversation.id),
            ConversationKind::Direct => self.peers.get(&conversation.id),
        }
    }

    fn summary_mut(&mut self, conversation: ConversationId) -> Option<&mut ConversationSummary> {
        match conversation.kind {
            ConversationKind::Room => self.rooms.get_mut(&conversation.id),
            ConversationKind::Direct => self.peers.get_mut(&conversation.id),
        }
    }

    /// All summaries ordered by last activity descending; conversations with
    /// no messages sort last.
    pub fn ordered(&self) -> Vec<&ConversationSummary> {
        let mut all: Vec<&ConversationSummary> =
            self.rooms.values().chain(self.peers.values()).collect();
        all.sort_by(|a, b| match (b.last_message_at, a.last_message_at) {
            (Some(b_at), Some(a_at)) => b_at.cmp(&a_at),
            (Some(_), None) => std::cmp::Ordering::Greater,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (None, None) => a.conversation.name().cmp(b.conversation.name()),
        });
        all
    }

    /// Everything worth persisting to the local cache.
    pub fn snapshot_for_cache(&self) -> Vec<ConversationSummary> {
        self.rooms.values().chain(self.peers.values()).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(n: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, n).unwrap()
    }

    fn incoming_dm(me: Uuid, peer: Uuid, content: &str, n: u32) -> ChatMessage {
        ChatMessage::Direct {
            id: Uuid::new_v4(),
            temp_id: None,
            sender_id: peer,
            sender_name: "peer".into(),
            recipient_id: me,
            content: content.into(),
            created_at: at(n),
            reactions: vec![],
            is_optimistic: false,
        }
    }

    #[test]
    fn unseen_increments_until_opened_then_resets() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut dir = ConversationDirectory::new(me);

        dir.record_message(&incoming_dm(me, peer, "one", 1));
        dir.record_message(&incoming_dm(me, peer, "two", 2));
        let cid = ConversationId::direct(peer);
        assert_eq!(dir.unseen_count(cid), 2);

        dir.select(Some(cid));
        assert_eq!(dir.unseen_count(cid), 0);

        // messages for the open conversation don't count as unseen
        dir.record_message(&incoming_dm(me, peer, "three", 3));
        assert_eq!(dir.unseen_count(cid), 0);
        assert_eq!(dir.summary(cid).unwrap().last_message.as_deref(), Some("three"));
    }

    #[test]
    fn own_messages_never_count_as_unseen() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut dir = ConversationDirectory::new(me);

        let own = ChatMessage::Direct {
            id: Uuid::new_v4(),
            temp_id: None,
            sender_id: me,
            sender_name: "me".into(),
            recipient_id: peer,
            content: "hello".into(),
            created_at: at(1),
            reactions: vec![],
            is_optimistic: false,
        };
        dir.record_message(&own);
        assert_eq!(dir.unseen_count(ConversationId::direct(peer)), 0);
    }

    #[test]
    fn late_pushes_do_not_regress_the_last_message() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut dir = ConversationDirectory::new(me);

        dir.record_message(&incoming_dm(me, peer, "newer", 5));
        dir.record_message(&incoming_dm(me, peer, "older", 1));

        let summary = dir.summary(ConversationId::direct(peer)).unwrap();
        assert_eq!(summary.last_message.as_deref(), Some("newer"));
        assert_eq!(summary.last_message_at, Some(at(5)));
    }

    #[test]
    fn ordering_is_latest_activity_first_with_empty_conversations_last() {
        let me = Uuid::new_v4();
        let mut dir = ConversationDirectory::new(me);

        dir.apply_room_snapshot(vec![
            RoomOverview {
                room_id: Uuid::new_v4(),
                name: "quiet".into(),
                image_ref: None,
                member_ids: vec![me],
                last_message: None,
                last_message_at: None,
            },
            RoomOverview {
                room_id: Uuid::new_v4(),
                name: "busy".into(),
                image_ref: None,
                member_ids: vec![me],
                last_message: Some("latest".into()),
                last_message_at: Some(at(10)),
            },
        ]);
        let peer = Uuid::new_v4();
        dir.record_message(&incoming_dm(me, peer, "dm", 5));

        let names: Vec<_> = dir.ordered().iter().map(|s| s.conversation.name().to_string()).collect();
        assert_eq!(names[0], "busy");
        assert_eq!(names[1], "peer");
        assert_eq!(names[2], "quiet");
    }

    #[test]
    fn snapshot_preserves_local_unseen_and_presence() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut dir = ConversationDirectory::new(me);

        dir.record_message(&incoming_dm(me, peer, "hi", 1));
        dir.apply_presence(peer, true, at(2));

        dir.apply_direct_snapshot(vec![DirectConversationEntry {
            peer_id: peer,
            peer_name: "bob".into(),
            peer_image_ref: Some("avatars/bob.png".into()),
            last_message: "hi".into(),
            last_message_at: at(1),
            last_sender_id: peer,
        }]);

        let cid = ConversationId::direct(peer);
        let summary = dir.summary(cid).unwrap();
        assert_eq!(summary.unseen_count, 1);
        match &summary.conversation {
            Conversation::DirectPeer {
                name, is_online, ..
            } => {
                assert_eq!(name, "bob");
                assert!(is_online);
            }
            other => panic!("unexpected conversation: {other:?}"),
        }
    }

    #[test]
    fn going_offline_stamps_last_seen() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut dir = ConversationDirectory::new(me);
        dir.record_message(&incoming_dm(me, peer, "hi", 1));

        dir.apply_presence(peer, true, at(2));
        dir.apply_presence(peer, false, at(3));

        match &dir.summary(ConversationId::direct(peer)).unwrap().conversation {
            Conversation::DirectPeer {
                is_online,
                last_seen_at,
                ..
            } => {
                assert!(!is_online);
                assert_eq!(*last_seen_at, Some(at(3)));
            }
            other => panic!("unexpected conversation: {other:?}"),
        }
    }
}
