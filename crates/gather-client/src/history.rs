use tracing::debug;
use uuid::Uuid;

use gather_types::models::{ChatMessage, ConversationId, Reaction};

/// Fixed history page size. The server is asked for exactly this many
/// messages per page; a short page means the top has been reached.
pub const PAGE_SIZE: u32 = 30;

/// A REST page fetch the caller should perform. The generation tag lets the
/// store drop results that resolve after the conversation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub conversation: ConversationId,
    pub generation: u64,
    pub skip: u32,
    pub take: u32,
}

/// What applying a push did, mostly for tests and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// A local optimistic entry was reconciled with its canonical identity.
    Confirmed,
    /// A new confirmed message was inserted.
    Inserted,
    /// The message was already present by canonical id.
    Duplicate,
}

/// The message list for the currently open conversation: the union of
/// fetched history pages and the live stream, deduplicated by canonical id
/// (optimistic entries keyed by temp id until reconciled) and ordered
/// ascending by `(created_at, id)`.
#[derive(Debug)]
pub struct ConversationHistory {
    conversation: ConversationId,
    generation: u64,
    /// Oldest-first.
    messages: Vec<ChatMessage>,
    /// Server-side cursor: how many confirmed rows have been fetched.
    fetched: u32,
    has_more: bool,
    load_in_flight: bool,
    loaded_once: bool,
}

impl ConversationHistory {
    pub fn new(conversation: ConversationId, generation: u64) -> Self {
        Self {
            conversation,
            generation,
            messages: Vec::new(),
            fetched: 0,
            has_more: true,
            load_in_flight: false,
            loaded_once: false,
        }
    }

    pub fn conversation(&self) -> ConversationId {
        self.conversation
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Kick off the initial page load for a freshly opened conversation.
    pub fn begin_initial_load(&mut self) -> Option<PageRequest> {
        if self.loaded_once || self.load_in_flight {
            return None;
        }
        self.load_in_flight = true;
        Some(PageRequest {
            conversation: self.conversation,
            generation: self.generation,
            skip: 0,
            take: PAGE_SIZE,
        })
    }

    /// Request the next older page. At most one load is in flight per
    /// conversation; duplicate triggers while one is pending return None.
    pub fn begin_older_load(&mut self) -> Option<PageRequest> {
        if self.load_in_flight || !self.has_more {
            return None;
        }
        self.load_in_flight = true;
        Some(PageRequest {
            conversation: self.conversation,
            generation: self.generation,
            skip: self.fetched,
            take: PAGE_SIZE,
        })
    }

    /// Merge a fetched page (newest-first, as the server returns it).
    /// Returns false — and changes nothing — when the result is stale.
    pub fn apply_page(&mut self, request: PageRequest, newest_first: Vec<ChatMessage>) -> bool {
        if request.conversation != self.conversation || request.generation != self.generation {
            debug!("dropping stale history page for {:?}", request.conversation);
            return false;
        }

        self.load_in_flight = false;
        self.loaded_once = true;
        self.fetched += newest_first.len() as u32;
        self.has_more = newest_first.len() as u32 == request.take;

        let mut incoming: Vec<ChatMessage> = newest_first
            .into_iter()
            .rev()
            .filter(|m| !self.contains_id(m.id()))
            .collect();
        if !incoming.is_empty() {
            self.messages.append(&mut incoming);
            self.messages.sort_by_key(|m| m.sort_key());
        }
        true
    }

    /// Insert this client's own optimistic message (always the newest thing
    /// the user has seen, so appending keeps order).
    pub fn insert_optimistic(&mut self, message: ChatMessage) {
        debug_assert!(message.is_optimistic() && message.temp_id().is_some());
        self.messages.push(message);
    }

    /// Apply a `MessageNew` push. Reconciles by temp id first, then dedups
    /// by canonical id, then inserts in `(created_at, id)` position (in
    /// practice an append, since pushes are "now").
    pub fn apply_push(&mut self, message: ChatMessage) -> PushOutcome {
        if let Some(temp_id) = message.temp_id() {
            if let Some(local) = self
                .messages
                .iter_mut()
                .find(|m| m.is_optimistic() && m.temp_id() == Some(temp_id))
            {
                let mut confirmed = message;
                confirmed.set_reactions(local.reactions().to_vec());
                let canonical_id = confirmed.id();
                let created_at = confirmed.created_at();
                *local = confirmed;
                local.confirm(canonical_id, created_at);
                self.messages.sort_by_key(|m| m.sort_key());
                return PushOutcome::Confirmed;
            }
        }

        if self.contains_id(message.id()) {
            return PushOutcome::Duplicate;
        }

        match self.messages.last() {
            Some(tail) if message.sort_key() < tail.sort_key() => {
                let at = self
                    .messages
                    .partition_point(|m| m.sort_key() < message.sort_key());
                self.messages.insert(at, message);
            }
            _ => self.messages.push(message),
        }
        PushOutcome::Inserted
    }

    /// Remove a message by canonical id (delete push).
    pub fn remove(&mut self, message_id: Uuid) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id() != message_id);
        self.messages.len() != before
    }

    /// Remove a local optimistic entry (discard after a failed send).
    pub fn remove_optimistic(&mut self, temp_id: Uuid) -> bool {
        let before = self.messages.len();
        self.messages
            .retain(|m| !(m.is_optimistic() && m.temp_id() == Some(temp_id)));
        self.messages.len() != before
    }

    /// Overwrite a message's reaction set with the server's authoritative
    /// one. Wins over any optimistic local flip.
    pub fn set_reactions(&mut self, message_id: Uuid, reactions: Vec<Reaction>) -> bool {
        if let Some(msg) = self.messages.iter_mut().find(|m| m.id() == message_id) {
            msg.set_reactions(reactions);
            true
        } else {
            false
        }
    }

    /// Optimistically flip one (user, emoji) reaction ahead of the server
    /// round-trip. The next `ReactionUpdated` push replaces the whole set.
    pub fn toggle_reaction_local(&mut self, message_id: Uuid, user_id: Uuid, emoji: &str) -> bool {
        let Some(msg) = self.messages.iter_mut().find(|m| m.id() == message_id) else {
            return false;
        };
        let mut set = msg.reactions().to_vec();
        let before = set.len();
        set.retain(|r| !(r.user_id == user_id && r.emoji == emoji));
        if set.len() == before {
            set.push(Reaction {
                id: Uuid::new_v4(),
                emoji: emoji.to_string(),
                user_id,
            });
        }
        msg.set_reactions(set);
        true
    }

    fn contains_id(&self, id: Uuid) -> bool {
        self.messages.iter().any(|m| !m.is_optimistic() && m.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn room_conv() -> ConversationId {
        ConversationId::room(Uuid::new_v4())
    }

    fn msg(conv: ConversationId, n: i64, content: &str) -> ChatMessage {
        let at = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap() + Duration::seconds(n);
        ChatMessage::Group {
            id: Uuid::new_v4(),
            temp_id: None,
            room_id: conv.id,
            sender_id: Uuid::new_v4(),
            sender_name: "peer".into(),
            content: content.into(),
            created_at: at,
            reactions: vec![],
            is_optimistic: false,
        }
    }

    fn optimistic(conv: ConversationId, content: &str) -> ChatMessage {
        let temp = Uuid::new_v4();
        ChatMessage::Group {
            id: temp,
            temp_id: Some(temp),
            room_id: conv.id,
            sender_id: Uuid::new_v4(),
            sender_name: "me".into(),
            content: content.into(),
            created_at: Utc::now(),
            reactions: vec![],
            is_optimistic: true,
        }
    }

    #[test]
    fn initial_page_renders_oldest_first() {
        let conv = room_conv();
        let mut history = ConversationHistory::new(conv, 1);
        let req = history.begin_initial_load().unwrap();
        assert_eq!(req.skip, 0);
        assert_eq!(req.take, PAGE_SIZE);

        // server returns newest-first
        let page: Vec<_> = (0..PAGE_SIZE as i64).rev().map(|n| msg(conv, n, &format!("m{n}"))).collect();
        assert!(history.apply_page(req, page));

        assert_eq!(history.messages().len(), PAGE_SIZE as usize);
        assert_eq!(history.messages()[0].content(), "m0");
        assert_eq!(history.messages().last().unwrap().content(), "m29");
        assert!(history.has_more());
    }

    #[test]
    fn older_loads_coalesce_and_short_page_ends_pagination() {
        let conv = room_conv();
        let mut history = ConversationHistory::new(conv, 1);
        let req = history.begin_initial_load().unwrap();
        let page: Vec<_> = (15..45).rev().map(|n| msg(conv, n, &format!("m{n}"))).collect();
        history.apply_page(req, page);

        let older = history.begin_older_load().unwrap();
        assert_eq!(older.skip, 30);
        // duplicate trigger while one is pending is ignored
        assert!(history.begin_older_load().is_none());

        let remainder: Vec<_> = (0..15).rev().map(|n| msg(conv, n, &format!("m{n}"))).collect();
        history.apply_page(older, remainder);

        assert_eq!(history.messages().len(), 45);
        assert_eq!(history.messages()[0].content(), "m0");
        assert!(!history.has_more());
        assert!(history.begin_older_load().is_none());
    }

    #[test]
    fn stale_page_for_an_old_generation_is_dropped() {
        let conv = room_conv();
        let mut history = ConversationHistory::new(conv, 1);
        let req = history.begin_initial_load().unwrap();

        // the conversation was switched away and back: new store, new generation
        let mut fresh = ConversationHistory::new(conv, 2);
        assert!(!fresh.apply_page(req, vec![msg(conv, 0, "stale")]));
        assert!(fresh.messages().is_empty());
    }

    #[test]
    fn push_reconciles_temp_id_idempotently() {
        let conv = room_conv();
        let mut history = ConversationHistory::new(conv, 1);
        let local = optimistic(conv, "hi");
        let temp = local.temp_id().unwrap();
        history.insert_optimistic(local);

        let mut confirmed = msg(conv, 0, "hi");
        if let ChatMessage::Group { temp_id, .. } = &mut confirmed {
            *temp_id = Some(temp);
        }
        let canonical = confirmed.id();

        assert_eq!(history.apply_push(confirmed.clone()), PushOutcome::Confirmed);
        assert_eq!(history.messages().len(), 1);
        assert_eq!(history.messages()[0].id(), canonical);
        assert!(!history.messages()[0].is_optimistic());
        assert_eq!(history.messages()[0].temp_id(), None);

        // replaying the same confirmation yields the same final state
        assert_eq!(history.apply_push(confirmed), PushOutcome::Duplicate);
        assert_eq!(history.messages().len(), 1);
    }

    #[test]
    fn pushes_never_duplicate_paged_messages() {
        let conv = room_conv();
        let mut history = ConversationHistory::new(conv, 1);
        let req = history.begin_initial_load().unwrap();
        let paged = msg(conv, 0, "already here");
        history.apply_page(req, vec![paged.clone()]);

        assert_eq!(history.apply_push(paged), PushOutcome::Duplicate);
        assert_eq!(history.messages().len(), 1);
    }

    #[test]
    fn late_arriving_push_is_inserted_in_order() {
        let conv = room_conv();
        let mut history = ConversationHistory::new(conv, 1);
        let req = history.begin_initial_load().unwrap();
        history.apply_page(req, vec![msg(conv, 10, "newest"), msg(conv, 0, "oldest")]);

        let middle = msg(conv, 5, "middle");
        assert_eq!(history.apply_push(middle), PushOutcome::Inserted);

        let contents: Vec<_> = history.messages().iter().map(|m| m.content()).collect();
        assert_eq!(contents, vec!["oldest", "middle", "newest"]);
    }

    #[test]
    fn rendering_order_is_ascending_created_at_then_id() {
        let conv = room_conv();
        let mut history = ConversationHistory::new(conv, 1);
        let req = history.begin_initial_load().unwrap();
        let page: Vec<_> = (0..10).rev().map(|n| msg(conv, n, &format!("m{n}"))).collect();
        history.apply_page(req, page);

        let mut keys: Vec<_> = history.messages().iter().map(|m| m.sort_key()).collect();
        let sorted = {
            let mut s = keys.clone();
            s.sort();
            s
        };
        assert_eq!(keys, sorted);
        keys.dedup();
        assert_eq!(keys.len(), history.messages().len());
    }

    #[test]
    fn optimistic_reaction_flip_then_authoritative_set_wins() {
        let conv = room_conv();
        let mut history = ConversationHistory::new(conv, 1);
        let req = history.begin_initial_load().unwrap();
        let target = msg(conv, 0, "react me");
        let target_id = target.id();
        history.apply_page(req, vec![target]);

        let me = Uuid::new_v4();
        assert!(history.toggle_reaction_local(target_id, me, "👍"));
        assert_eq!(history.messages()[0].reactions().len(), 1);
        // flipping again removes it locally
        assert!(history.toggle_reaction_local(target_id, me, "👍"));
        assert!(history.messages()[0].reactions().is_empty());

        // the push wins over whatever the local guess was
        let authoritative = vec![Reaction {
            id: Uuid::new_v4(),
            emoji: "🔥".into(),
            user_id: me,
        }];
        assert!(history.set_reactions(target_id, authoritative.clone()));
        assert_eq!(history.messages()[0].reactions(), authoritative.as_slice());
    }

    #[test]
    fn remove_drops_message_and_discard_drops_optimistic_entry() {
        let conv = room_conv();
        let mut history = ConversationHistory::new(conv, 1);
        let req = history.begin_initial_load().unwrap();
        let target = msg(conv, 0, "to delete");
        let target_id = target.id();
        history.apply_page(req, vec![target]);

        let local = optimistic(conv, "failed send");
        let temp = local.temp_id().unwrap();
        history.insert_optimistic(local);

        assert!(history.remove(target_id));
        assert!(!history.remove(target_id));
        assert!(history.remove_optimistic(temp));
        assert!(history.messages().is_empty());
    }
}
