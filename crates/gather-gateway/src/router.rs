use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use gather_db::Database;
use gather_types::events::{ErrorCode, GatewayEvent};
use gather_types::models::{ChatMessage, ConversationId, ConversationKind, Reaction};

use crate::dispatcher::Dispatcher;

/// The identity bound to a session at Identify (gateway) or by the JWT
/// middleware (REST). All router operations authorize against it.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RouteError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn into_event(self) -> GatewayEvent {
        GatewayEvent::Error {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Persists messages/reactions, authorizes delete/react, and fans events out
/// to all participants of the affected conversation (including the sender).
/// Shared by the WebSocket command loop and the REST fallback endpoints.
#[derive(Clone)]
pub struct MessageRouter {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl MessageRouter {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self { db, dispatcher }
    }

    /// Persist a room message and fan it out to current members. The returned
    /// message carries the caller's `temp_id` echo for reconciliation.
    pub async fn send_group_message(
        &self,
        sender: &Identity,
        room_id: Uuid,
        content: &str,
        temp_id: Option<Uuid>,
    ) -> Result<ChatMessage, RouteError> {
        let content = non_empty(content)?;
        let id = Uuid::new_v4();
        let created_at = Utc::now();

        let db = self.db.clone();
        let rid = room_id.to_string();
        let sid = sender.user_id.to_string();
        let body = content.clone();
        let ts = wire_timestamp(created_at);
        let member_ids = run_blocking(move || {
            if !db.room_exists(&rid)? {
                return Err(RouteError::NotFound(format!("room {rid} does not exist")));
            }
            if !db.is_room_member(&rid, &sid)? {
                return Err(RouteError::Forbidden(
                    "sender is not a member of this room".into(),
                ));
            }
            db.insert_group_message(&id.to_string(), &rid, &sid, &body, &ts)?;
            Ok(db.room_member_ids(&rid)?)
        })
        .await?;

        let message = ChatMessage::Group {
            id,
            temp_id,
            room_id,
            sender_id: sender.user_id,
            sender_name: sender.username.clone(),
            content,
            created_at,
            reactions: vec![],
            is_optimistic: false,
        };

        self.dispatcher
            .fan_out(
                &parse_ids(&member_ids),
                GatewayEvent::MessageNew {
                    message: message.clone(),
                },
            )
            .await;

        Ok(message)
    }

    /// Persist a direct message and fan it out to both parties.
    pub async fn send_direct_message(
        &self,
        sender: &Identity,
        recipient_id: Uuid,
        content: &str,
        temp_id: Option<Uuid>,
    ) -> Result<ChatMessage, RouteError> {
        let content = non_empty(content)?;
        let id = Uuid::new_v4();
        let created_at = Utc::now();

        let db = self.db.clone();
        let rid = recipient_id.to_string();
        let sid = sender.user_id.to_string();
        let body = content.clone();
        let ts = wire_timestamp(created_at);
        run_blocking(move || {
            if db.get_user(&rid)?.is_none() {
                return Err(RouteError::NotFound(format!("user {rid} does not exist")));
            }
            db.insert_direct_message(&id.to_string(), &sid, &rid, &body, &ts)?;
            Ok(())
        })
        .await?;

        let message = ChatMessage::Direct {
            id,
            temp_id,
            sender_id: sender.user_id,
            sender_name: sender.username.clone(),
            recipient_id,
            content,
            created_at,
            reactions: vec![],
            is_optimistic: false,
        };

        let mut participants = vec![sender.user_id];
        if recipient_id != sender.user_id {
            participants.push(recipient_id);
        }
        self.dispatcher
            .fan_out(
                &participants,
                GatewayEvent::MessageNew {
                    message: message.clone(),
                },
            )
            .await;

        Ok(message)
    }

    /// Delete a message. Only the original sender may delete; reactions are
    /// cascaded in the same transaction.
    pub async fn delete_message(
        &self,
        sender: &Identity,
        kind: ConversationKind,
        message_id: Uuid,
    ) -> Result<(), RouteError> {
        let db = self.db.clone();
        let mid = message_id.to_string();
        let sid = sender.user_id.to_string();
        let participants = run_blocking(move || {
            let author = db
                .message_sender(kind.as_str(), &mid)?
                .ok_or_else(|| RouteError::NotFound(format!("message {mid} does not exist")))?;
            if author != sid {
                return Err(RouteError::Forbidden(
                    "only the sender may delete a message".into(),
                ));
            }
            let participants = participants_of(&db, kind, &mid)?;
            db.delete_message(kind.as_str(), &mid)?;
            Ok(participants)
        })
        .await?;

        self.dispatcher
            .fan_out(
                &parse_ids(&participants),
                GatewayEvent::MessageDeleted { kind, message_id },
            )
            .await;

        Ok(())
    }

    /// Toggle a (user, message, emoji) reaction and push the authoritative
    /// reaction set to all participants. Returns whether it was added.
    pub async fn toggle_reaction(
        &self,
        sender: &Identity,
        kind: ConversationKind,
        message_id: Uuid,
        emoji: &str,
    ) -> Result<bool, RouteError> {
        if emoji.trim().is_empty() {
            return Err(RouteError::Validation("emoji must not be empty".into()));
        }

        let db = self.db.clone();
        let mid = message_id.to_string();
        let sid = sender.user_id.to_string();
        let emoji_owned = emoji.to_string();
        let reaction_id = Uuid::new_v4();
        let (added, rows, participants) = run_blocking(move || {
            if db.message_sender(kind.as_str(), &mid)?.is_none() {
                return Err(RouteError::NotFound(format!("message {mid} does not exist")));
            }
            let added = db.toggle_reaction(
                &reaction_id.to_string(),
                kind.as_str(),
                &mid,
                &sid,
                &emoji_owned,
            )?;
            let rows = db.reactions_for_message(kind.as_str(), &mid)?;
            let participants = participants_of(&db, kind, &mid)?;
            Ok((added, rows, participants))
        })
        .await?;

        let reactions: Vec<Reaction> = rows
            .into_iter()
            .filter_map(|r| {
                match (r.id.parse(), r.user_id.parse()) {
                    (Ok(id), Ok(user_id)) => Some(Reaction {
                        id,
                        emoji: r.emoji,
                        user_id,
                    }),
                    _ => {
                        warn!("Corrupt reaction row '{}' on message '{}'", r.id, r.message_id);
                        None
                    }
                }
            })
            .collect();

        self.dispatcher
            .fan_out(
                &parse_ids(&participants),
                GatewayEvent::ReactionUpdated {
                    kind,
                    message_id,
                    reactions,
                },
            )
            .await;

        Ok(added)
    }

    /// Relay ephemeral typing state to the other participants. Nothing is
    /// persisted; the sender's own indicator stays local to their client.
    pub async fn typing(
        &self,
        sender: &Identity,
        conversation: ConversationId,
        started: bool,
    ) -> Result<(), RouteError> {
        match conversation.kind {
            ConversationKind::Room => {
                let db = self.db.clone();
                let rid = conversation.id.to_string();
                let members = run_blocking(move || Ok(db.room_member_ids(&rid)?)).await?;
                let targets: Vec<Uuid> = parse_ids(&members)
                    .into_iter()
                    .filter(|uid| *uid != sender.user_id)
                    .collect();
                self.dispatcher
                    .fan_out(&targets, typing_event(sender, conversation, started))
                    .await;
            }
            ConversationKind::Direct => {
                // Rewrite the conversation id to the receiver's perspective:
                // from the peer's side, this DM thread is keyed by the sender.
                let peer = conversation.id;
                let rewritten = ConversationId::direct(sender.user_id);
                self.dispatcher
                    .send_to_user(peer, typing_event(sender, rewritten, started))
                    .await;
            }
        }
        Ok(())
    }
}

fn typing_event(sender: &Identity, conversation: ConversationId, started: bool) -> GatewayEvent {
    if started {
        GatewayEvent::UserTyping {
            conversation,
            user_id: sender.user_id,
            name: sender.username.clone(),
        }
    } else {
        GatewayEvent::UserStoppedTyping {
            conversation,
            user_id: sender.user_id,
        }
    }
}

fn non_empty(content: &str) -> Result<String, RouteError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(RouteError::Validation("content must not be empty".into()));
    }
    Ok(trimmed.to_string())
}

/// Stable wire/storage timestamp: fixed-width RFC 3339 so lexicographic
/// order in SQLite matches chronological order.
fn wire_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ids(ids: &[String]) -> Vec<Uuid> {
    ids.iter()
        .filter_map(|s| match s.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("Corrupt user id '{}' in participant list", s);
                None
            }
        })
        .collect()
}

fn participants_of(
    db: &Database,
    kind: ConversationKind,
    message_id: &str,
) -> Result<Vec<String>, RouteError> {
    match kind {
        ConversationKind::Room => {
            let room = db
                .group_message_room(message_id)?
                .ok_or_else(|| RouteError::NotFound(format!("message {message_id} does not exist")))?;
            Ok(db.room_member_ids(&room)?)
        }
        ConversationKind::Direct => {
            let (sender, recipient) = db
                .direct_message_parties(message_id)?
                .ok_or_else(|| RouteError::NotFound(format!("message {message_id} does not exist")))?;
            if sender == recipient {
                Ok(vec![sender])
            } else {
                Ok(vec![sender, recipient])
            }
        }
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, RouteError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RouteError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RouteError::Internal(anyhow::anyhow!("spawn_blocking join error: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        router: MessageRouter,
        dispatcher: Dispatcher,
        alice: Identity,
        bob: Identity,
        room_id: Uuid,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let alice = Identity {
            user_id: Uuid::new_v4(),
            username: "alice".into(),
        };
        let bob = Identity {
            user_id: Uuid::new_v4(),
            username: "bob".into(),
        };
        let room_id = Uuid::new_v4();

        db.create_user(&alice.user_id.to_string(), "alice", None).unwrap();
        db.create_user(&bob.user_id.to_string(), "bob", None).unwrap();
        db.create_room(&room_id.to_string(), "main", None).unwrap();
        db.add_room_member(&room_id.to_string(), &alice.user_id.to_string()).unwrap();
        db.add_room_member(&room_id.to_string(), &bob.user_id.to_string()).unwrap();

        let dispatcher = Dispatcher::new();
        let router = MessageRouter::new(db, dispatcher.clone());
        Fixture {
            router,
            dispatcher,
            alice,
            bob,
            room_id,
        }
    }

    #[tokio::test]
    async fn group_send_fans_out_to_members_with_temp_echo() {
        let fx = fixture();
        let (_, mut alice_rx) = fx.dispatcher.register_user_channel(fx.alice.user_id).await;
        let (_, mut bob_rx) = fx.dispatcher.register_user_channel(fx.bob.user_id).await;

        let temp_id = Uuid::new_v4();
        let sent = fx
            .router
            .send_group_message(&fx.alice, fx.room_id, "hello room", Some(temp_id))
            .await
            .unwrap();
        assert_eq!(sent.temp_id(), Some(temp_id));

        for rx in [&mut alice_rx, &mut bob_rx] {
            match rx.try_recv().unwrap() {
                GatewayEvent::MessageNew { message } => {
                    assert_eq!(message.id(), sent.id());
                    assert_eq!(message.temp_id(), Some(temp_id));
                    assert_eq!(message.content(), "hello room");
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn empty_content_is_rejected_without_side_effects() {
        let fx = fixture();
        let err = fx
            .router
            .send_group_message(&fx.alice, fx.room_id, "   ", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Validation(_)));
    }

    #[tokio::test]
    async fn non_member_cannot_post_to_room() {
        let fx = fixture();
        let mallory = Identity {
            user_id: Uuid::new_v4(),
            username: "mallory".into(),
        };
        let err = fx
            .router
            .send_group_message(&mallory, fx.room_id, "hi", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Forbidden(_)));
    }

    #[tokio::test]
    async fn only_the_sender_may_delete() {
        let fx = fixture();
        let sent = fx
            .router
            .send_direct_message(&fx.alice, fx.bob.user_id, "hi bob", None)
            .await
            .unwrap();

        let err = fx
            .router
            .delete_message(&fx.bob, ConversationKind::Direct, sent.id())
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Forbidden(_)));

        let (_, mut bob_rx) = fx.dispatcher.register_user_channel(fx.bob.user_id).await;
        fx.router
            .delete_message(&fx.alice, ConversationKind::Direct, sent.id())
            .await
            .unwrap();

        match bob_rx.try_recv().unwrap() {
            GatewayEvent::MessageDeleted { message_id, .. } => assert_eq!(message_id, sent.id()),
            other => panic!("unexpected event: {other:?}"),
        }

        // gone now
        let err = fx
            .router
            .delete_message(&fx.alice, ConversationKind::Direct, sent.id())
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::NotFound(_)));
    }

    #[tokio::test]
    async fn reaction_toggle_pushes_authoritative_set() {
        let fx = fixture();
        let sent = fx
            .router
            .send_group_message(&fx.alice, fx.room_id, "react to me", None)
            .await
            .unwrap();

        let (_, mut alice_rx) = fx.dispatcher.register_user_channel(fx.alice.user_id).await;

        let added = fx
            .router
            .toggle_reaction(&fx.bob, ConversationKind::Room, sent.id(), "👍")
            .await
            .unwrap();
        assert!(added);
        match alice_rx.try_recv().unwrap() {
            GatewayEvent::ReactionUpdated { reactions, .. } => {
                assert_eq!(reactions.len(), 1);
                assert_eq!(reactions[0].user_id, fx.bob.user_id);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // second identical toggle removes; the pushed set is empty
        let added = fx
            .router
            .toggle_reaction(&fx.bob, ConversationKind::Room, sent.id(), "👍")
            .await
            .unwrap();
        assert!(!added);
        match alice_rx.try_recv().unwrap() {
            GatewayEvent::ReactionUpdated { reactions, .. } => assert!(reactions.is_empty()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn direct_typing_is_rewritten_to_the_receivers_perspective() {
        let fx = fixture();
        let (_, mut bob_rx) = fx.dispatcher.register_user_channel(fx.bob.user_id).await;

        fx.router
            .typing(&fx.alice, ConversationId::direct(fx.bob.user_id), true)
            .await
            .unwrap();

        match bob_rx.try_recv().unwrap() {
            GatewayEvent::UserTyping {
                conversation,
                user_id,
                name,
            } => {
                assert_eq!(conversation, ConversationId::direct(fx.alice.user_id));
                assert_eq!(user_id, fx.alice.user_id);
                assert_eq!(name, "alice");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
