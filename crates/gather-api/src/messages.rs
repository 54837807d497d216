use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use gather_db::models::ReactionRow;
use gather_gateway::router::Identity;
use gather_types::api::{Claims, SendMessageRequest};
use gather_types::models::{ChatMessage, ConversationKind, Reaction};

use crate::state::{AppState, route_error_status};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub skip: u32,
    #[serde(default = "default_take")]
    pub take: u32,
}

fn default_take() -> u32 {
    30
}

fn identity(claims: &Claims) -> Identity {
    Identity {
        user_id: claims.sub,
        username: claims.username.clone(),
    }
}

/// GET /rooms/{room_id}/messages?skip&take — newest-first page of room
/// history with reactions embedded. The client reverses for display.
pub async fn get_room_messages(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let rid = room_id.to_string();
    let uid = claims.sub.to_string();
    let take = query.take.min(100);
    let skip = query.skip;

    let (rows, reaction_rows) = tokio::task::spawn_blocking(move || {
        if !db.is_room_member(&rid, &uid).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)? {
            return Err(StatusCode::FORBIDDEN);
        }
        let rows = db
            .group_history(&rid, take, skip)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let reaction_rows = db
            .reactions_for_messages("room", &message_ids)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok::<_, StatusCode>((rows, reaction_rows))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    let mut reactions = group_reactions(&reaction_rows);
    let messages: Vec<ChatMessage> = rows
        .into_iter()
        .map(|row| ChatMessage::Group {
            id: parse_uuid(&row.id, "message id"),
            temp_id: None,
            room_id,
            sender_id: parse_uuid(&row.sender_id, "sender_id"),
            sender_name: row.sender_name,
            content: row.content,
            created_at: parse_timestamp(&row.created_at, &row.id),
            reactions: reactions.remove(&row.id).unwrap_or_default(),
            is_optimistic: false,
        })
        .collect();

    Ok(Json(messages))
}

/// GET /direct/{peer_id}/messages?skip&take — newest-first page of the 1:1
/// history with the peer, both directions.
pub async fn get_direct_messages(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let uid = claims.sub.to_string();
    let pid = peer_id.to_string();
    let take = query.take.min(100);
    let skip = query.skip;

    let (rows, reaction_rows) = tokio::task::spawn_blocking(move || {
        let rows = db
            .direct_history(&uid, &pid, take, skip)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let reaction_rows = db
            .reactions_for_messages("direct", &message_ids)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok::<_, StatusCode>((rows, reaction_rows))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    let mut reactions = group_reactions(&reaction_rows);
    let messages: Vec<ChatMessage> = rows
        .into_iter()
        .map(|row| ChatMessage::Direct {
            id: parse_uuid(&row.id, "message id"),
            temp_id: None,
            sender_id: parse_uuid(&row.sender_id, "sender_id"),
            sender_name: row.sender_name,
            recipient_id: parse_uuid(&row.recipient_id, "recipient_id"),
            content: row.content,
            created_at: parse_timestamp(&row.created_at, &row.id),
            reactions: reactions.remove(&row.id).unwrap_or_default(),
            is_optimistic: false,
        })
        .collect();

    Ok(Json(messages))
}

/// POST /rooms/{room_id}/messages — fallback send path when the gateway
/// channel is unavailable. Fans out exactly like a gateway send.
pub async fn send_room_message(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let message = state
        .router
        .send_group_message(&identity(&claims), room_id, &req.content, req.temp_id)
        .await
        .map_err(route_error_status)?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /direct/{peer_id}/messages — fallback direct send.
pub async fn send_direct_message(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let message = state
        .router
        .send_direct_message(&identity(&claims), peer_id, &req.content, req.temp_id)
        .await
        .map_err(route_error_status)?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// DELETE /messages/{kind}/{message_id} — sender-only, cascades reactions.
pub async fn delete_message(
    State(state): State<AppState>,
    Path((kind, message_id)): Path<(String, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let kind: ConversationKind = kind.parse().map_err(|_| StatusCode::BAD_REQUEST)?;

    state
        .router
        .delete_message(&identity(&claims), kind, message_id)
        .await
        .map_err(route_error_status)?;

    Ok(StatusCode::NO_CONTENT)
}

// Group reaction rows by message id, dropping corrupt rows with a warning.
fn group_reactions(rows: &[ReactionRow]) -> HashMap<String, Vec<Reaction>> {
    let mut map: HashMap<String, Vec<Reaction>> = HashMap::new();
    for r in rows {
        match (r.id.parse(), r.user_id.parse()) {
            (Ok(id), Ok(user_id)) => {
                map.entry(r.message_id.clone()).or_default().push(Reaction {
                    id,
                    emoji: r.emoji.clone(),
                    user_id,
                });
            }
            _ => warn!("Corrupt reaction row '{}' on message '{}'", r.id, r.message_id),
        }
    }
    map
}

pub(crate) fn parse_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub(crate) fn parse_timestamp(raw: &str, message_id: &str) -> chrono::DateTime<chrono::Utc> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            // SQLite defaults store "YYYY-MM-DD HH:MM:SS" without timezone.
            // Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on message '{}': {}", raw, message_id, e);
            chrono::DateTime::default()
        })
}
