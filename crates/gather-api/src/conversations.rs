use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use gather_types::api::{Claims, DirectConversationEntry, RoomOverview};

use crate::messages::{parse_timestamp, parse_uuid};
use crate::state::AppState;

/// GET /direct/conversations — the latest message exchanged with each
/// counterpart, newest-first. Recomputed from scratch per call; the client
/// directory maintains it incrementally once loaded.
pub async fn direct_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let uid = claims.sub.to_string();

    let rows = tokio::task::spawn_blocking(move || db.direct_conversations(&uid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let entries: Vec<DirectConversationEntry> = rows
        .into_iter()
        .map(|row| DirectConversationEntry {
            peer_id: parse_uuid(&row.peer_id, "peer_id"),
            peer_name: row.peer_name,
            peer_image_ref: row.peer_image_ref,
            last_message_at: parse_timestamp(&row.last_message_at, &row.peer_id),
            last_message: row.last_message,
            last_sender_id: parse_uuid(&row.last_sender_id, "last_sender_id"),
        })
        .collect();

    Ok(Json(entries))
}

/// GET /me/rooms — the caller's rooms with member lists and last-message
/// summaries, for the directory snapshot.
pub async fn my_rooms(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let uid = claims.sub.to_string();

    let rows = tokio::task::spawn_blocking(move || {
        let rooms = db.rooms_for_user(&uid)?;
        rooms
            .into_iter()
            .map(|room| {
                let members = db.room_member_ids(&room.id)?;
                Ok((room, members))
            })
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let overviews: Vec<RoomOverview> = rows
        .into_iter()
        .map(|(room, members)| RoomOverview {
            room_id: parse_uuid(&room.id, "room id"),
            name: room.name,
            image_ref: room.image_ref,
            member_ids: members.iter().map(|m| parse_uuid(m, "member id")).collect(),
            last_message: room.last_message,
            last_message_at: room
                .last_message_at
                .as_deref()
                .map(|ts| parse_timestamp(ts, &room.id)),
        })
        .collect();

    Ok(Json(overviews))
}
