use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use gather_gateway::router::Identity;
use gather_types::api::{Claims, ToggleReactionRequest, ToggleReactionResponse};
use gather_types::models::ConversationKind;

use crate::state::{AppState, route_error_status};

/// POST /messages/{kind}/{message_id}/reactions — toggle a reaction.
/// The authoritative set goes out over the gateway; the response only says
/// which way the toggle went.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path((kind, message_id)): Path<(String, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let kind: ConversationKind = kind.parse().map_err(|_| StatusCode::BAD_REQUEST)?;

    let identity = Identity {
        user_id: claims.sub,
        username: claims.username.clone(),
    };

    let added = state
        .router
        .toggle_reaction(&identity, kind, message_id, &req.emoji)
        .await
        .map_err(route_error_status)?;

    Ok(Json(ToggleReactionResponse { added }))
}
