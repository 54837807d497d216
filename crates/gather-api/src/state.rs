use std::sync::Arc;

use axum::http::StatusCode;

use gather_db::Database;
use gather_gateway::router::{MessageRouter, RouteError};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub router: MessageRouter,
    pub jwt_secret: String,
}

/// REST handlers surface router failures as plain status codes; the typed
/// error detail travels only over the gateway.
pub fn route_error_status(err: RouteError) -> StatusCode {
    match err {
        RouteError::Validation(_) => StatusCode::BAD_REQUEST,
        RouteError::Forbidden(_) => StatusCode::FORBIDDEN,
        RouteError::NotFound(_) => StatusCode::NOT_FOUND,
        RouteError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
