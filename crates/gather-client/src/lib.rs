pub mod cache;
pub mod directory;
pub mod history;
pub mod outbox;
pub mod rest;
pub mod session;
pub mod transport;
pub mod typing;

use thiserror::Error;
use uuid::Uuid;

/// The identity this client runs as, supplied by the surrounding app.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub image_ref: Option<String>,
}

/// Client-side failure taxonomy. Transport and REST failures are converted
/// into these at the component boundary that issued the action; they never
/// escape as panics.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("authorization: {0}")]
    Authorization(String),
    #[error("network: {0}")]
    Network(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("gateway disconnected")]
    Disconnected,
    #[error("cache: {0}")]
    Cache(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                401 | 403 => ClientError::Authorization(err.to_string()),
                404 => ClientError::NotFound(err.to_string()),
                400 => ClientError::Validation(err.to_string()),
                409 => ClientError::Conflict(err.to_string()),
                _ => ClientError::Network(err.to_string()),
            }
        } else {
            ClientError::Network(err.to_string())
        }
    }
}
