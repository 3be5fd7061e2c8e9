//! Application error types for robust error handling.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level errors.
///
/// Nothing in the presence engine itself is fatal: subscription failures are
/// logged and recovered by falling back to per-user watches.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Subscription denied for {0}")]
    SubscriptionDenied(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// True when the store refused access to a path (ACL / permission failure).
    pub fn is_denied(&self) -> bool {
        matches!(self, AppError::SubscriptionDenied(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Redis(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Redis error: {}", e),
            ),
            AppError::SubscriptionDenied(path) => (
                StatusCode::FORBIDDEN,
                format!("Subscription denied for {}", path),
            ),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
