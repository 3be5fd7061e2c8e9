//! HTTP handlers: presence reads, typing list, display config and health.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::error::AppError;
use crate::models::presence::Presence;
use crate::models::typing::TypingEntry;
use crate::services::PresenceEngine;

const MAX_UID_LEN: usize = 128;

/// Shared application state for the HTTP layer.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PresenceEngine>,
}

impl AppState {
    pub fn new(engine: Arc<PresenceEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &PresenceEngine {
        &self.engine
    }
}

/// Uids become store paths, so they must be a single non-empty segment.
fn validate_uid(uid: &str) -> Result<(), AppError> {
    if uid.trim().is_empty() {
        return Err(AppError::Validation("uid must not be empty".to_string()));
    }
    if uid.len() > MAX_UID_LEN {
        return Err(AppError::Validation(format!(
            "uid longer than {} bytes",
            MAX_UID_LEN
        )));
    }
    if uid.contains('/') || uid.contains('*') {
        return Err(AppError::Validation("uid contains reserved characters".to_string()));
    }
    Ok(())
}

/// GET /presence/:uid — current presence of one user.
pub async fn get_presence(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<Presence>, AppError> {
    validate_uid(&uid)?;
    Ok(Json(state.engine().get_presence(&uid)))
}

/// GET /typing — users currently typing, most recently seen first.
pub async fn get_typing(State(state): State<AppState>) -> Json<Vec<TypingEntry>> {
    Json(state.engine().get_all_typing())
}

/// GET /config — values the UI needs for display copy.
pub async fn get_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "awayAfterSeconds": state.engine().away_after_seconds() }))
}

/// GET /health — liveness check.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "presence-engine" })),
    )
}
