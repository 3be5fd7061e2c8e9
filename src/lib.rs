//! Real-time presence and typing aggregation built with Rust.
//!
//! Classifies observed users as online, away or offline from heartbeat
//! records in a realtime key-value store, folds in typing flags, and keeps
//! the classification current from elapsed time alone. Aggregate roots are
//! read with one subscription each; uids the roots do not cover (for example
//! when access policy denies root reads) get per-user fallback watches.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use handlers::http::AppState;
pub use models::{derive_presence, Presence, PresenceState, TypingEntry};
pub use repositories::{MemorySource, RedisSource, RemoteStateSource};
pub use services::{PresenceEngine, PresenceQuery};

use axum::routing::get;
use handlers::http;

/// Build the API router (presence, typing, config, health). Used by main and by integration tests.
pub fn create_app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/presence/:uid", get(http::get_presence))
        .route("/typing", get(http::get_typing))
        .route("/config", get(http::get_config))
        .route("/health", get(http::health))
        .with_state(state)
}
