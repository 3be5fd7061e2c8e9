//! Entry point: load config, connect the realtime store, start the engine and serve reads.

use presence_engine::config::Config;
use presence_engine::repositories::RedisSource;
use presence_engine::services::{PresenceEngine, SystemClock};
use presence_engine::{create_app, AppState};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let source = Arc::new(RedisSource::new(&config.redis_url, &config.key_prefix)?);
    let engine = Arc::new(PresenceEngine::start(source, Arc::new(SystemClock), &config).await);
    let state = AppState::new(engine.clone());

    let app = create_app(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!(addr = %config.server_addr, "listening");
    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    engine.shutdown();
    Ok(())
}
