pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use tokio::sync::watch;

use crate::core::config::{CacheBackend, Settings};
use crate::core::{redis::RedisHandle, state::AppState, telemetry};
use crate::repositories::PgRepository;
use crate::services::cache::{Cache, MemoryCache};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; continuing without cache");
    } else {
        tracing::info!("Redis connected successfully");
    }

    let cache: Arc<dyn Cache> = match settings.cache().backend {
        CacheBackend::Redis => Arc::new(redis.clone()),
        CacheBackend::Memory => Arc::new(MemoryCache::new()),
    };
    let store = Arc::new(PgRepository::new(db_pool));
    let state = AppState::new(settings, store, cache, redis.clone());

    if let Err(err) = core::bootstrap::ensure_admin(&state).await {
        tracing::error!(error = %err, "Failed to ensure default admin");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tasks::expiry::spawn(state.clone(), shutdown_rx);

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "Exam platform API listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }
    if let Some(handle) = sweeper {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Expiry sweeper join failed");
        }
    }

    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}
