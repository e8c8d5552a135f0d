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

use crate::core::config::{Settings, StorageBackend};
use crate::core::time::SystemClock;
use crate::core::{redis::RedisHandle, state::AppState, telemetry};
use crate::repositories::{memory::MemoryStore, postgres::PgStore, AttemptStore};
use crate::services::attempt_lifecycle::{AttemptService, LifecyclePolicy};
use crate::services::realtime::{ActivityFeed, Broadcaster, LocalHub, RedisRelay};
use crate::services::scoring::ScoringPolicy;

async fn build_store(settings: &Settings) -> anyhow::Result<Arc<dyn AttemptStore>> {
    match settings.database().backend {
        StorageBackend::Postgres => {
            let pool = db::init_pool(settings).await?;
            db::run_migrations(&pool).await?;
            Ok(Arc::new(PgStore::new(pool)))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory attempt store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let store = build_store(&settings).await?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; realtime stays instance-local");
    } else {
        tracing::info!("Redis connected successfully");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    let realtime = settings.realtime();
    let hub = LocalHub::new(realtime.channel_capacity);
    let clock = Arc::new(SystemClock);
    let broadcaster: Arc<dyn Broadcaster> = if realtime.redis_fanout {
        let relay = RedisRelay::new(hub.clone(), redis.clone(), realtime.redis_channel.clone());
        handles.push(tokio::spawn(relay.clone().run(shutdown_rx.clone())));
        Arc::new(relay)
    } else {
        Arc::new(hub.clone())
    };

    let feed = ActivityFeed::new(realtime.activity_feed_capacity, clock.clone());
    handles.push(tokio::spawn(feed.clone().run(hub.subscribe(), shutdown_rx.clone())));

    let policy = LifecyclePolicy {
        scoring: ScoringPolicy {
            multi_select_partial_credit: settings.attempts().multi_select_partial_credit,
        },
        timer_skew_tolerance_seconds: settings.attempts().timer_skew_tolerance_seconds,
    };
    let attempts = AttemptService::new(store, broadcaster, clock, policy);
    handles.push(tokio::spawn(tasks::scheduler::run_expiry_sweep(
        attempts.clone(),
        std::time::Duration::from_secs(settings.attempts().expiry_sweep_interval_seconds),
        shutdown_rx.clone(),
    )));

    let state = AppState::new(settings, attempts, hub, feed, redis.clone());
    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        storage = state.attempts().store().backend_name(),
        "CBT attempt engine listening"
    );

    tokio::spawn(core::shutdown::shutdown_and_notify(shutdown_tx));
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(core::shutdown::wait_for(shutdown_rx))
        .await;

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}
