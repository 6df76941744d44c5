use std::sync::Arc;
use std::time::Duration;

use inventory_sync_service::{
    config::{Config, StoreBackend},
    error::AppError,
    logging, routes,
    services::{EngineConfig, InventoryEngine, TracingTelemetry},
    state::AppState,
    storage::{KvStore, MemoryStore, RedisStore},
    websocket::{ConnectionRegistry, MessageDispatcher},
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();
    let cfg = Arc::new(Config::from_env()?);

    let store: Arc<dyn KvStore> = match cfg.store_backend {
        StoreBackend::Redis => Arc::new(
            RedisStore::connect(&cfg.redis_url)
                .await
                .map_err(|e| AppError::StartServer(format!("redis: {e}")))?,
        ),
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; state is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let registry = ConnectionRegistry::new();
    let engine = Arc::new(InventoryEngine::new(
        store,
        registry.clone(),
        Arc::new(TracingTelemetry),
        EngineConfig::from(cfg.as_ref()),
    ));

    // Active alerts are recomputed from persisted records, never restored
    // from a snapshot.
    match engine.recover_alerts().await {
        Ok(active) => tracing::info!(active, "alert state recovered"),
        Err(e) => tracing::warn!(error = %e, "alert recovery failed; starting with none"),
    }

    let dispatcher = Arc::new(MessageDispatcher::new().register(engine.clone()));

    let heartbeat = registry.start_heartbeat(Duration::from_secs(cfg.heartbeat_interval_secs));
    let sweeper = engine.start_sweeper(Duration::from_secs(cfg.alert_sweep_interval_secs));

    let state = AppState {
        config: cfg.clone(),
        registry,
        engine,
        dispatcher,
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting inventory-sync-service");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::StartServer(e.to_string()))?;
    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::StartServer(e.to_string()))?;

    heartbeat.stop().await;
    sweeper.stop().await;
    tracing::info!("inventory-sync-service stopped");

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to listen for shutdown signal");
    }
}
