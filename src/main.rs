use idempotency_guard::api::{create_router, AppState};
use idempotency_guard::config::{Settings, StoreBackend};
use idempotency_guard::idempotency::{
    IdempotencyCleanupJob, InMemoryRecordStore, RecordStore, RedisRecordStore,
};
use idempotency_guard::observability::{init_logging, init_metrics, LogConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;

    init_logging(&LogConfig::new(
        settings.application.log_level.clone(),
        &settings.application.log_format,
    ));
    info!("Configuration loaded");

    let metrics_handle = init_metrics()?;

    let store: Arc<dyn RecordStore> = match settings.idempotency.store {
        StoreBackend::Memory => {
            let store = Arc::new(InMemoryRecordStore::new());
            IdempotencyCleanupJob::new(
                store.clone(),
                Duration::from_secs(settings.idempotency.cleanup_interval_secs),
            )
            .start();
            info!("Using in-memory record store");
            store
        }
        StoreBackend::Redis => {
            info!("Connecting to Redis at {}...", settings.redis.url);
            let store = RedisRecordStore::open(&settings.redis.url, settings.redis.key_prefix.clone())?;
            store.ping().await?;
            info!("Redis connection established");
            Arc::new(store)
        }
    };

    let addr = format!("{}:{}", settings.application.host, settings.application.port);
    let state = AppState::new(store, settings).with_metrics(metrics_handle);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
