use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod delivery;
mod metrics;
mod models;
mod preferences;
mod service;
mod utils;

use config::AppConfig;
use delivery::{BreakerRegistry, DeliveryDispatcher, HttpDeliveryClient};
use preferences::{PgPreferenceStore, PreferenceCache, PreferenceResolver};
use service::NotificationService;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real deployments set the environment directly
    dotenvy::dotenv().ok();

    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_notifier=debug")),
        )
        .init();

    tracing::info!("Starting order notification service");

    // === 1. Configuration ===
    let config = AppConfig::from_env()?;
    tracing::info!(
        client_timeout_ms = config.client.timeout.as_millis() as u64,
        cache_ttl_secs = config.cache.ttl.as_secs(),
        failure_threshold = config.circuit_breaker.failure_threshold,
        "Configuration loaded"
    );

    // === 2. Metrics ===
    let metrics = Arc::new(metrics::Metrics::new()?);
    tracing::info!(
        "Metrics registry created with {} metrics",
        metrics.registry().gather().len()
    );

    // === 3. Preference store + cache ===
    tracing::info!("Connecting to Postgres...");
    let store = Arc::new(PgPreferenceStore::connect(&config.database).await?);
    let cache = PreferenceCache::new(&config.cache, metrics.clone());
    let resolver = Arc::new(PreferenceResolver::new(cache, store));

    // === 4. Delivery (client + per-host circuit breakers) ===
    let client = Arc::new(HttpDeliveryClient::new(&config.client, metrics.clone())?);
    let breakers = Arc::new(BreakerRegistry::new(
        config.circuit_breaker.clone(),
        metrics.clone(),
    ));
    let dispatcher = Arc::new(DeliveryDispatcher::new(
        client,
        breakers.clone(),
        metrics.clone(),
    ));

    let service = NotificationService::new(resolver, dispatcher);

    // === 5. HTTP server (runs until SIGINT/SIGTERM) ===
    let state = api::AppState {
        service,
        breakers,
        metrics,
    };
    api::serve(&config.server, state).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
