// ============================================================================
// HTTP API
// ============================================================================
//
// Routes:
// - POST /api/v1.0/recipient/{recipient}/notify
// - GET  /healthz
// - GET  /metrics
//
// Every request passes through the request-metrics middleware.
//
// ============================================================================

mod errors;
mod handlers;
mod health;

use actix_web::middleware::from_fn;
use actix_web::{web, App, HttpServer};
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::delivery::BreakerRegistry;
use crate::metrics::{self, Metrics};
use crate::service::NotificationService;

/// Shared state handed to every worker
#[derive(Clone)]
pub struct AppState {
    pub service: NotificationService,
    pub breakers: Arc<BreakerRegistry>,
    pub metrics: Arc<Metrics>,
}

pub fn configure(state: AppState) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(handlers::json_config())
            .app_data(web::Data::new(state.service))
            .app_data(web::Data::from(state.breakers))
            .app_data(web::Data::from(state.metrics))
            .route(
                "/api/v1.0/recipient/{recipient}/notify",
                web::post().to(handlers::notify_handler),
            )
            .route("/healthz", web::get().to(health::health_handler))
            .route("/metrics", web::get().to(metrics::metrics_handler));
    }
}

/// Runs the HTTP server until a shutdown signal is received
pub async fn serve(config: &ServerConfig, state: AppState) -> std::io::Result<()> {
    tracing::info!(addr = %config.bind_addr, "Starting HTTP server");

    HttpServer::new(move || {
        App::new()
            .wrap(from_fn(metrics::track_request))
            .configure(configure(state.clone()))
    })
    .bind(&config.bind_addr)?
    .run()
    .await
}
