use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::delivery::BreakerRegistry;
use crate::utils::{BreakerSnapshot, CircuitState};

// ============================================================================
// Health Check - aggregates per-host circuit breaker state
// ============================================================================
//
// healthy:   every breaker closed (or none created yet)
// degraded:  at least one breaker half-open
// unhealthy: at least one breaker open
//
// Always answered with 200: this is liveness, an open breaker only means a
// remote host is down, and fallback endpoints may still be serving.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerHealth {
    pub host: String,
    pub state: &'static str,
    pub requests: u32,
    pub failures: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub breakers: Vec<BreakerHealth>,
    pub checked_at: DateTime<Utc>,
}

fn compute_overall_status(snapshots: &[BreakerSnapshot]) -> HealthStatus {
    let mut has_degraded = false;

    for snapshot in snapshots {
        match snapshot.state {
            CircuitState::Open => return HealthStatus::Unhealthy,
            CircuitState::HalfOpen => has_degraded = true,
            CircuitState::Closed => {}
        }
    }

    if has_degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

pub fn system_health(registry: &BreakerRegistry) -> SystemHealth {
    let snapshots = registry.snapshots();
    let status = compute_overall_status(&snapshots);

    let breakers = snapshots
        .into_iter()
        .map(|snapshot| BreakerHealth {
            host: snapshot.name,
            state: snapshot.state.as_str(),
            requests: snapshot.counts.requests,
            failures: snapshot.counts.failures,
        })
        .collect();

    SystemHealth {
        status,
        breakers,
        checked_at: Utc::now(),
    }
}

/// GET /healthz
pub async fn health_handler(registry: web::Data<BreakerRegistry>) -> HttpResponse {
    let health = system_health(&registry);

    if health.status != HealthStatus::Healthy {
        tracing::debug!(status = ?health.status, "Reporting non-healthy status");
    }

    HttpResponse::Ok().json(health)
}
