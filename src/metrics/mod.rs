// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::time::Duration;

use crate::utils::CircuitState;

// Re-export for public API
pub use server::{metrics_handler, track_request};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Inbound HTTP requests (throughput, latency, status)
// - Outbound delivery attempts per remote host
// - Circuit breaker state and transitions per remote host
// - Preference cache hit ratio
//
// All metrics are registered with one Registry and scraped via /metrics
// ============================================================================

const LATENCY_BUCKETS: [f64; 10] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Inbound HTTP
    pub http_server_requests: IntCounterVec,
    pub http_server_duration: HistogramVec,

    // Outbound delivery
    pub http_client_requests: IntCounterVec,
    pub http_client_duration: HistogramVec,
    pub http_client_errors: IntCounterVec,

    // Circuit breakers
    pub circuit_breaker_state: IntGaugeVec,
    pub circuit_breaker_transitions: IntCounterVec,

    // Preference cache
    pub cache_requests: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let http_server_requests = IntCounterVec::new(
            Opts::new("http_server_requests_total", "Total inbound HTTP requests"),
            &["method", "route", "status"],
        )?;
        registry.register(Box::new(http_server_requests.clone()))?;

        let http_server_duration = HistogramVec::new(
            HistogramOpts::new("http_server_request_duration_seconds", "Inbound HTTP request duration")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["method", "route"],
        )?;
        registry.register(Box::new(http_server_duration.clone()))?;

        let http_client_requests = IntCounterVec::new(
            Opts::new("http_client_requests_total", "Total outbound delivery attempts"),
            &["host", "status"],
        )?;
        registry.register(Box::new(http_client_requests.clone()))?;

        let http_client_duration = HistogramVec::new(
            HistogramOpts::new("http_client_request_duration_seconds", "Outbound delivery attempt duration")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["host"],
        )?;
        registry.register(Box::new(http_client_duration.clone()))?;

        let http_client_errors = IntCounterVec::new(
            Opts::new("http_client_errors_total", "Failed outbound delivery attempts"),
            &["host", "error_type"],
        )?;
        registry.register(Box::new(http_client_errors.clone()))?;

        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Circuit breaker state per host (0=Closed, 1=Open, 2=HalfOpen)",
            ),
            &["host"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let circuit_breaker_transitions = IntCounterVec::new(
            Opts::new("circuit_breaker_transitions_total", "Circuit breaker state transitions"),
            &["host", "from_state", "to_state"],
        )?;
        registry.register(Box::new(circuit_breaker_transitions.clone()))?;

        let cache_requests = IntCounterVec::new(
            Opts::new("preference_cache_requests_total", "Preference cache lookups"),
            &["result"],
        )?;
        registry.register(Box::new(cache_requests.clone()))?;

        Ok(Self {
            registry,
            http_server_requests,
            http_server_duration,
            http_client_requests,
            http_client_duration,
            http_client_errors,
            circuit_breaker_state,
            circuit_breaker_transitions,
            cache_requests,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Helper to record an inbound HTTP request
    pub fn record_http_request(&self, method: &str, route: &str, status: u16, duration: Duration) {
        let status = status.to_string();
        self.http_server_requests
            .with_label_values(&[method, route, status.as_str()])
            .inc();
        self.http_server_duration
            .with_label_values(&[method, route])
            .observe(duration.as_secs_f64());
    }

    /// Helper to record one outbound delivery attempt. `status` is 0 when
    /// no response was received.
    pub fn record_delivery_attempt(
        &self,
        host: &str,
        status: u16,
        duration: Duration,
        error_type: Option<&str>,
    ) {
        let status = status.to_string();
        self.http_client_requests
            .with_label_values(&[host, status.as_str()])
            .inc();
        self.http_client_duration
            .with_label_values(&[host])
            .observe(duration.as_secs_f64());
        if let Some(error_type) = error_type {
            self.http_client_errors
                .with_label_values(&[host, error_type])
                .inc();
        }
    }

    /// Attempt rejected before any request was sent (breaker short-circuit)
    pub fn record_delivery_error(&self, host: &str, error_type: &str) {
        self.http_client_errors
            .with_label_values(&[host, error_type])
            .inc();
    }

    /// Helper to update circuit breaker state
    pub fn update_circuit_breaker_state(&self, host: &str, state: CircuitState) {
        self.circuit_breaker_state
            .with_label_values(&[host])
            .set(state.as_gauge());
    }

    /// Helper to record circuit breaker transition
    pub fn record_circuit_breaker_transition(&self, host: &str, from: CircuitState, to: CircuitState) {
        self.circuit_breaker_transitions
            .with_label_values(&[host, from.as_str(), to.as_str()])
            .inc();
        self.update_circuit_breaker_state(host, to);
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_requests.with_label_values(&[result]).inc();
    }
}
