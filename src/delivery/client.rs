use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

use crate::config::DeliveryClientConfig;
use crate::metrics::Metrics;
use crate::models::DeliveryRequest;

// ============================================================================
// Delivery Client - exactly one outbound attempt per call
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("invalid endpoint url '{0}'")]
    InvalidEndpoint(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("response status code {0} is not 200")]
    UnexpectedStatus(u16),

    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("circuit breaker is half-open and probe limit reached")]
    TooManyRequests,

    #[error("delivery cancelled")]
    Cancelled,
}

impl DeliveryError {
    /// Low-cardinality label for the error counter
    pub fn error_type(&self) -> &'static str {
        match self {
            DeliveryError::InvalidEndpoint(_) => "invalid_endpoint",
            DeliveryError::Transport(_) => "transport",
            DeliveryError::Timeout => "timeout",
            DeliveryError::UnexpectedStatus(_) => "invalid_status",
            DeliveryError::CircuitOpen => "circuit_breaker_open",
            DeliveryError::TooManyRequests => "circuit_breaker_too_many_requests",
            DeliveryError::Cancelled => "cancelled",
        }
    }
}

#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// POST `request` as JSON to `url`; only a 200 response is a success.
    async fn post(&self, url: &str, request: &DeliveryRequest) -> Result<(), DeliveryError>;
}

/// Breaker key of an endpoint: the URL host, with the port when one is given.
pub fn endpoint_host(url: &str) -> Result<String, DeliveryError> {
    let parsed = Url::parse(url).map_err(|_| DeliveryError::InvalidEndpoint(url.to_string()))?;
    let host = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| DeliveryError::InvalidEndpoint(url.to_string()))?;

    Ok(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

pub struct HttpDeliveryClient {
    http: reqwest::Client,
    metrics: Arc<Metrics>,
}

impl HttpDeliveryClient {
    pub fn new(config: &DeliveryClientConfig, metrics: Arc<Metrics>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, metrics })
    }
}

#[async_trait]
impl DeliveryClient for HttpDeliveryClient {
    async fn post(&self, url: &str, request: &DeliveryRequest) -> Result<(), DeliveryError> {
        let host = endpoint_host(url)?;
        let start = Instant::now();

        let response = match self.http.post(url).json(request).send().await {
            Ok(response) => response,
            Err(e) => {
                let error = if e.is_timeout() {
                    DeliveryError::Timeout
                } else {
                    DeliveryError::Transport(e.to_string())
                };
                self.metrics
                    .record_delivery_attempt(&host, 0, start.elapsed(), Some(error.error_type()));
                tracing::warn!(
                    host = %host,
                    error = %e,
                    "HTTP request failed"
                );
                return Err(error);
            }
        };

        let status = response.status();
        let duration = start.elapsed();

        if status != StatusCode::OK {
            let error = DeliveryError::UnexpectedStatus(status.as_u16());
            self.metrics
                .record_delivery_attempt(&host, status.as_u16(), duration, Some(error.error_type()));
            tracing::warn!(
                host = %host,
                status_code = status.as_u16(),
                duration_ms = duration.as_millis() as u64,
                "Received non-200 status code"
            );
            return Err(error);
        }

        self.metrics
            .record_delivery_attempt(&host, status.as_u16(), duration, None);
        tracing::debug!(
            host = %host,
            duration_ms = duration.as_millis() as u64,
            "Notification delivered"
        );
        Ok(())
    }
}
