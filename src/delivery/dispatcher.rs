use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::client::{endpoint_host, DeliveryClient, DeliveryError};
use super::registry::BreakerRegistry;
use crate::metrics::Metrics;
use crate::models::{DeliveryEndpoint, DeliveryRequest, Notification};
use crate::utils::CircuitBreakerError;

// ============================================================================
// Delivery Dispatcher - priority-ordered fallback across endpoints
// ============================================================================
//
// Endpoints are tried one at a time in the order given (ascending priority).
// Every failure (circuit open, transport, timeout, non-200) moves on to the
// next endpoint. Cancellation stops the chain immediately.
//
// ============================================================================

/// One endpoint that was tried and did not accept the notification
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub url: String,
    pub priority: i32,
    pub error: DeliveryError,
}

#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub delivered_to: String,
    pub failed_attempts: Vec<AttemptFailure>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Every endpoint failed (or there were none). Per-attempt details are
    /// kept for diagnostics but are not part of the message.
    #[error("delivery failed")]
    DeliveryFailed { attempts: Vec<AttemptFailure> },

    #[error("delivery cancelled")]
    Cancelled,
}

pub struct DeliveryDispatcher {
    client: Arc<dyn DeliveryClient>,
    breakers: Arc<BreakerRegistry>,
    metrics: Arc<Metrics>,
}

impl DeliveryDispatcher {
    pub fn new(client: Arc<dyn DeliveryClient>, breakers: Arc<BreakerRegistry>, metrics: Arc<Metrics>) -> Self {
        Self {
            client,
            breakers,
            metrics,
        }
    }

    pub async fn send(
        &self,
        cancel: &CancellationToken,
        endpoints: &[DeliveryEndpoint],
        notification: &Notification,
    ) -> Result<DispatchReport, DispatchError> {
        let mut failed_attempts = Vec::new();

        for endpoint in endpoints {
            if cancel.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }

            match self.attempt(cancel, endpoint, notification).await {
                Ok(()) => {
                    return Ok(DispatchReport {
                        delivered_to: endpoint.url.clone(),
                        failed_attempts,
                    });
                }
                Err(DeliveryError::Cancelled) => return Err(DispatchError::Cancelled),
                Err(error) => {
                    tracing::warn!(
                        url = %endpoint.url,
                        priority = endpoint.priority,
                        error = %error,
                        "Endpoint failed, falling back to next"
                    );
                    failed_attempts.push(AttemptFailure {
                        url: endpoint.url.clone(),
                        priority: endpoint.priority,
                        error,
                    });
                }
            }
        }

        tracing::error!(
            attempts = failed_attempts.len(),
            "All delivery endpoints failed"
        );
        Err(DispatchError::DeliveryFailed {
            attempts: failed_attempts,
        })
    }

    async fn attempt(
        &self,
        cancel: &CancellationToken,
        endpoint: &DeliveryEndpoint,
        notification: &Notification,
    ) -> Result<(), DeliveryError> {
        let host = endpoint_host(&endpoint.url)?;
        let breaker = self.breakers.get_or_create(&host);

        let state = breaker.get_state();
        self.metrics.update_circuit_breaker_state(&host, state);
        tracing::debug!(host = %host, state = %state, "Circuit breaker state checked");

        let request = DeliveryRequest::for_endpoint(notification, endpoint);
        let client = &self.client;
        let result = breaker
            .call_classified(
                async {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(DeliveryError::Cancelled),
                        posted = client.post(&endpoint.url, &request) => posted,
                    }
                },
                |error: &DeliveryError| !matches!(error, DeliveryError::Cancelled),
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(CircuitBreakerError::OperationFailed(error)) => Err(error),
            Err(CircuitBreakerError::CircuitOpen) => {
                self.metrics
                    .record_delivery_error(&host, DeliveryError::CircuitOpen.error_type());
                Err(DeliveryError::CircuitOpen)
            }
            Err(CircuitBreakerError::TooManyRequests) => {
                self.metrics
                    .record_delivery_error(&host, DeliveryError::TooManyRequests.error_type());
                Err(DeliveryError::TooManyRequests)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::utils::{CircuitBreakerConfig, CircuitState};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Records every attempted URL/request; answers from a per-URL script
    #[derive(Default)]
    pub(crate) struct RecordingClient {
        pub(crate) calls: Mutex<Vec<(String, DeliveryRequest)>>,
        failing: Mutex<HashMap<String, DeliveryError>>,
        stalled: Mutex<Vec<String>>,
    }

    impl RecordingClient {
        pub(crate) fn fail(&self, url: &str, error: DeliveryError) {
            self.failing.lock().insert(url.to_string(), error);
        }

        pub(crate) fn stall(&self, url: &str) {
            self.stalled.lock().push(url.to_string());
        }

        pub(crate) fn urls(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(url, _)| url.clone()).collect()
        }
    }

    #[async_trait]
    impl DeliveryClient for RecordingClient {
        async fn post(&self, url: &str, request: &DeliveryRequest) -> Result<(), DeliveryError> {
            self.calls.lock().push((url.to_string(), request.clone()));
            let stalled = self.stalled.lock().iter().any(|u| u == url);
            if stalled {
                std::future::pending::<()>().await;
            }
            match self.failing.lock().get(url) {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            }
        }
    }

    pub(crate) fn breaker_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_half_open_requests: 1,
            open_state_timeout: Duration::from_secs(60),
            min_requests_before_trip: 3,
            failure_threshold: 0.6,
            window: None,
        }
    }

    fn dispatcher(client: Arc<RecordingClient>) -> (DeliveryDispatcher, Arc<BreakerRegistry>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let breakers = Arc::new(BreakerRegistry::new(breaker_config(), metrics.clone()));
        (DeliveryDispatcher::new(client, breakers.clone(), metrics), breakers)
    }

    fn endpoints(urls: &[&str]) -> Vec<DeliveryEndpoint> {
        urls.iter()
            .enumerate()
            .map(|(i, url)| DeliveryEndpoint {
                url: url.to_string(),
                priority: i as i32 + 1,
                secret: format!("secret-{}", i + 1),
            })
            .collect()
    }

    fn notification() -> Notification {
        Notification {
            recipient: "buyer@example.com".to_string(),
            title: "Order confirmed".to_string(),
            message: "Order #7 is confirmed".to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_endpoint_success_calls_only_it() {
        let client = Arc::new(RecordingClient::default());
        let (dispatcher, _) = dispatcher(client.clone());
        let endpoints = endpoints(&["http://a.example/n", "http://b.example/n"]);

        let report = dispatcher
            .send(&CancellationToken::new(), &endpoints, &notification())
            .await
            .unwrap();

        assert_eq!(report.delivered_to, "http://a.example/n");
        assert!(report.failed_attempts.is_empty());
        assert_eq!(client.urls(), vec!["http://a.example/n"]);
    }

    #[tokio::test]
    async fn test_falls_back_in_priority_order() {
        let client = Arc::new(RecordingClient::default());
        client.fail("http://a.example/n", DeliveryError::UnexpectedStatus(500));
        client.fail("http://b.example/n", DeliveryError::Timeout);
        let (dispatcher, _) = dispatcher(client.clone());
        let endpoints = endpoints(&["http://a.example/n", "http://b.example/n", "http://c.example/n", "http://d.example/n"]);

        let report = dispatcher
            .send(&CancellationToken::new(), &endpoints, &notification())
            .await
            .unwrap();

        assert_eq!(report.delivered_to, "http://c.example/n");
        assert_eq!(report.failed_attempts.len(), 2);
        assert_eq!(
            client.urls(),
            vec!["http://a.example/n", "http://b.example/n", "http://c.example/n"]
        );
    }

    #[tokio::test]
    async fn test_secret_is_substituted_per_endpoint() {
        let client = Arc::new(RecordingClient::default());
        client.fail("http://a.example/n", DeliveryError::Transport("reset".to_string()));
        let (dispatcher, _) = dispatcher(client.clone());
        let endpoints = endpoints(&["http://a.example/n", "http://b.example/n"]);

        dispatcher
            .send(&CancellationToken::new(), &endpoints, &notification())
            .await
            .unwrap();

        let calls = client.calls.lock();
        assert_eq!(calls[0].1.secret, "secret-1");
        assert_eq!(calls[1].1.secret, "secret-2");
        assert_eq!(calls[1].1.to, "buyer@example.com");
    }

    #[tokio::test]
    async fn test_all_endpoints_fail() {
        let client = Arc::new(RecordingClient::default());
        client.fail("http://a.example/n", DeliveryError::UnexpectedStatus(503));
        client.fail("http://b.example/n", DeliveryError::UnexpectedStatus(503));
        let (dispatcher, _) = dispatcher(client.clone());

        let err = dispatcher
            .send(
                &CancellationToken::new(),
                &endpoints(&["http://a.example/n", "http://b.example/n"]),
                &notification(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "delivery failed");
        match err {
            DispatchError::DeliveryFailed { attempts } => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[1].error, DeliveryError::UnexpectedStatus(503));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_endpoints_fail_without_calls() {
        let client = Arc::new(RecordingClient::default());
        let (dispatcher, _) = dispatcher(client.clone());

        let err = dispatcher
            .send(&CancellationToken::new(), &[], &notification())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::DeliveryFailed { ref attempts } if attempts.is_empty()));
        assert!(client.urls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_url_is_skipped() {
        let client = Arc::new(RecordingClient::default());
        let (dispatcher, breakers) = dispatcher(client.clone());

        let report = dispatcher
            .send(
                &CancellationToken::new(),
                &endpoints(&["::not-a-url::", "http://b.example/n"]),
                &notification(),
            )
            .await
            .unwrap();

        assert_eq!(report.delivered_to, "http://b.example/n");
        assert!(matches!(report.failed_attempts[0].error, DeliveryError::InvalidEndpoint(_)));
        assert_eq!(breakers.snapshots().len(), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_skips_host_without_calling_it() {
        let client = Arc::new(RecordingClient::default());
        client.fail("http://a.example/n", DeliveryError::UnexpectedStatus(500));
        let (dispatcher, breakers) = dispatcher(client.clone());
        let endpoints = endpoints(&["http://a.example/n", "http://b.example/n"]);
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            dispatcher.send(&cancel, &endpoints, &notification()).await.unwrap();
        }
        assert_eq!(breakers.get_or_create("a.example").get_state(), CircuitState::Open);
        client.calls.lock().clear();

        let report = dispatcher.send(&cancel, &endpoints, &notification()).await.unwrap();

        assert_eq!(report.failed_attempts[0].error, DeliveryError::CircuitOpen);
        assert_eq!(client.urls(), vec!["http://b.example/n"]);
        assert_eq!(breakers.get_or_create("b.example").get_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_calls() {
        let client = Arc::new(RecordingClient::default());
        let (dispatcher, _) = dispatcher(client.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = dispatcher
            .send(&cancel, &endpoints(&["http://a.example/n"]), &notification())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Cancelled));
        assert!(client.urls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_in_flight_stops_chain_and_is_not_a_host_failure() {
        let client = Arc::new(RecordingClient::default());
        client.stall("http://a.example/n");
        let (dispatcher, breakers) = dispatcher(client.clone());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let err = dispatcher
            .send(&cancel, &endpoints(&["http://a.example/n", "http://b.example/n"]), &notification())
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Cancelled));
        assert_eq!(client.urls(), vec!["http://a.example/n"]);
        let snapshot = breakers.get_or_create("a.example").snapshot();
        assert_eq!(snapshot.counts.requests, 0);
        assert_eq!(snapshot.counts.failures, 0);
    }

    #[tokio::test]
    async fn test_against_real_http_endpoints() {
        let (failing_url, _) = crate::delivery::client::tests::spawn_responder(vec![(500, Duration::ZERO)]).await;
        let (ok_url, mut bodies) = crate::delivery::client::tests::spawn_responder(vec![(200, Duration::ZERO)]).await;

        let metrics = Arc::new(Metrics::new().unwrap());
        let config = crate::config::DeliveryClientConfig {
            timeout: Duration::from_secs(2),
        };
        let client = Arc::new(crate::delivery::HttpDeliveryClient::new(&config, metrics.clone()).unwrap());
        let breakers = Arc::new(BreakerRegistry::new(breaker_config(), metrics.clone()));
        let dispatcher = DeliveryDispatcher::new(client, breakers, metrics);

        let endpoints = vec![
            DeliveryEndpoint {
                url: failing_url,
                priority: 1,
                secret: "first".to_string(),
            },
            DeliveryEndpoint {
                url: ok_url.clone(),
                priority: 2,
                secret: "second".to_string(),
            },
        ];

        let report = dispatcher
            .send(&CancellationToken::new(), &endpoints, &notification())
            .await
            .unwrap();

        assert_eq!(report.delivered_to, ok_url);
        let body: serde_json::Value = serde_json::from_str(&bodies.recv().await.unwrap()).unwrap();
        assert_eq!(body["secret"], "second");
    }
}
