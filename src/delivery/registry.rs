use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::metrics::Metrics;
use crate::utils::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState, StateChangeListener,
};

// ============================================================================
// Host Circuit Breaker Registry
// ============================================================================
//
// One breaker per remote host, created on first use and kept for the life
// of the process. The map grows with the number of distinct configured
// hosts; entries are never evicted because that would discard trip history.
//
// ============================================================================

pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    config: CircuitBreakerConfig,
    metrics: Arc<Metrics>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            config,
            metrics,
        }
    }

    /// Returns the breaker for `host`, creating it on first reference.
    /// Concurrent first callers all receive the same instance.
    pub fn get_or_create(&self, host: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(host) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write();
        let breaker = breakers
            .entry(host.to_string())
            .or_insert_with(|| {
                tracing::debug!(host = %host, "Creating circuit breaker");
                Arc::new(
                    CircuitBreaker::new(host, self.config.clone())
                        .with_listener(self.state_listener()),
                )
            })
            .clone();
        breaker
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<_> = self.breakers.read().values().cloned().collect();
        let mut snapshots: Vec<_> = breakers.iter().map(|breaker| breaker.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    fn state_listener(&self) -> StateChangeListener {
        let metrics = self.metrics.clone();
        Arc::new(move |host: &str, from: CircuitState, to: CircuitState| {
            metrics.record_circuit_breaker_transition(host, from, to);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> BreakerRegistry {
        let config = CircuitBreakerConfig {
            max_half_open_requests: 1,
            open_state_timeout: Duration::from_secs(60),
            min_requests_before_trip: 1,
            failure_threshold: 0.5,
            window: None,
        };
        BreakerRegistry::new(config, Arc::new(Metrics::new().unwrap()))
    }

    #[test]
    fn test_same_host_same_breaker() {
        let registry = registry();

        let first = registry.get_or_create("mail.example.com");
        let second = registry.get_or_create("mail.example.com");
        let other = registry.get_or_create("push.example.com");

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(first.name(), "mail.example.com");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_or_create_returns_one_instance() {
        let registry = Arc::new(registry());
        let barrier = Arc::new(tokio::sync::Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    registry.get_or_create("mail.example.com")
                })
            })
            .collect();

        let mut breakers = Vec::new();
        for handle in handles {
            breakers.push(handle.await.unwrap());
        }

        assert!(breakers.iter().all(|b| Arc::ptr_eq(b, &breakers[0])));
        assert_eq!(registry.snapshots().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_host() {
        let registry = registry();

        let failing = registry.get_or_create("down.example.com");
        let _ = failing.call(async { Err::<(), _>("boom") }).await;

        assert_eq!(failing.get_state(), CircuitState::Open);
        assert_eq!(registry.get_or_create("up.example.com").get_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_transitions_reach_metrics() {
        let registry = registry();

        let breaker = registry.get_or_create("down.example.com");
        let _ = breaker.call(async { Err::<(), _>("boom") }).await;

        let gauge = registry
            .metrics
            .circuit_breaker_state
            .with_label_values(&["down.example.com"])
            .get();
        assert_eq!(gauge, CircuitState::Open.as_gauge());

        let snapshots = registry.snapshots();
        assert_eq!(snapshots[0].name, "down.example.com");
        assert_eq!(snapshots[0].state, CircuitState::Open);
    }
}
