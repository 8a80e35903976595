use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Circuit Breaker Pattern Implementation
// ============================================================================
//
// Prevents cascading failures by tracking errors and temporarily blocking
// requests when a remote host is unhealthy.
//
// States:
// - Closed: Normal operation, requests pass through and are counted
// - Open: Failure ratio too high, requests blocked immediately
// - HalfOpen: Cool-down elapsed, a bounded number of probes allowed
//
// Counts belong to a "generation". Every state change (and every window
// rollover while Closed) starts a new generation, and outcomes reported
// for an older generation are ignored.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }

    /// Numeric encoding for the state gauge (0=Closed, 1=Open, 2=HalfOpen)
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Probes allowed while HalfOpen; this many consecutive successes close the circuit
    pub max_half_open_requests: u32,
    /// Time spent Open before probing
    pub open_state_timeout: Duration,
    /// Requests in the current window before the failure ratio is considered
    pub min_requests_before_trip: u32,
    /// Failure ratio (0.0..=1.0) that trips the circuit
    pub failure_threshold: f64,
    /// Closed-state counting window. `None` keeps counting until the next state change.
    pub window: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_half_open_requests: 5,
            open_state_timeout: Duration::from_secs(60),
            min_requests_before_trip: 3,
            failure_threshold: 0.6,
            window: None,
        }
    }
}

/// Request/outcome tallies of the current generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub failures: u32,
    pub successes: u32,
    pub consecutive_successes: u32,
}

impl Counts {
    fn on_success(&mut self) {
        self.successes = self.successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
    }

    fn on_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    fn on_exclusion(&mut self) {
        self.requests = self.requests.saturating_sub(1);
    }
}

/// Point-in-time view of a breaker, used for health reporting
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub counts: Counts,
}

/// Invoked with (breaker name, from, to) after every state change
pub type StateChangeListener = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    /// Neither success nor failure of the remote side (e.g. caller cancelled)
    Excluded,
}

type Transition = (CircuitState, CircuitState);

struct CircuitBreakerState {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitBreakerState>,
    on_state_change: Option<StateChangeListener>,
}

impl CircuitBreaker {
    /// A `max_half_open_requests` of 0 is treated as 1.
    pub fn new(name: impl Into<String>, mut config: CircuitBreakerConfig) -> Self {
        config.max_half_open_requests = config.max_half_open_requests.max(1);
        let expiry = config.window.map(|window| Instant::now() + window);
        Self {
            name: name.into(),
            config,
            state: Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry,
            }),
            on_state_change: None,
        }
    }

    pub fn with_listener(mut self, listener: StateChangeListener) -> Self {
        self.on_state_change = Some(listener);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an operation with circuit breaker protection.
    /// Every error counts as a failure of the protected host.
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.call_classified(operation, |_| true).await
    }

    /// Like [`call`](Self::call), but errors for which `is_failure` returns
    /// false are excluded from the counts instead of recorded as failures.
    ///
    /// If the returned future is dropped before the operation finishes, the
    /// request is excluded as well.
    pub async fn call_classified<F, T, E, C>(
        &self,
        operation: F,
        is_failure: C,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        let generation = self.before_request()?;
        let mut pending = PendingRequest {
            breaker: self,
            generation,
            settled: false,
        };

        match operation.await {
            Ok(value) => {
                pending.settle(Outcome::Success);
                Ok(value)
            }
            Err(err) => {
                let outcome = if is_failure(&err) {
                    Outcome::Failure
                } else {
                    Outcome::Excluded
                };
                pending.settle(outcome);
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    pub fn get_state(&self) -> CircuitState {
        let mut transitions = Vec::new();
        let state = {
            let mut inner = self.state.lock();
            self.current_state(&mut inner, Instant::now(), &mut transitions)
        };
        self.notify(transitions);
        state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut transitions = Vec::new();
        let snapshot = {
            let mut inner = self.state.lock();
            let state = self.current_state(&mut inner, Instant::now(), &mut transitions);
            BreakerSnapshot {
                name: self.name.clone(),
                state,
                counts: inner.counts,
            }
        };
        self.notify(transitions);
        snapshot
    }

    fn before_request<E>(&self) -> Result<u64, CircuitBreakerError<E>> {
        let mut transitions = Vec::new();
        let result = {
            let mut inner = self.state.lock();
            let state = self.current_state(&mut inner, Instant::now(), &mut transitions);

            match state {
                CircuitState::Open => Err(CircuitBreakerError::CircuitOpen),
                CircuitState::HalfOpen
                    if inner.counts.requests >= self.config.max_half_open_requests =>
                {
                    Err(CircuitBreakerError::TooManyRequests)
                }
                CircuitState::Closed | CircuitState::HalfOpen => {
                    inner.counts.requests = inner.counts.requests.saturating_add(1);
                    Ok(inner.generation)
                }
            }
        };
        self.notify(transitions);
        result
    }

    fn after_request(&self, generation: u64, outcome: Outcome) {
        let mut transitions = Vec::new();
        {
            let mut inner = self.state.lock();
            let now = Instant::now();
            let state = self.current_state(&mut inner, now, &mut transitions);
            if inner.generation != generation {
                drop(inner);
                self.notify(transitions);
                return;
            }

            match (outcome, state) {
                (Outcome::Excluded, _) => inner.counts.on_exclusion(),
                (Outcome::Success, CircuitState::Closed) => inner.counts.on_success(),
                (Outcome::Success, CircuitState::HalfOpen) => {
                    inner.counts.on_success();
                    if inner.counts.consecutive_successes >= self.config.max_half_open_requests {
                        self.set_state(&mut inner, CircuitState::Closed, now, &mut transitions);
                    }
                }
                (Outcome::Failure, CircuitState::Closed) => {
                    inner.counts.on_failure();
                    if self.ready_to_trip(&inner.counts) {
                        self.set_state(&mut inner, CircuitState::Open, now, &mut transitions);
                    }
                }
                (Outcome::Failure, CircuitState::HalfOpen) => {
                    self.set_state(&mut inner, CircuitState::Open, now, &mut transitions);
                }
                // A generation that saw Open never admitted requests
                (_, CircuitState::Open) => {}
            }
        }
        self.notify(transitions);
    }

    fn ready_to_trip(&self, counts: &Counts) -> bool {
        if counts.requests == 0 || counts.requests < self.config.min_requests_before_trip {
            return false;
        }
        let failure_ratio = f64::from(counts.failures) / f64::from(counts.requests);
        failure_ratio >= self.config.failure_threshold
    }

    fn current_state(
        &self,
        inner: &mut CircuitBreakerState,
        now: Instant,
        transitions: &mut Vec<Transition>,
    ) -> CircuitState {
        match inner.state {
            CircuitState::Closed => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.new_generation(inner, now);
                }
            }
            CircuitState::Open => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.set_state(inner, CircuitState::HalfOpen, now, transitions);
                }
            }
            CircuitState::HalfOpen => {}
        }
        inner.state
    }

    fn set_state(
        &self,
        inner: &mut CircuitBreakerState,
        state: CircuitState,
        now: Instant,
        transitions: &mut Vec<Transition>,
    ) {
        if inner.state == state {
            return;
        }
        let previous = inner.state;
        inner.state = state;
        self.new_generation(inner, now);
        transitions.push((previous, state));
    }

    fn new_generation(&self, inner: &mut CircuitBreakerState, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            CircuitState::Closed => self.config.window.map(|window| now + window),
            CircuitState::Open => Some(now + self.config.open_state_timeout),
            CircuitState::HalfOpen => None,
        };
    }

    fn notify(&self, transitions: Vec<Transition>) {
        for (from, to) in transitions {
            match to {
                CircuitState::Open => tracing::warn!(
                    breaker = %self.name,
                    from = %from,
                    "Circuit breaker opened"
                ),
                _ => tracing::info!(
                    breaker = %self.name,
                    from = %from,
                    to = %to,
                    "Circuit breaker state changed"
                ),
            }
            if let Some(listener) = &self.on_state_change {
                listener(&self.name, from, to);
            }
        }
    }
}

/// Reports an admitted request's outcome exactly once, excluding it if
/// the owning future is dropped first.
struct PendingRequest<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl PendingRequest<'_> {
    fn settle(&mut self, outcome: Outcome) {
        if !self.settled {
            self.settled = true;
            self.breaker.after_request(self.generation, outcome);
        }
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.settle(Outcome::Excluded);
    }
}

#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    CircuitOpen,
    TooManyRequests,
    OperationFailed(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "Circuit breaker is open"),
            CircuitBreakerError::TooManyRequests => {
                write!(f, "Circuit breaker is half-open and probe limit reached")
            }
            CircuitBreakerError::OperationFailed(e) => write!(f, "Operation failed: {}", e),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for CircuitBreakerError<E> {}
