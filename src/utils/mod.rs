pub mod circuit_breaker;

pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
    StateChangeListener,
};
