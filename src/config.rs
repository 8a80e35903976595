use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::utils::CircuitBreakerConfig;

// ============================================================================
// Configuration - loaded once from the process environment
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub client: DeliveryClientConfig,
    pub cache: CacheConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone)]
pub struct DeliveryClientConfig {
    /// Upper bound for a single outbound attempt
    pub timeout: Duration,
}

impl Default for DeliveryClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    /// Total weight budget, entries weigh roughly their size in bytes
    pub max_cost: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            max_cost: 1 << 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let server = ServerConfig {
            bind_addr: env_or_default("HTTP_SERVER_ADDR", "0.0.0.0:8080"),
        };

        let client = DeliveryClientConfig {
            timeout: env_duration("HTTP_CLIENT_TIMEOUT", "5s")?,
        };

        let cache = CacheConfig {
            ttl: env_duration("CACHE_EXPIRED_TIME", "10m")?,
            max_cost: env_parse("CACHE_MAX_COST", "1073741824")?,
        };

        let failure_threshold_percent: f64 =
            env_parse("CIRCUIT_BREAKER_FAILURE_THRESHOLD_PERCENT", "60")?;
        if !(0.0..=100.0).contains(&failure_threshold_percent) {
            return Err(ConfigError::ParseError {
                key: "CIRCUIT_BREAKER_FAILURE_THRESHOLD_PERCENT".to_string(),
                details: format!("{} is outside 0..=100", failure_threshold_percent),
            });
        }

        let max_half_open_requests: u32 = env_parse("CIRCUIT_BREAKER_MAX_HALF_OPEN_REQUESTS", "5")?;
        if max_half_open_requests == 0 {
            return Err(ConfigError::ParseError {
                key: "CIRCUIT_BREAKER_MAX_HALF_OPEN_REQUESTS".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        let window = env_duration("CIRCUIT_BREAKER_WINDOW", "0s")?;
        let circuit_breaker = CircuitBreakerConfig {
            max_half_open_requests,
            open_state_timeout: env_duration("CIRCUIT_BREAKER_OPEN_STATE_TIMEOUT", "60s")?,
            min_requests_before_trip: env_parse("CIRCUIT_BREAKER_MIN_REQUESTS_BEFORE_TRIP", "3")?,
            failure_threshold: failure_threshold_percent / 100.0,
            window: (!window.is_zero()).then_some(window),
        };

        let database = DatabaseConfig {
            url: env_required("DATABASE_URL")?,
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", "10")?,
        };

        Ok(Self {
            server,
            client,
            cache,
            circuit_breaker,
            database,
        })
    }
}

/// Helper to load environment variable with a default value
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Helper to load environment variable or return error
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn env_parse<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env_or_default(key, default);
    raw.trim().parse::<T>().map_err(|e| ConfigError::ParseError {
        key: key.to_string(),
        details: format!("'{}': {}", raw, e),
    })
}

fn env_duration(key: &str, default: &str) -> Result<Duration, ConfigError> {
    let raw = env_or_default(key, default);
    parse_duration(&raw).ok_or_else(|| ConfigError::ParseError {
        key: key.to_string(),
        details: format!("'{}' is not a duration (expected e.g. 500ms, 60s, 10m, 1h)", raw),
    })
}

/// Parses `<integer><unit>` with unit one of `ms`, `s`, `m`, `h`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits.parse().ok()?;

    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs),
        "h" => value.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KEYS: [&str; 11] = [
        "HTTP_SERVER_ADDR",
        "HTTP_CLIENT_TIMEOUT",
        "CACHE_EXPIRED_TIME",
        "CACHE_MAX_COST",
        "CIRCUIT_BREAKER_MAX_HALF_OPEN_REQUESTS",
        "CIRCUIT_BREAKER_OPEN_STATE_TIMEOUT",
        "CIRCUIT_BREAKER_MIN_REQUESTS_BEFORE_TRIP",
        "CIRCUIT_BREAKER_FAILURE_THRESHOLD_PERCENT",
        "CIRCUIT_BREAKER_WINDOW",
        "DATABASE_URL",
        "DATABASE_MAX_CONNECTIONS",
    ];

    fn unset_all_but(overrides: Vec<(&'static str, Option<&'static str>)>) -> Vec<(&'static str, Option<&'static str>)> {
        let mut vars: Vec<(&'static str, Option<&'static str>)> = ALL_KEYS
            .iter()
            .filter(|key| !overrides.iter().any(|(k, _)| k == *key))
            .map(|key| (*key, None))
            .collect();
        vars.extend(overrides);
        vars
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("60s"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("10m"), Some(Duration::from_secs(600)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration(" 5s "), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration("60"), None);
        assert_eq!(parse_duration("s"), None);
        assert_eq!(parse_duration("10 minutes"), None);
        assert_eq!(parse_duration("-5s"), None);
    }

    #[test]
    fn test_defaults_with_database_url() {
        let vars = unset_all_but(vec![("DATABASE_URL", Some("postgres://localhost/notify"))]);
        temp_env::with_vars(vars, || {
            let config = AppConfig::from_env().unwrap();

            assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
            assert_eq!(config.client.timeout, Duration::from_secs(5));
            assert_eq!(config.cache.ttl, Duration::from_secs(600));
            assert_eq!(config.cache.max_cost, 1_073_741_824);
            assert_eq!(config.circuit_breaker.max_half_open_requests, 5);
            assert_eq!(config.circuit_breaker.open_state_timeout, Duration::from_secs(60));
            assert_eq!(config.circuit_breaker.min_requests_before_trip, 3);
            assert!((config.circuit_breaker.failure_threshold - 0.6).abs() < f64::EPSILON);
            assert_eq!(config.circuit_breaker.window, None);
            assert_eq!(config.database.max_connections, 10);
        });
    }

    #[test]
    fn test_missing_database_url() {
        temp_env::with_vars(unset_all_but(vec![]), || {
            let err = AppConfig::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "DATABASE_URL"));
        });
    }

    #[test]
    fn test_overrides() {
        let vars = unset_all_but(vec![
            ("DATABASE_URL", Some("postgres://db/notify")),
            ("HTTP_CLIENT_TIMEOUT", Some("750ms")),
            ("CIRCUIT_BREAKER_FAILURE_THRESHOLD_PERCENT", Some("50")),
            ("CIRCUIT_BREAKER_WINDOW", Some("30s")),
        ]);
        temp_env::with_vars(vars, || {
            let config = AppConfig::from_env().unwrap();

            assert_eq!(config.client.timeout, Duration::from_millis(750));
            assert!((config.circuit_breaker.failure_threshold - 0.5).abs() < f64::EPSILON);
            assert_eq!(config.circuit_breaker.window, Some(Duration::from_secs(30)));
        });
    }

    #[test]
    fn test_invalid_value_names_variable() {
        let vars = unset_all_but(vec![
            ("DATABASE_URL", Some("postgres://db/notify")),
            ("CACHE_EXPIRED_TIME", Some("forever")),
        ]);
        temp_env::with_vars(vars, || {
            let err = AppConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("CACHE_EXPIRED_TIME"));
        });
    }

    #[test]
    fn test_threshold_out_of_range() {
        let vars = unset_all_but(vec![
            ("DATABASE_URL", Some("postgres://db/notify")),
            ("CIRCUIT_BREAKER_FAILURE_THRESHOLD_PERCENT", Some("150")),
        ]);
        temp_env::with_vars(vars, || {
            assert!(AppConfig::from_env().is_err());
        });
    }

    #[test]
    fn test_zero_half_open_requests_rejected() {
        let vars = unset_all_but(vec![
            ("DATABASE_URL", Some("postgres://db/notify")),
            ("CIRCUIT_BREAKER_MAX_HALF_OPEN_REQUESTS", Some("0")),
        ]);
        temp_env::with_vars(vars, || {
            let err = AppConfig::from_env().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::ParseError { ref key, .. } if key == "CIRCUIT_BREAKER_MAX_HALF_OPEN_REQUESTS"
            ));
        });
    }
}
