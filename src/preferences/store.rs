use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::config::DatabaseConfig;
use crate::models::{Channel, DeliveryEndpoint, PreferenceSet};

// ============================================================================
// Preference Store - durable channel → endpoint configuration
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no delivery endpoints configured for channel {0}")]
    NotFound(Channel),

    #[error("preference store error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Source of truth for delivery preferences.
///
/// Implementations return endpoints ordered by ascending priority, or
/// [`StoreError::NotFound`] when the channel has no active endpoint.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn find_by_channel(&self, channel: Channel) -> Result<PreferenceSet, StoreError>;
}

const FIND_BY_CHANNEL: &str = "SELECT host, secret_key, priority \
     FROM notification_preferences \
     WHERE provider_type = $1 AND deleted_at IS NULL \
     ORDER BY priority ASC, id ASC";

pub struct PgPreferenceStore {
    pool: PgPool,
}

impl PgPreferenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl PreferenceStore for PgPreferenceStore {
    async fn find_by_channel(&self, channel: Channel) -> Result<PreferenceSet, StoreError> {
        let rows = sqlx::query(FIND_BY_CHANNEL)
            .bind(channel.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(
                    channel = %channel,
                    error = %e,
                    "Database query failed"
                );
                StoreError::from(e)
            })?;

        let endpoints = rows
            .iter()
            .map(|row| {
                Ok(DeliveryEndpoint {
                    url: row.try_get("host")?,
                    priority: row.try_get("priority")?,
                    secret: row.try_get("secret_key")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        PreferenceSet::new(endpoints).ok_or_else(|| {
            tracing::warn!(channel = %channel, "No preferences found for channel");
            StoreError::NotFound(channel)
        })
    }
}
