use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::metrics::Metrics;
use crate::models::{Channel, PreferenceSet};

// ============================================================================
// Preference Cache - process-local, bounded, TTL-based
// ============================================================================
//
// Entries are weighed by their approximate size and admitted under a total
// cost budget (TinyLFU admission, LRU eviction). An entry may be evicted
// before its TTL under pressure; callers fall back to the store on a miss.
//
// ============================================================================

const CACHE_KEY_PREFIX: &str = "notification:preferences";

pub struct PreferenceCache {
    engine: Cache<Channel, PreferenceSet>,
    ttl: Duration,
    metrics: Arc<Metrics>,
}

impl PreferenceCache {
    pub fn new(config: &CacheConfig, metrics: Arc<Metrics>) -> Self {
        let engine = Cache::builder()
            .max_capacity(config.max_cost)
            .weigher(|_channel: &Channel, preferences: &PreferenceSet| -> u32 {
                preferences.approximate_size()
            })
            .time_to_live(config.ttl)
            .build();

        Self {
            engine,
            ttl: config.ttl,
            metrics,
        }
    }

    /// Returns a copy of the cached set, or `None` if absent or expired.
    pub async fn get(&self, channel: Channel) -> Option<PreferenceSet> {
        let cached = self.engine.get(&channel).await;
        self.metrics.record_cache_lookup(cached.is_some());

        match &cached {
            Some(preferences) => tracing::debug!(
                channel = %channel,
                preferences_count = preferences.len(),
                "Cache hit"
            ),
            None => tracing::debug!(
                channel = %channel,
                cache_key = %cache_key(channel),
                "Cache miss"
            ),
        }

        cached
    }

    /// Overwrites any existing entry and restarts its TTL. Never fails.
    pub async fn set(&self, channel: Channel, preferences: PreferenceSet) {
        let count = preferences.len();
        self.engine.insert(channel, preferences).await;

        tracing::debug!(
            channel = %channel,
            cache_key = %cache_key(channel),
            preferences_count = count,
            ttl_ms = self.ttl.as_millis() as u64,
            "Cache set"
        );
    }
}

#[cfg(test)]
impl PreferenceCache {
    /// Applies pending admissions and evictions so size limits are visible
    pub(crate) async fn run_pending_tasks(&self) {
        self.engine.run_pending_tasks().await;
    }
}

fn cache_key(channel: Channel) -> String {
    format!("{}:{}", CACHE_KEY_PREFIX, channel)
}
