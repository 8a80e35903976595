use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::cache::PreferenceCache;
use super::store::{PreferenceStore, StoreError};
use crate::models::{Channel, PreferenceSet};

// ============================================================================
// Preference Resolver - cache-aside over the Preference Store
// ============================================================================
//
// Hit:  return the cached copy, no store access, no cache write.
// Miss: read the store; on success populate the cache, on error return the
//       error unchanged (nothing is cached for a failed lookup).
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("preference lookup cancelled")]
    Cancelled,
}

pub struct PreferenceResolver {
    cache: PreferenceCache,
    store: Arc<dyn PreferenceStore>,
}

impl PreferenceResolver {
    pub fn new(cache: PreferenceCache, store: Arc<dyn PreferenceStore>) -> Self {
        Self { cache, store }
    }

    pub async fn resolve(
        &self,
        cancel: &CancellationToken,
        channel: Channel,
    ) -> Result<PreferenceSet, ResolveError> {
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }

        if let Some(preferences) = self.cache.get(channel).await {
            return Ok(preferences);
        }

        let preferences = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ResolveError::Cancelled),
            found = self.store.find_by_channel(channel) => found?,
        };

        self.cache.set(channel, preferences.clone()).await;
        Ok(preferences)
    }
}
