use std::sync::Arc;

use vitalog_storage::{Narrative, StorageError, TrendCacheEntry, TrendCacheStore, TrendKey};

use crate::clock::Clock;

/// Write-once narrative cache with the cacheability policy applied on `put`.
#[derive(Clone)]
pub struct TrendCache {
    store: Arc<dyn TrendCacheStore>,
    clock: Arc<dyn Clock>,
    minimum_sample: usize,
}

impl TrendCache {
    pub fn new(store: Arc<dyn TrendCacheStore>, clock: Arc<dyn Clock>, minimum_sample: usize) -> Self {
        Self {
            store,
            clock,
            minimum_sample,
        }
    }

    /// Pure lookup.
    pub async fn get(&self, key: &TrendKey) -> Result<Option<Narrative>, StorageError> {
        Ok(self.store.get(key).await?.map(|entry| entry.narrative))
    }

    /// Store `narrative` for `key` if the window is closed and the sample is
    /// large enough. Anything else is silently ignored, as is a second write
    /// to an existing key. Returns whether a row was written.
    pub async fn put(
        &self,
        key: TrendKey,
        narrative: Narrative,
        sample_count: usize,
    ) -> Result<bool, StorageError> {
        let now = self.clock.now();
        if key.end >= self.clock.today() {
            tracing::debug!(subject = %key.subject, end = %key.end, "window still open; not caching");
            return Ok(false);
        }
        if sample_count < self.minimum_sample {
            tracing::debug!(
                subject = %key.subject,
                sample_count,
                minimum = self.minimum_sample,
                "sample too small; not caching"
            );
            return Ok(false);
        }

        let subject = key.subject.clone();
        let written = self
            .store
            .insert_if_absent(TrendCacheEntry {
                key,
                narrative,
                sample_count,
                created_at: now,
            })
            .await?;
        if written {
            tracing::info!(subject = %subject, sample_count, "trend narrative cached");
        } else {
            tracing::debug!(subject = %subject, "trend narrative already cached; keeping first");
        }
        Ok(written)
    }
}
