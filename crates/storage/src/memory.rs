//! In-process backend for tests, demos, and single-node deployments that do
//! not need durability.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::record::{
    merge_attributes, AnalysisSlot, NewObservation, ObservationId, ObservationRecord, SubjectId,
    TrendCacheEntry, TrendKey,
};
use crate::traits::{ObservationStore, TrendCacheStore};

#[derive(Default)]
struct Inner {
    next_id: u64,
    observations: BTreeMap<ObservationId, ObservationRecord>,
    trend_cache: HashMap<TrendKey, TrendCacheEntry>,
}

/// Memory-backed `ObservationStore` + `TrendCacheStore`.
///
/// The mutex is held only for the duration of a single read or CAS and
/// never across an `.await`. Clones share the same underlying state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Backend("memory store mutex poisoned".to_string()))
    }
}

#[async_trait]
impl ObservationStore for MemoryStore {
    async fn create(&self, observation: NewObservation) -> Result<ObservationRecord, StorageError> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let id = ObservationId(inner.next_id);
        let record = ObservationRecord {
            id,
            subject: observation.subject,
            image_ref: observation.image_ref,
            attributes: observation.attributes,
            observed_at: observation.observed_at,
            submitted_at: observation.submitted_at,
            slot: AnalysisSlot::Empty,
            version: 0,
        };
        inner.observations.insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: ObservationId) -> Result<ObservationRecord, StorageError> {
        self.lock()?
            .observations
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound { id })
    }

    async fn list_by_subject(
        &self,
        subject: &SubjectId,
    ) -> Result<Vec<ObservationRecord>, StorageError> {
        let inner = self.lock()?;
        let mut records: Vec<ObservationRecord> = inner
            .observations
            .values()
            .filter(|r| &r.subject == subject)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.observed_at.cmp(&a.observed_at).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    async fn list_in_window(
        &self,
        subject: &SubjectId,
        from: OffsetDateTime,
        until: OffsetDateTime,
    ) -> Result<Vec<ObservationRecord>, StorageError> {
        let inner = self.lock()?;
        let mut records: Vec<ObservationRecord> = inner
            .observations
            .values()
            .filter(|r| &r.subject == subject && r.observed_at >= from && r.observed_at < until)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.observed_at.cmp(&b.observed_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn update_slot(
        &self,
        id: ObservationId,
        expected: &AnalysisSlot,
        new: AnalysisSlot,
    ) -> Result<ObservationRecord, StorageError> {
        let mut inner = self.lock()?;
        let record = inner
            .observations
            .get_mut(&id)
            .ok_or(StorageError::NotFound { id })?;
        if &record.slot != expected {
            return Err(StorageError::Conflict { id });
        }
        record.slot = new;
        record.version += 1;
        Ok(record.clone())
    }

    async fn update_attributes(
        &self,
        id: ObservationId,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ObservationRecord, StorageError> {
        let mut inner = self.lock()?;
        let record = inner
            .observations
            .get_mut(&id)
            .ok_or(StorageError::NotFound { id })?;
        merge_attributes(&mut record.attributes, patch);
        record.version += 1;
        Ok(record.clone())
    }

    async fn delete(&self, id: ObservationId) -> Result<(), StorageError> {
        self.lock()?
            .observations
            .remove(&id)
            .map(|_| ())
            .ok_or(StorageError::NotFound { id })
    }
}

#[async_trait]
impl TrendCacheStore for MemoryStore {
    async fn get(&self, key: &TrendKey) -> Result<Option<TrendCacheEntry>, StorageError> {
        Ok(self.lock()?.trend_cache.get(key).cloned())
    }

    async fn insert_if_absent(&self, entry: TrendCacheEntry) -> Result<bool, StorageError> {
        let mut inner = self.lock()?;
        if inner.trend_cache.contains_key(&entry.key) {
            return Ok(false);
        }
        inner.trend_cache.insert(entry.key.clone(), entry);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::run_conformance_suite;

    #[tokio::test]
    async fn memory_store_passes_conformance_suite() {
        let report = run_conformance_suite(|| async { MemoryStore::new() }).await;
        assert!(report.failed == 0, "{report}");
        assert!(report.total > 0);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let a = MemoryStore::new();
        let b = a.clone();
        let created = a
            .create(NewObservation {
                subject: SubjectId::new("s"),
                image_ref: "img.jpg".to_string(),
                attributes: serde_json::Map::new(),
                observed_at: OffsetDateTime::UNIX_EPOCH,
                submitted_at: OffsetDateTime::UNIX_EPOCH,
            })
            .await
            .unwrap();
        let seen = ObservationStore::get(&b, created.id).await.unwrap();
        assert_eq!(seen, created);
    }
}
