use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::record::{
    AnalysisSlot, NewObservation, ObservationId, ObservationRecord, SubjectId,
    TrendCacheEntry, TrendKey,
};

/// Durable record of logged observations and their analysis slots.
///
/// ## Slot CAS
///
/// `update_slot` is the only way to change an observation's `AnalysisSlot`.
/// It is a compare-and-swap: the write happens only if the stored slot is
/// equal to `expected`; otherwise the method returns
/// `Err(StorageError::Conflict { .. })` and leaves the row untouched.
/// Backends without single-field CAS must re-read and compare the full prior
/// slot inside a transaction, or key the update on `version`.
///
/// No method may hold a lock across an `.await` owned by the caller;
/// every call is expected to complete promptly.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared between
/// spawned analysis tasks and HTTP handlers.
#[async_trait]
pub trait ObservationStore: Send + Sync + 'static {
    /// Insert a new observation with an `Empty` slot and version 0.
    async fn create(&self, observation: NewObservation) -> Result<ObservationRecord, StorageError>;

    /// Read one observation.
    ///
    /// Returns `Err(StorageError::NotFound)` if it does not exist.
    async fn get(&self, id: ObservationId) -> Result<ObservationRecord, StorageError>;

    /// All observations of a subject, newest `observed_at` first.
    async fn list_by_subject(
        &self,
        subject: &SubjectId,
    ) -> Result<Vec<ObservationRecord>, StorageError>;

    /// Observations of a subject with `from <= observed_at < until`,
    /// oldest first.
    async fn list_in_window(
        &self,
        subject: &SubjectId,
        from: OffsetDateTime,
        until: OffsetDateTime,
    ) -> Result<Vec<ObservationRecord>, StorageError>;

    /// Compare-and-swap the analysis slot.
    ///
    /// Returns the updated record on success.
    async fn update_slot(
        &self,
        id: ObservationId,
        expected: &AnalysisSlot,
        new: AnalysisSlot,
    ) -> Result<ObservationRecord, StorageError>;

    /// Shallow-merge `patch` into the observation's attributes.
    /// A `null` value removes the key. Never touches the slot.
    async fn update_attributes(
        &self,
        id: ObservationId,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ObservationRecord, StorageError>;

    /// Delete an observation.
    ///
    /// Returns `Err(StorageError::NotFound)` if it does not exist.
    async fn delete(&self, id: ObservationId) -> Result<(), StorageError>;
}

/// Write-once persistence for trend narratives.
///
/// This is a pure keyed store. Whether a range may be cached at all is
/// decided by the caller before `insert_if_absent` is reached.
#[async_trait]
pub trait TrendCacheStore: Send + Sync + 'static {
    /// Look up a narrative. Never triggers computation.
    async fn get(&self, key: &TrendKey) -> Result<Option<TrendCacheEntry>, StorageError>;

    /// Insert an entry unless the key already exists.
    ///
    /// Returns `true` if this call wrote the entry, `false` if an entry was
    /// already present (in which case the stored entry is left unchanged).
    async fn insert_if_absent(&self, entry: TrendCacheEntry) -> Result<bool, StorageError>;
}

