use crate::record::ObservationId;

/// All errors that can be returned by an `ObservationStore` or
/// `TrendCacheStore` implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Compare-and-swap mismatch: the slot no longer holds the state the
    /// caller observed.
    #[error("analysis slot conflict on observation {id}")]
    Conflict { id: ObservationId },

    /// No observation with the given id.
    #[error("observation not found: {id}")]
    NotFound { id: ObservationId },

    /// The caller handed the store something it cannot persist
    /// (e.g. attributes that are not a JSON object).
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
