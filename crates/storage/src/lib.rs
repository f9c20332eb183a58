pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use record::{
    calendar_day, merge_attributes, AnalysisResult, AnalysisSlot, BandCounts, FailureReason,
    Narrative, NewObservation, ObservationId, ObservationRecord, ScoreBand, SubjectId,
    TrendCacheEntry, TrendKey, Verdict,
};
pub use traits::{ObservationStore, TrendCacheStore};
