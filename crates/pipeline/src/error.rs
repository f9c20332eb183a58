use time::Date;
use vitalog_storage::StorageError;

/// Structural failures of the pipeline.
///
/// Interpreter and summarizer failures never appear here: they are recorded
/// as `Failed` slots or `GenerationFailed` report statuses.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid date range: {start} .. {end}")]
    InvalidRange { start: Date, end: Date },

    #[error("analysis task did not complete: {0}")]
    Join(String),
}
