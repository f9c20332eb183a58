//! Table layout and row decoding.

use rusqlite::{Connection, Row};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use vitalog_storage::{AnalysisSlot, ObservationId, ObservationRecord, StorageError, SubjectId};

pub(crate) const MIGRATIONS: &str = r#"
PRAGMA journal_mode = WAL;
CREATE TABLE IF NOT EXISTS observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subject TEXT NOT NULL,
    image_ref TEXT NOT NULL,
    attributes_json TEXT NOT NULL,
    observed_at TEXT NOT NULL,
    observed_at_ns INTEGER NOT NULL,
    submitted_at TEXT NOT NULL,
    slot_state TEXT NOT NULL,
    slot_json TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_observations_subject_time
ON observations(subject, observed_at_ns);

CREATE TABLE IF NOT EXISTS trend_reports (
    subject TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    narrative_json TEXT NOT NULL,
    sample_count INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (subject, start_date, end_date)
);
"#;

pub(crate) const SELECT_OBSERVATION: &str = "SELECT id, subject, image_ref, attributes_json, \
     observed_at, submitted_at, slot_json, version FROM observations";

pub(crate) fn migrate(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(MIGRATIONS).map_err(backend)
}

pub(crate) fn backend(e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(e.to_string())
}

pub(crate) fn format_instant(at: OffsetDateTime) -> Result<String, StorageError> {
    at.format(&Rfc3339).map_err(backend)
}

pub(crate) fn parse_instant(raw: &str) -> Result<OffsetDateTime, StorageError> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(backend)
}

/// Nanoseconds since the epoch, used for ordering and window queries.
pub(crate) fn instant_key(at: OffsetDateTime) -> Result<i64, StorageError> {
    i64::try_from(at.unix_timestamp_nanos())
        .map_err(|_| StorageError::InvalidRecord(format!("timestamp out of range: {at}")))
}

pub(crate) fn encode_slot(slot: &AnalysisSlot) -> Result<String, StorageError> {
    serde_json::to_string(slot).map_err(backend)
}

pub(crate) fn decode_slot(raw: &str) -> Result<AnalysisSlot, StorageError> {
    serde_json::from_str(raw).map_err(backend)
}

/// Columns as selected by `SELECT_OBSERVATION`, before JSON/time decoding.
pub(crate) struct RawObservation {
    id: i64,
    subject: String,
    image_ref: String,
    attributes_json: String,
    observed_at: String,
    submitted_at: String,
    slot_json: String,
    version: i64,
}

impl RawObservation {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            subject: row.get(1)?,
            image_ref: row.get(2)?,
            attributes_json: row.get(3)?,
            observed_at: row.get(4)?,
            submitted_at: row.get(5)?,
            slot_json: row.get(6)?,
            version: row.get(7)?,
        })
    }

    pub(crate) fn decode(self) -> Result<ObservationRecord, StorageError> {
        let attributes = match serde_json::from_str(&self.attributes_json).map_err(backend)? {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(StorageError::Backend(format!(
                    "observation {} has non-object attributes: {other}",
                    self.id
                )))
            }
        };
        Ok(ObservationRecord {
            id: ObservationId(self.id as u64),
            subject: SubjectId(self.subject),
            image_ref: self.image_ref,
            attributes,
            observed_at: parse_instant(&self.observed_at)?,
            submitted_at: parse_instant(&self.submitted_at)?,
            slot: decode_slot(&self.slot_json)?,
            version: self.version,
        })
    }
}
