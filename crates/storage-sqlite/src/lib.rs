//! SQLite backend for vitalog.
//!
//! One connection behind a mutex; every trait call runs on the blocking
//! pool so a slow disk never stalls the async runtime. Slot CAS re-reads and
//! compares the full prior slot inside a transaction, then bumps `version`.

mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;
use time::macros::format_description;
use vitalog_storage::{
    merge_attributes, AnalysisSlot, Narrative, NewObservation, ObservationId,
    ObservationRecord, ObservationStore, StorageError, SubjectId, TrendCacheEntry,
    TrendCacheStore, TrendKey,
};

use crate::schema::{
    backend, decode_slot, encode_slot, format_instant, instant_key, parse_instant, RawObservation,
    SELECT_OBSERVATION,
};

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) a database file and apply migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref()).map_err(backend)?;
        tracing::debug!(path = %path.as_ref().display(), "opened sqlite store");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory().map_err(backend)?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StorageError::Backend("sqlite mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Backend(format!("task join error: {e}")))?
    }
}

fn load(conn: &Connection, id: ObservationId) -> Result<ObservationRecord, StorageError> {
    let sql = format!("{SELECT_OBSERVATION} WHERE id = ?1");
    let raw = conn
        .query_row(&sql, params![id.0 as i64], RawObservation::from_row)
        .optional()
        .map_err(backend)?
        .ok_or(StorageError::NotFound { id })?;
    raw.decode()
}

fn query_many(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<ObservationRecord>, StorageError> {
    let mut stmt = conn.prepare(sql).map_err(backend)?;
    let rows = stmt
        .query_map(params, RawObservation::from_row)
        .map_err(backend)?;
    let mut records = Vec::new();
    for row in rows {
        records.push(row.map_err(backend)?.decode()?);
    }
    Ok(records)
}

#[async_trait]
impl ObservationStore for SqliteStore {
    async fn create(&self, observation: NewObservation) -> Result<ObservationRecord, StorageError> {
        let attributes_json =
            serde_json::to_string(&observation.attributes).map_err(backend)?;
        let observed_at = format_instant(observation.observed_at)?;
        let observed_at_ns = instant_key(observation.observed_at)?;
        let submitted_at = format_instant(observation.submitted_at)?;
        let slot_json = encode_slot(&AnalysisSlot::Empty)?;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO observations (subject, image_ref, attributes_json, observed_at, \
                 observed_at_ns, submitted_at, slot_state, slot_json, version) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
                params![
                    observation.subject.as_str(),
                    observation.image_ref,
                    attributes_json,
                    observed_at,
                    observed_at_ns,
                    submitted_at,
                    AnalysisSlot::Empty.kind(),
                    slot_json,
                ],
            )
            .map_err(backend)?;
            let id = ObservationId(conn.last_insert_rowid() as u64);
            load(conn, id)
        })
        .await
    }

    async fn get(&self, id: ObservationId) -> Result<ObservationRecord, StorageError> {
        self.with_conn(move |conn| load(conn, id)).await
    }

    async fn list_by_subject(
        &self,
        subject: &SubjectId,
    ) -> Result<Vec<ObservationRecord>, StorageError> {
        let subject = subject.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                "{SELECT_OBSERVATION} WHERE subject = ?1 ORDER BY observed_at_ns DESC, id DESC"
            );
            query_many(conn, &sql, params![subject.as_str()])
        })
        .await
    }

    async fn list_in_window(
        &self,
        subject: &SubjectId,
        from: OffsetDateTime,
        until: OffsetDateTime,
    ) -> Result<Vec<ObservationRecord>, StorageError> {
        let subject = subject.clone();
        let from = instant_key(from)?;
        let until = instant_key(until)?;
        self.with_conn(move |conn| {
            let sql = format!(
                "{SELECT_OBSERVATION} WHERE subject = ?1 AND observed_at_ns >= ?2 \
                 AND observed_at_ns < ?3 ORDER BY observed_at_ns ASC, id ASC"
            );
            query_many(conn, &sql, params![subject.as_str(), from, until])
        })
        .await
    }

    async fn update_slot(
        &self,
        id: ObservationId,
        expected: &AnalysisSlot,
        new: AnalysisSlot,
    ) -> Result<ObservationRecord, StorageError> {
        let expected = expected.clone();
        let new_json = encode_slot(&new)?;
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(backend)?;
            let current: String = tx
                .query_row(
                    "SELECT slot_json FROM observations WHERE id = ?1",
                    params![id.0 as i64],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend)?
                .ok_or(StorageError::NotFound { id })?;
            if decode_slot(&current)? != expected {
                return Err(StorageError::Conflict { id });
            }
            tx.execute(
                "UPDATE observations SET slot_state = ?1, slot_json = ?2, version = version + 1 \
                 WHERE id = ?3",
                params![new.kind(), new_json, id.0 as i64],
            )
            .map_err(backend)?;
            let record = load(&tx, id)?;
            tx.commit().map_err(backend)?;
            Ok(record)
        })
        .await
    }

    async fn update_attributes(
        &self,
        id: ObservationId,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ObservationRecord, StorageError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(backend)?;
            let mut record = load(&tx, id)?;
            merge_attributes(&mut record.attributes, patch);
            let attributes_json = serde_json::to_string(&record.attributes).map_err(backend)?;
            tx.execute(
                "UPDATE observations SET attributes_json = ?1, version = version + 1 WHERE id = ?2",
                params![attributes_json, id.0 as i64],
            )
            .map_err(backend)?;
            let record = load(&tx, id)?;
            tx.commit().map_err(backend)?;
            Ok(record)
        })
        .await
    }

    async fn delete(&self, id: ObservationId) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            let removed = conn
                .execute("DELETE FROM observations WHERE id = ?1", params![id.0 as i64])
                .map_err(backend)?;
            if removed == 0 {
                return Err(StorageError::NotFound { id });
            }
            Ok(())
        })
        .await
    }
}

fn format_day(day: time::Date) -> Result<String, StorageError> {
    day.format(format_description!("[year]-[month]-[day]"))
        .map_err(backend)
}

#[async_trait]
impl TrendCacheStore for SqliteStore {
    async fn get(&self, key: &TrendKey) -> Result<Option<TrendCacheEntry>, StorageError> {
        let key = key.clone();
        let start = format_day(key.start)?;
        let end = format_day(key.end)?;
        self.with_conn(move |conn| {
            let row: Option<(String, i64, String)> = conn
                .query_row(
                    "SELECT narrative_json, sample_count, created_at FROM trend_reports \
                     WHERE subject = ?1 AND start_date = ?2 AND end_date = ?3",
                    params![key.subject.as_str(), start, end],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(backend)?;
            let Some((narrative_json, sample_count, created_at)) = row else {
                return Ok(None);
            };
            Ok(Some(TrendCacheEntry {
                key,
                narrative: Narrative(serde_json::from_str(&narrative_json).map_err(backend)?),
                sample_count: sample_count as usize,
                created_at: parse_instant(&created_at)?,
            }))
        })
        .await
    }

    async fn insert_if_absent(&self, entry: TrendCacheEntry) -> Result<bool, StorageError> {
        let start = format_day(entry.key.start)?;
        let end = format_day(entry.key.end)?;
        let narrative_json = serde_json::to_string(&entry.narrative).map_err(backend)?;
        let created_at = format_instant(entry.created_at)?;
        self.with_conn(move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO trend_reports \
                     (subject, start_date, end_date, narrative_json, sample_count, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        entry.key.subject.as_str(),
                        start,
                        end,
                        narrative_json,
                        entry.sample_count as i64,
                        created_at,
                    ],
                )
                .map_err(backend)?;
            Ok(inserted == 1)
        })
        .await
    }
}
