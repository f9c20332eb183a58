//! Conformance test suite for `ObservationStore` + `TrendCacheStore`
//! implementations.
//!
//! This module provides a backend-agnostic test suite that any backend can
//! run to verify correctness. The suite covers:
//!
//! - **Create**: empty slot, version 0, monotonically increasing ids
//! - **Query**: ordering of `list_by_subject` and `list_in_window`, subject isolation
//! - **Slot CAS**: matching expectations win, stale expectations conflict
//! - **Attributes**: shallow merge without touching the slot
//! - **Delete**: removal and `NotFound` semantics
//! - **Trend cache**: write-once behaviour
//! - **Concurrency**: racing CAS writers, exactly one wins
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use vitalog_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn sqlite_conformance() {
//!     let report = run_conformance_suite(|| async { SqliteStore::open_in_memory().unwrap() }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod cache;
mod concurrent;
mod create;
mod query;
mod slot;

use std::fmt;
use std::future::Future;

use time::OffsetDateTime;

use crate::record::{NewObservation, SubjectId};
use crate::traits::{ObservationStore, TrendCacheStore};

/// Everything a complete backend implements.
pub trait ConformanceStore: ObservationStore + TrendCacheStore {}

impl<T: ObservationStore + TrendCacheStore> ConformanceStore for T {}

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "create", "slot", "cache").
    pub category: String,
    /// Test name (e.g. "create_starts_with_empty_slot").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self {
                category: category.to_string(),
                name: name.to_string(),
                passed: true,
                message: None,
            },
            Err(msg) => Self {
                category: category.to_string(),
                name: name.to_string(),
                passed: false,
                message: Some(msg),
            },
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(create::run_create_tests(&factory).await);
    results.extend(query::run_query_tests(&factory).await);
    results.extend(slot::run_slot_tests(&factory).await);
    results.extend(cache::run_cache_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// 2024-01-01T00:00:00Z plus `hours`.
fn at_hour(hours: i64) -> OffsetDateTime {
    time::macros::datetime!(2024-01-01 00:00 UTC) + time::Duration::hours(hours)
}

fn make_observation(subject: &str, observed_at: OffsetDateTime) -> NewObservation {
    NewObservation {
        subject: SubjectId::new(subject),
        image_ref: format!("uploads/{subject}-{}.jpg", observed_at.unix_timestamp()),
        attributes: serde_json::json!({"effort": 2, "note": "conformance"})
            .as_object()
            .cloned()
            .unwrap_or_default(),
        observed_at,
        submitted_at: observed_at,
    }
}
