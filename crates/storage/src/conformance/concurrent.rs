use std::future::Future;
use std::sync::Arc;

use time::macros::date;

use super::{at_hour, make_observation, ConformanceStore, TestResult};
use crate::{
    AnalysisSlot, Narrative, ObservationStore, StorageError, SubjectId, TrendCacheEntry,
    TrendCacheStore, TrendKey,
};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "concurrent_cas_exactly_one_wins",
            concurrent_cas_exactly_one_wins(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "concurrent_cas_different_observations_all_succeed",
            concurrent_cas_different_observations_all_succeed(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "concurrent_cache_inserts_exactly_one_wins",
            concurrent_cache_inserts_exactly_one_wins(factory).await,
        ),
    ]
}

// ── Concurrent CAS: exactly one wins ────────────────────────────────────────

/// N tasks each try to move the same observation from `Empty` to
/// `InFlight`. Exactly one succeeds; the rest must get `Conflict`.
async fn concurrent_cas_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let rec = storage
        .create(make_observation("kid", at_hour(0)))
        .await
        .map_err(|e| format!("create: {e}"))?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        let id = rec.id;
        handles.push(tokio::spawn(async move {
            let result = s
                .update_slot(
                    id,
                    &AnalysisSlot::Empty,
                    AnalysisSlot::InFlight {
                        started_at: at_hour(i as i64 + 1),
                    },
                )
                .await;
            match result {
                Ok(_) => Ok(true),
                Err(StorageError::Conflict { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    let mut winners = 0usize;
    let mut losers = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        } else {
            losers += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
    }

    let final_rec = ObservationStore::get(storage.as_ref(), rec.id)
        .await
        .map_err(|e| e.to_string())?;
    if final_rec.version != 1 {
        return Err(format!("expected version 1, got {}", final_rec.version));
    }
    Ok(())
}

// ── Unrelated observations never conflict ───────────────────────────────────

async fn concurrent_cas_different_observations_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let mut ids = Vec::new();
    for i in 0..N {
        let rec = storage
            .create(make_observation("kid", at_hour(i as i64)))
            .await
            .map_err(|e| format!("create {i}: {e}"))?;
        ids.push(rec.id);
    }

    let mut handles = Vec::new();
    for id in ids {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            s.update_slot(
                id,
                &AnalysisSlot::Empty,
                AnalysisSlot::InFlight {
                    started_at: at_hour(100),
                },
            )
            .await
        }));
    }

    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
    }
    Ok(())
}

// ── Concurrent cache writes: first writer wins ──────────────────────────────

async fn concurrent_cache_inserts_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let key = TrendKey {
        subject: SubjectId::new("kid"),
        start: date!(2024 - 01 - 01),
        end: date!(2024 - 01 - 07),
    };

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            s.insert_if_absent(TrendCacheEntry {
                key,
                narrative: Narrative(serde_json::json!({"writer": i})),
                sample_count: 3,
                created_at: at_hour(500),
            })
            .await
        }));
    }

    let mut writes = 0usize;
    for handle in handles {
        let wrote = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        if wrote {
            writes += 1;
        }
    }
    if writes != 1 {
        return Err(format!("expected exactly 1 write, got {writes}"));
    }

    if TrendCacheStore::get(storage.as_ref(), &key)
        .await
        .map_err(|e| e.to_string())?
        .is_none()
    {
        return Err("entry missing after concurrent inserts".to_string());
    }
    Ok(())
}
