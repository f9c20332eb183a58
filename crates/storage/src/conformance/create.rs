use std::future::Future;

use super::{at_hour, make_observation, ConformanceStore, TestResult};
use crate::{AnalysisSlot, ObservationId, ObservationStore, StorageError};

pub(super) async fn run_create_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "create",
            "create_starts_with_empty_slot_at_version_0",
            create_starts_with_empty_slot_at_version_0(factory).await,
        ),
        TestResult::from_result(
            "create",
            "create_assigns_increasing_ids",
            create_assigns_increasing_ids(factory).await,
        ),
        TestResult::from_result(
            "create",
            "created_observation_readable_via_get",
            created_observation_readable_via_get(factory).await,
        ),
        TestResult::from_result(
            "create",
            "get_unknown_id_returns_not_found",
            get_unknown_id_returns_not_found(factory).await,
        ),
        TestResult::from_result(
            "create",
            "delete_removes_observation",
            delete_removes_observation(factory).await,
        ),
        TestResult::from_result(
            "create",
            "delete_twice_returns_not_found",
            delete_twice_returns_not_found(factory).await,
        ),
        TestResult::from_result(
            "create",
            "update_attributes_merges_and_keeps_slot",
            update_attributes_merges_and_keeps_slot(factory).await,
        ),
        TestResult::from_result(
            "create",
            "update_attributes_unknown_id_returns_not_found",
            update_attributes_unknown_id_returns_not_found(factory).await,
        ),
    ]
}

// ── Test implementations ──────────────────────────────────────────────────────

/// A fresh observation has an `Empty` slot and version 0.
async fn create_starts_with_empty_slot_at_version_0<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let rec = s
        .create(make_observation("kid", at_hour(0)))
        .await
        .map_err(|e| e.to_string())?;
    if rec.slot != AnalysisSlot::Empty {
        return Err(format!("expected Empty slot, got {:?}", rec.slot));
    }
    if rec.version != 0 {
        return Err(format!("expected version 0, got {}", rec.version));
    }
    Ok(())
}

async fn create_assigns_increasing_ids<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let a = s
        .create(make_observation("kid", at_hour(0)))
        .await
        .map_err(|e| e.to_string())?;
    let b = s
        .create(make_observation("kid", at_hour(1)))
        .await
        .map_err(|e| e.to_string())?;
    if b.id <= a.id {
        return Err(format!("expected {} > {}", b.id, a.id));
    }
    Ok(())
}

async fn created_observation_readable_via_get<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let created = s
        .create(make_observation("kid", at_hour(3)))
        .await
        .map_err(|e| e.to_string())?;
    let read = ObservationStore::get(&s, created.id)
        .await
        .map_err(|e| e.to_string())?;
    if read != created {
        return Err(format!("read {read:?} differs from created {created:?}"));
    }
    if read.attributes.get("effort") != Some(&serde_json::json!(2)) {
        return Err("attributes were not persisted".to_string());
    }
    Ok(())
}

async fn get_unknown_id_returns_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match ObservationStore::get(&s, ObservationId(9_999)).await {
        Err(StorageError::NotFound { id }) if id == ObservationId(9_999) => Ok(()),
        other => Err(format!("expected NotFound, got {other:?}")),
    }
}

async fn delete_removes_observation<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let rec = s
        .create(make_observation("kid", at_hour(0)))
        .await
        .map_err(|e| e.to_string())?;
    s.delete(rec.id).await.map_err(|e| e.to_string())?;
    match ObservationStore::get(&s, rec.id).await {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound after delete, got {other:?}")),
    }
}

async fn delete_twice_returns_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let rec = s
        .create(make_observation("kid", at_hour(0)))
        .await
        .map_err(|e| e.to_string())?;
    s.delete(rec.id).await.map_err(|e| e.to_string())?;
    match s.delete(rec.id).await {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound on second delete, got {other:?}")),
    }
}

/// Attribute patches merge shallowly, bump the version, and leave the slot alone.
async fn update_attributes_merges_and_keeps_slot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let rec = s
        .create(make_observation("kid", at_hour(0)))
        .await
        .map_err(|e| e.to_string())?;
    let in_flight = AnalysisSlot::InFlight {
        started_at: at_hour(1),
    };
    s.update_slot(rec.id, &AnalysisSlot::Empty, in_flight.clone())
        .await
        .map_err(|e| e.to_string())?;

    let patch = serde_json::json!({"effort": 4, "note": null, "sensation": "incomplete"})
        .as_object()
        .cloned()
        .unwrap_or_default();
    let updated = s
        .update_attributes(rec.id, patch)
        .await
        .map_err(|e| e.to_string())?;

    if updated.slot != in_flight {
        return Err(format!("slot changed to {:?}", updated.slot));
    }
    if updated.attributes.get("effort") != Some(&serde_json::json!(4)) {
        return Err("effort not overwritten".to_string());
    }
    if updated.attributes.contains_key("note") {
        return Err("null patch value did not remove key".to_string());
    }
    if updated.attributes.get("sensation") != Some(&serde_json::json!("incomplete")) {
        return Err("sensation not added".to_string());
    }
    if updated.version != 2 {
        return Err(format!("expected version 2, got {}", updated.version));
    }
    Ok(())
}

async fn update_attributes_unknown_id_returns_not_found<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s
        .update_attributes(ObservationId(404), serde_json::Map::new())
        .await
    {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound, got {other:?}")),
    }
}
