use std::future::Future;

use super::{at_hour, make_observation, ConformanceStore, TestResult};
use crate::{
    AnalysisResult, AnalysisSlot, FailureReason, ObservationId, ObservationStore, ScoreBand,
    StorageError, Verdict,
};

pub(super) async fn run_slot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "slot",
            "cas_from_observed_state_succeeds",
            cas_from_observed_state_succeeds(factory).await,
        ),
        TestResult::from_result(
            "slot",
            "cas_full_lifecycle_increments_version",
            cas_full_lifecycle_increments_version(factory).await,
        ),
        TestResult::from_result(
            "slot",
            "cas_with_stale_expectation_conflicts",
            cas_with_stale_expectation_conflicts(factory).await,
        ),
        TestResult::from_result(
            "slot",
            "conflict_leaves_slot_untouched",
            conflict_leaves_slot_untouched(factory).await,
        ),
        TestResult::from_result(
            "slot",
            "cas_compares_in_flight_timestamp",
            cas_compares_in_flight_timestamp(factory).await,
        ),
        TestResult::from_result(
            "slot",
            "succeeded_result_round_trips",
            succeeded_result_round_trips(factory).await,
        ),
        TestResult::from_result(
            "slot",
            "cas_unknown_id_returns_not_found",
            cas_unknown_id_returns_not_found(factory).await,
        ),
    ]
}

fn sample_result() -> AnalysisResult {
    AnalysisResult {
        verdict: Verdict::Valid {
            score_band: ScoreBand::BPlus,
        },
        extra: serde_json::json!({"short_summary": "Looks fine", "bristol": {"scale": 4}})
            .as_object()
            .cloned()
            .unwrap_or_default(),
    }
}

async fn cas_from_observed_state_succeeds<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let next = AnalysisSlot::InFlight {
        started_at: at_hour(1),
    };
    let updated = s
        .update_slot(rec.id, &AnalysisSlot::Empty, next.clone())
        .await
        .map_err(|e| e.to_string())?;
    if updated.slot != next {
        return Err(format!("expected {next:?}, got {:?}", updated.slot));
    }
    Ok(())
}

/// Empty -> InFlight -> Failed -> InFlight -> Succeeded, version 0..=4.
async fn cas_full_lifecycle_increments_version<S, F, Fut>(factory: &F) -> Result<(), String>
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

    let chain = [
        AnalysisSlot::Empty,
        AnalysisSlot::InFlight {
            started_at: at_hour(1),
        },
        AnalysisSlot::Failed {
            reason: FailureReason::ExternalError,
            at: at_hour(2),
        },
        AnalysisSlot::InFlight {
            started_at: at_hour(3),
        },
        AnalysisSlot::Succeeded {
            result: sample_result(),
        },
    ];

    for (i, pair) in chain.windows(2).enumerate() {
        let updated = s
            .update_slot(rec.id, &pair[0], pair[1].clone())
            .await
            .map_err(|e| format!("step {i}: {e}"))?;
        let expected_version = i as i64 + 1;
        if updated.version != expected_version {
            return Err(format!(
                "step {i}: expected version {expected_version}, got {}",
                updated.version
            ));
        }
    }
    Ok(())
}

async fn cas_with_stale_expectation_conflicts<S, F, Fut>(factory: &F) -> Result<(), String>
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
    s.update_slot(
        rec.id,
        &AnalysisSlot::Empty,
        AnalysisSlot::InFlight {
            started_at: at_hour(1),
        },
    )
    .await
    .map_err(|e| e.to_string())?;

    // A second writer that still believes the slot is Empty must lose.
    match s
        .update_slot(
            rec.id,
            &AnalysisSlot::Empty,
            AnalysisSlot::InFlight {
                started_at: at_hour(2),
            },
        )
        .await
    {
        Err(StorageError::Conflict { id }) if id == rec.id => Ok(()),
        other => Err(format!("expected Conflict, got {other:?}")),
    }
}

async fn conflict_leaves_slot_untouched<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let _ = s
        .update_slot(
            rec.id,
            &AnalysisSlot::InFlight {
                started_at: at_hour(1),
            },
            AnalysisSlot::Succeeded {
                result: sample_result(),
            },
        )
        .await;
    let read = ObservationStore::get(&s, rec.id)
        .await
        .map_err(|e| e.to_string())?;
    if read.slot != AnalysisSlot::Empty || read.version != 0 {
        return Err(format!(
            "expected untouched Empty/v0, got {:?}/v{}",
            read.slot, read.version
        ));
    }
    Ok(())
}

/// Two in-flight states with different start times are different states.
async fn cas_compares_in_flight_timestamp<S, F, Fut>(factory: &F) -> Result<(), String>
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
    s.update_slot(
        rec.id,
        &AnalysisSlot::Empty,
        AnalysisSlot::InFlight {
            started_at: at_hour(1),
        },
    )
    .await
    .map_err(|e| e.to_string())?;

    match s
        .update_slot(
            rec.id,
            &AnalysisSlot::InFlight {
                started_at: at_hour(2),
            },
            AnalysisSlot::Failed {
                reason: FailureReason::Unparseable,
                at: at_hour(3),
            },
        )
        .await
    {
        Err(StorageError::Conflict { .. }) => Ok(()),
        other => Err(format!("expected Conflict, got {other:?}")),
    }
}

async fn succeeded_result_round_trips<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let done = AnalysisSlot::Succeeded {
        result: sample_result(),
    };
    s.update_slot(rec.id, &in_flight, done.clone())
        .await
        .map_err(|e| e.to_string())?;

    let read = ObservationStore::get(&s, rec.id)
        .await
        .map_err(|e| e.to_string())?;
    if read.slot != done {
        return Err(format!("expected {done:?}, got {:?}", read.slot));
    }
    // The stored result must be usable as the expectation of a later CAS.
    s.update_slot(rec.id, &done, done.clone())
        .await
        .map_err(|e| format!("CAS against read-back result failed: {e}"))?;
    Ok(())
}

async fn cas_unknown_id_returns_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s
        .update_slot(
            ObservationId(77),
            &AnalysisSlot::Empty,
            AnalysisSlot::InFlight {
                started_at: at_hour(0),
            },
        )
        .await
    {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound, got {other:?}")),
    }
}
