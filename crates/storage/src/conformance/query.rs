use std::future::Future;

use super::{at_hour, make_observation, ConformanceStore, TestResult};
use crate::SubjectId;

pub(super) async fn run_query_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "query",
            "list_by_subject_is_newest_first",
            list_by_subject_is_newest_first(factory).await,
        ),
        TestResult::from_result(
            "query",
            "list_by_subject_isolates_subjects",
            list_by_subject_isolates_subjects(factory).await,
        ),
        TestResult::from_result(
            "query",
            "list_in_window_is_half_open_and_oldest_first",
            list_in_window_is_half_open_and_oldest_first(factory).await,
        ),
        TestResult::from_result(
            "query",
            "list_in_window_empty_subject",
            list_in_window_empty_subject(factory).await,
        ),
    ]
}

async fn list_by_subject_is_newest_first<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    // Inserted out of chronological order on purpose.
    for hour in [5, 1, 9, 3] {
        s.create(make_observation("kid", at_hour(hour)))
            .await
            .map_err(|e| e.to_string())?;
    }
    let listed = s
        .list_by_subject(&SubjectId::new("kid"))
        .await
        .map_err(|e| e.to_string())?;
    let hours: Vec<i64> = listed
        .iter()
        .map(|r| (r.observed_at - at_hour(0)).whole_hours())
        .collect();
    if hours != vec![9, 5, 3, 1] {
        return Err(format!("expected [9, 5, 3, 1], got {hours:?}"));
    }
    Ok(())
}

async fn list_by_subject_isolates_subjects<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.create(make_observation("kid", at_hour(0)))
        .await
        .map_err(|e| e.to_string())?;
    s.create(make_observation("grandpa", at_hour(1)))
        .await
        .map_err(|e| e.to_string())?;
    let listed = s
        .list_by_subject(&SubjectId::new("grandpa"))
        .await
        .map_err(|e| e.to_string())?;
    if listed.len() != 1 || listed[0].subject.as_str() != "grandpa" {
        return Err(format!("expected only grandpa's observation, got {listed:?}"));
    }
    Ok(())
}

/// `from` is inclusive, `until` exclusive; results are chronological.
async fn list_in_window_is_half_open_and_oldest_first<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for hour in [48, 0, 24, 47, 72] {
        s.create(make_observation("kid", at_hour(hour)))
            .await
            .map_err(|e| e.to_string())?;
    }
    s.create(make_observation("other", at_hour(30)))
        .await
        .map_err(|e| e.to_string())?;

    let window = s
        .list_in_window(&SubjectId::new("kid"), at_hour(0), at_hour(48))
        .await
        .map_err(|e| e.to_string())?;
    let hours: Vec<i64> = window
        .iter()
        .map(|r| (r.observed_at - at_hour(0)).whole_hours())
        .collect();
    if hours != vec![0, 24, 47] {
        return Err(format!("expected [0, 24, 47], got {hours:?}"));
    }
    Ok(())
}

async fn list_in_window_empty_subject<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let window = s
        .list_in_window(&SubjectId::new("nobody"), at_hour(0), at_hour(100))
        .await
        .map_err(|e| e.to_string())?;
    if !window.is_empty() {
        return Err(format!("expected no observations, got {}", window.len()));
    }
    Ok(())
}
