use std::future::Future;

use time::macros::date;

use super::{at_hour, ConformanceStore, TestResult};
use crate::{Narrative, SubjectId, TrendCacheEntry, TrendCacheStore, TrendKey};

pub(super) async fn run_cache_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "cache",
            "missing_key_returns_none",
            missing_key_returns_none(factory).await,
        ),
        TestResult::from_result(
            "cache",
            "insert_then_get_returns_entry",
            insert_then_get_returns_entry(factory).await,
        ),
        TestResult::from_result(
            "cache",
            "second_insert_is_ignored",
            second_insert_is_ignored(factory).await,
        ),
        TestResult::from_result(
            "cache",
            "keys_differ_by_subject_and_range",
            keys_differ_by_subject_and_range(factory).await,
        ),
    ]
}

fn key(subject: &str, start_day: u8, end_day: u8) -> TrendKey {
    let start = date!(2024 - 01 - 01)
        .replace_day(start_day)
        .unwrap_or(date!(2024 - 01 - 01));
    let end = date!(2024 - 01 - 01)
        .replace_day(end_day)
        .unwrap_or(date!(2024 - 01 - 01));
    TrendKey {
        subject: SubjectId::new(subject),
        start,
        end,
    }
}

fn entry(key: TrendKey, grade: &str) -> TrendCacheEntry {
    TrendCacheEntry {
        key,
        narrative: Narrative(serde_json::json!({"grade": grade, "summary": "stable"})),
        sample_count: 5,
        created_at: at_hour(200),
    }
}

async fn missing_key_returns_none<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match TrendCacheStore::get(&s, &key("kid", 1, 5)).await {
        Ok(None) => Ok(()),
        other => Err(format!("expected Ok(None), got {other:?}")),
    }
}

async fn insert_then_get_returns_entry<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let e = entry(key("kid", 1, 5), "A");
    let wrote = s
        .insert_if_absent(e.clone())
        .await
        .map_err(|e| e.to_string())?;
    if !wrote {
        return Err("first insert reported no write".to_string());
    }
    let read = TrendCacheStore::get(&s, &e.key)
        .await
        .map_err(|e| e.to_string())?;
    if read.as_ref() != Some(&e) {
        return Err(format!("expected {e:?}, got {read:?}"));
    }
    Ok(())
}

/// Write-once: the first narrative written for a key is the one kept.
async fn second_insert_is_ignored<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let first = entry(key("kid", 1, 5), "A");
    let second = entry(key("kid", 1, 5), "D");
    s.insert_if_absent(first.clone())
        .await
        .map_err(|e| e.to_string())?;
    let wrote = s
        .insert_if_absent(second)
        .await
        .map_err(|e| e.to_string())?;
    if wrote {
        return Err("second insert reported a write".to_string());
    }
    let read = TrendCacheStore::get(&s, &first.key)
        .await
        .map_err(|e| e.to_string())?;
    if read.map(|e| e.narrative) != Some(first.narrative) {
        return Err("cached narrative was replaced".to_string());
    }
    Ok(())
}

async fn keys_differ_by_subject_and_range<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ConformanceStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.insert_if_absent(entry(key("kid", 1, 5), "A"))
        .await
        .map_err(|e| e.to_string())?;
    for other in [key("grandpa", 1, 5), key("kid", 1, 6), key("kid", 2, 5)] {
        let read = TrendCacheStore::get(&s, &other)
            .await
            .map_err(|e| e.to_string())?;
        if read.is_some() {
            return Err(format!("unexpected hit for {other:?}"));
        }
    }
    Ok(())
}
