use std::sync::Arc;

use serde::Serialize;
use time::{Date, OffsetDateTime};
use vitalog_storage::{Narrative, ObservationRecord, ObservationStore, SubjectId, TrendKey};

use super::cache::TrendCache;
use super::stats::{TrendEntry, WindowStats};
use crate::clock::Clock;
use crate::error::PipelineError;
use crate::provider::{SummaryContext, Summarizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendStatus {
    /// The window reaches today or later; no narrative is produced.
    ActivePeriod,
    /// Closed window below the minimum sample; the summarizer was not called.
    InsufficientData,
    /// The summarizer failed; nothing was cached.
    GenerationFailed,
    Cached,
    Fresh,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
    pub stats: WindowStats,
    pub narrative: Option<Narrative>,
    pub status: TrendStatus,
    /// The window's observations, oldest first.
    pub entries: Vec<TrendEntry>,
}

#[derive(Clone)]
pub struct TrendAggregator {
    observations: Arc<dyn ObservationStore>,
    cache: TrendCache,
    summarizer: Arc<dyn Summarizer>,
    clock: Arc<dyn Clock>,
    minimum_sample: usize,
}

impl TrendAggregator {
    pub fn new(
        observations: Arc<dyn ObservationStore>,
        cache: TrendCache,
        summarizer: Arc<dyn Summarizer>,
        clock: Arc<dyn Clock>,
        minimum_sample: usize,
    ) -> Self {
        Self {
            observations,
            cache,
            summarizer,
            clock,
            minimum_sample,
        }
    }

    /// Build the report for `subject` over `start..=end` (UTC calendar days).
    pub async fn report(
        &self,
        subject: &SubjectId,
        start: Date,
        end: Date,
        context: &SummaryContext,
    ) -> Result<TrendReport, PipelineError> {
        let (from, until) = window_bounds(start, end)?;
        let records = self
            .observations
            .list_in_window(subject, from, until)
            .await?;
        let stats = WindowStats::compute(&records);
        let entries: Vec<TrendEntry> = records.iter().map(TrendEntry::from_record).collect();

        let (narrative, status) = self
            .narrative_for(subject, start, end, &stats, &records, context)
            .await?;
        tracing::debug!(subject = %subject, %start, %end, count = stats.count, ?status, "trend report built");
        Ok(TrendReport {
            stats,
            narrative,
            status,
            entries,
        })
    }

    async fn narrative_for(
        &self,
        subject: &SubjectId,
        start: Date,
        end: Date,
        stats: &WindowStats,
        records: &[ObservationRecord],
        context: &SummaryContext,
    ) -> Result<(Option<Narrative>, TrendStatus), PipelineError> {
        if end >= self.clock.today() {
            return Ok((None, TrendStatus::ActivePeriod));
        }

        let key = TrendKey {
            subject: subject.clone(),
            start,
            end,
        };
        if let Some(narrative) = self.cache.get(&key).await? {
            tracing::debug!(subject = %subject, %start, %end, "trend cache hit");
            return Ok((Some(narrative), TrendStatus::Cached));
        }
        tracing::debug!(subject = %subject, %start, %end, "trend cache miss");

        if stats.count < self.minimum_sample {
            return Ok((None, TrendStatus::InsufficientData));
        }

        let context = if context.period_label.is_empty() {
            SummaryContext {
                language: context.language,
                period_label: format!("{start} to {end}"),
            }
        } else {
            context.clone()
        };
        match self.summarizer.summarize(stats, records, &context).await {
            Ok(narrative) => {
                self.cache.put(key, narrative.clone(), stats.count).await?;
                Ok((Some(narrative), TrendStatus::Fresh))
            }
            Err(e) => {
                tracing::warn!(subject = %subject, %start, %end, error = %e, "trend summarizer failed");
                Ok((None, TrendStatus::GenerationFailed))
            }
        }
    }
}

/// `[start 00:00 UTC, end+1 00:00 UTC)`.
fn window_bounds(start: Date, end: Date) -> Result<(OffsetDateTime, OffsetDateTime), PipelineError> {
    let after_end = end
        .next_day()
        .filter(|_| start <= end)
        .ok_or(PipelineError::InvalidRange { start, end })?;
    Ok((start.midnight().assume_utc(), after_end.midnight().assume_utc()))
}
