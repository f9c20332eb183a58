use serde::Serialize;
use time::{Date, OffsetDateTime, UtcOffset};
use vitalog_storage::{AnalysisSlot, BandCounts, ObservationId, ObservationRecord, ScoreBand};

/// Aggregates over one window. Always recomputed, never cached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStats {
    pub count: usize,
    /// Observations with a valid (non-rejected) result.
    pub analyzed: usize,
    pub rejected: usize,
    /// `Empty` or `InFlight`.
    pub pending: usize,
    pub failed: usize,
    /// Mean ordinal (1 = D .. 10 = A+) over valid results.
    pub mean_score: Option<f64>,
    pub band_counts: BandCounts,
    #[serde(with = "time::serde::rfc3339::option")]
    pub first_observed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_observed_at: Option<OffsetDateTime>,
}

impl WindowStats {
    pub fn compute(records: &[ObservationRecord]) -> Self {
        let mut stats = WindowStats {
            count: records.len(),
            analyzed: 0,
            rejected: 0,
            pending: 0,
            failed: 0,
            mean_score: None,
            band_counts: BandCounts::new(),
            first_observed_at: records.iter().map(|r| r.observed_at).min(),
            last_observed_at: records.iter().map(|r| r.observed_at).max(),
        };
        let mut ordinal_sum = 0u64;

        for record in records {
            match &record.slot {
                AnalysisSlot::Empty | AnalysisSlot::InFlight { .. } => stats.pending += 1,
                AnalysisSlot::Failed { .. } => stats.failed += 1,
                AnalysisSlot::Succeeded { result } => match result.score_band() {
                    Some(band) => {
                        stats.analyzed += 1;
                        ordinal_sum += u64::from(band.ordinal());
                        *stats.band_counts.entry(band).or_insert(0) += 1;
                    }
                    None => stats.rejected += 1,
                },
            }
        }

        if stats.analyzed > 0 {
            stats.mean_score = Some(ordinal_sum as f64 / stats.analyzed as f64);
        }
        stats
    }
}

/// One observation as shown alongside a trend report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendEntry {
    pub id: ObservationId,
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
    #[serde(with = "vitalog_storage::calendar_day")]
    pub date: Date,
    pub score_band: Option<ScoreBand>,
    pub rejected: bool,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl TrendEntry {
    pub fn from_record(record: &ObservationRecord) -> Self {
        let (score_band, rejected) = match &record.slot {
            AnalysisSlot::Succeeded { result } => (result.score_band(), result.is_rejection()),
            _ => (None, false),
        };
        Self {
            id: record.id,
            observed_at: record.observed_at,
            date: record.observed_at.to_offset(UtcOffset::UTC).date(),
            score_band,
            rejected,
            attributes: record.attributes.clone(),
        }
    }
}
