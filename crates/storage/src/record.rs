use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

time::serde::format_description!(pub calendar_day, Date, "[year]-[month]-[day]");

/// Store-assigned observation identity. Monotonically increasing per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationId(pub u64);

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObservationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(ObservationId)
    }
}

/// The profile an observation is about. Opaque beyond equality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Input to `ObservationStore::create`.
#[derive(Debug, Clone)]
pub struct NewObservation {
    pub subject: SubjectId,
    /// Opaque reference to the stored image (file path or URL).
    pub image_ref: String,
    /// Free-form key/value attributes. Must be a JSON object.
    pub attributes: serde_json::Map<String, serde_json::Value>,
    /// Caller-supplied wall-clock time of the event.
    pub observed_at: OffsetDateTime,
    /// Server time at submission.
    pub submitted_at: OffsetDateTime,
}

/// One logged observation as stored in the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub id: ObservationId,
    pub subject: SubjectId,
    pub image_ref: String,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
    pub slot: AnalysisSlot,
    /// Incremented on every successful write to the row.
    pub version: i64,
}

/// Lifecycle of the single analysis attached to an observation.
///
/// Transitions are `Empty -> InFlight -> {Succeeded | Failed}`, and
/// `Failed -> InFlight` (or a stale `InFlight -> InFlight`) on retry.
/// Every transition goes through `ObservationStore::update_slot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AnalysisSlot {
    Empty,
    InFlight {
        #[serde(with = "time::serde::rfc3339")]
        started_at: OffsetDateTime,
    },
    Succeeded {
        result: AnalysisResult,
    },
    Failed {
        reason: FailureReason,
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
}

impl AnalysisSlot {
    /// Short label used in logs and SQL columns.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisSlot::Empty => "empty",
            AnalysisSlot::InFlight { .. } => "in_flight",
            AnalysisSlot::Succeeded { .. } => "succeeded",
            AnalysisSlot::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnalysisSlot::Succeeded { .. } | AnalysisSlot::Failed { .. }
        )
    }
}

/// Why an attempt ended without a usable result. Every reason is retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Provider outage, rate limit, transport error.
    ExternalError,
    /// The interpreter answered with nothing.
    EmptyResponse,
    /// The answer was not a payload we understand.
    Unparseable,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::ExternalError => "external_error",
            FailureReason::EmptyResponse => "empty_response",
            FailureReason::Unparseable => "unparseable",
        };
        f.write_str(s)
    }
}

/// Validated interpretation of one observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub verdict: Verdict,
    /// Display-only fields the core never reasons about.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AnalysisResult {
    pub fn score_band(&self) -> Option<ScoreBand> {
        match &self.verdict {
            Verdict::Valid { score_band } => Some(*score_band),
            _ => None,
        }
    }

    pub fn is_rejection(&self) -> bool {
        !matches!(self.verdict, Verdict::Valid { .. })
    }
}

/// Outcome of the validity check performed right after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    Valid { score_band: ScoreBand },
    RejectedSubjectMismatch { reason: Option<String> },
    RejectedPrivacy { reason: Option<String> },
}

/// Ordinal health grade, worst (`D`) to best (`A+`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScoreBand {
    #[serde(rename = "D")]
    D,
    #[serde(rename = "C-")]
    CMinus,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C+")]
    CPlus,
    #[serde(rename = "B-")]
    BMinus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "B+")]
    BPlus,
    #[serde(rename = "A-")]
    AMinus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A+")]
    APlus,
}

impl ScoreBand {
    pub const ALL: [ScoreBand; 10] = [
        ScoreBand::D,
        ScoreBand::CMinus,
        ScoreBand::C,
        ScoreBand::CPlus,
        ScoreBand::BMinus,
        ScoreBand::B,
        ScoreBand::BPlus,
        ScoreBand::AMinus,
        ScoreBand::A,
        ScoreBand::APlus,
    ];

    /// 1 for `D` through 10 for `A+`.
    pub fn ordinal(self) -> u8 {
        match self {
            ScoreBand::D => 1,
            ScoreBand::CMinus => 2,
            ScoreBand::C => 3,
            ScoreBand::CPlus => 4,
            ScoreBand::BMinus => 5,
            ScoreBand::B => 6,
            ScoreBand::BPlus => 7,
            ScoreBand::AMinus => 8,
            ScoreBand::A => 9,
            ScoreBand::APlus => 10,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ScoreBand::D => "D",
            ScoreBand::CMinus => "C-",
            ScoreBand::C => "C",
            ScoreBand::CPlus => "C+",
            ScoreBand::BMinus => "B-",
            ScoreBand::B => "B",
            ScoreBand::BPlus => "B+",
            ScoreBand::AMinus => "A-",
            ScoreBand::A => "A",
            ScoreBand::APlus => "A+",
        }
    }

    /// Parse a grade label, tolerating surrounding whitespace and lowercase.
    pub fn parse(label: &str) -> Option<Self> {
        let normalized = label.trim().to_uppercase();
        ScoreBand::ALL
            .into_iter()
            .find(|band| band.label() == normalized)
    }
}

impl fmt::Display for ScoreBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identity of a cached trend report. Both dates inclusive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrendKey {
    pub subject: SubjectId,
    #[serde(with = "calendar_day")]
    pub start: Date,
    #[serde(with = "calendar_day")]
    pub end: Date,
}

/// Opaque narrative report produced by the summarizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Narrative(pub serde_json::Value);

/// A write-once trend cache row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendCacheEntry {
    pub key: TrendKey,
    pub narrative: Narrative,
    /// Window sample count when the entry was written.
    pub sample_count: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Per-band tally, ordered worst to best.
pub type BandCounts = BTreeMap<ScoreBand, usize>;

/// Shallow-merge `patch` into `target`. A `null` value removes the key.
pub fn merge_attributes(
    target: &mut serde_json::Map<String, serde_json::Value>,
    patch: serde_json::Map<String, serde_json::Value>,
) {
    for (key, value) in patch {
        if value.is_null() {
            target.remove(&key);
        } else {
            target.insert(key, value);
        }
    }
}
