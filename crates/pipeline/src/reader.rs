//! Client-facing view of an observation's analysis.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use vitalog_storage::{AnalysisResult, AnalysisSlot, FailureReason, ObservationRecord, Verdict};

use crate::clock::Clock;

/// What a polling client should show for an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AnalysisView {
    Pending,
    Succeeded { result: AnalysisResult },
    Rejected {
        rejection: RejectionKind,
        reason: Option<String>,
    },
    Failed { reason: ViewFailure },
}

impl AnalysisView {
    pub fn label(&self) -> &'static str {
        match self {
            AnalysisView::Pending => "pending",
            AnalysisView::Succeeded { .. } => "succeeded",
            AnalysisView::Rejected { .. } => "rejected",
            AnalysisView::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    SubjectMismatch,
    Privacy,
}

/// Stored failure reasons plus the reader-side timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewFailure {
    Timeout,
    ExternalError,
    EmptyResponse,
    Unparseable,
}

impl From<FailureReason> for ViewFailure {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::ExternalError => ViewFailure::ExternalError,
            FailureReason::EmptyResponse => ViewFailure::EmptyResponse,
            FailureReason::Unparseable => ViewFailure::Unparseable,
        }
    }
}

/// Classify a stored observation as of `now`.
///
/// Non-terminal slots stay `Pending` while `now - since <= timeout`, where
/// `since` is the attempt's start for `InFlight` and the submission time for
/// `Empty`. Past that they read as `Failed(Timeout)`, whatever the
/// coordinator may still be doing.
pub fn read_state(record: &ObservationRecord, now: OffsetDateTime, timeout: Duration) -> AnalysisView {
    let pending_since = match &record.slot {
        AnalysisSlot::Empty => record.submitted_at,
        AnalysisSlot::InFlight { started_at } => *started_at,
        AnalysisSlot::Succeeded { result } => return view_result(result),
        AnalysisSlot::Failed { reason, .. } => {
            return AnalysisView::Failed {
                reason: (*reason).into(),
            }
        }
    };
    if now - pending_since <= timeout {
        AnalysisView::Pending
    } else {
        AnalysisView::Failed {
            reason: ViewFailure::Timeout,
        }
    }
}

fn view_result(result: &AnalysisResult) -> AnalysisView {
    match &result.verdict {
        Verdict::Valid { .. } => AnalysisView::Succeeded {
            result: result.clone(),
        },
        Verdict::RejectedSubjectMismatch { reason } => AnalysisView::Rejected {
            rejection: RejectionKind::SubjectMismatch,
            reason: reason.clone(),
        },
        Verdict::RejectedPrivacy { reason } => AnalysisView::Rejected {
            rejection: RejectionKind::Privacy,
            reason: reason.clone(),
        },
    }
}

/// [`read_state`] bound to a clock and a configured timeout.
#[derive(Clone)]
pub struct AnalysisStateReader {
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl AnalysisStateReader {
    pub fn new(clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self { clock, timeout }
    }

    pub fn read(&self, record: &ObservationRecord) -> AnalysisView {
        read_state(record, self.clock.now(), self.timeout)
    }
}
