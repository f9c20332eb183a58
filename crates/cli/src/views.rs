//! Response shapes shared by the CLI's JSON output and the HTTP API.

use serde::Serialize;
use vitalog_pipeline::{AnalysisStateReader, AnalysisView};
use vitalog_storage::ObservationRecord;

/// A stored observation together with what a client should show for it.
#[derive(Debug, Serialize)]
pub(crate) struct ObservationView {
    #[serde(flatten)]
    pub(crate) record: ObservationRecord,
    pub(crate) analysis: AnalysisView,
}

impl ObservationView {
    pub(crate) fn new(record: ObservationRecord, reader: &AnalysisStateReader) -> Self {
        let analysis = reader.read(&record);
        Self { record, analysis }
    }
}

/// One-line summary of an analysis view for text output.
pub(crate) fn describe(view: &AnalysisView) -> String {
    match view {
        AnalysisView::Pending => "pending".to_string(),
        AnalysisView::Succeeded { result } => match result.score_band() {
            Some(band) => format!("succeeded ({band})"),
            None => "succeeded".to_string(),
        },
        AnalysisView::Rejected { rejection, reason } => {
            let kind = serde_json::to_value(rejection)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            match reason {
                Some(reason) => format!("rejected ({kind}: {reason})"),
                None => format!("rejected ({kind})"),
            }
        }
        AnalysisView::Failed { reason } => {
            let reason = serde_json::to_value(reason)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            format!("failed ({reason})")
        }
    }
}
