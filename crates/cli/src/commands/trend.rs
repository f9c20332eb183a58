use std::sync::Arc;

use time::Date;
use vitalog_pipeline::{Language, SummaryContext, SystemClock, TrendReport, TrendStatus};
use vitalog_storage::SubjectId;

use super::{emit, open_pipeline, run};
use crate::config::AppConfig;
use crate::OutputFormat;

pub(crate) fn cmd_trend(
    config: &AppConfig,
    subject: &str,
    start: Date,
    end: Date,
    language: Language,
    output: OutputFormat,
    quiet: bool,
) {
    run(output, quiet, async {
        let pipeline = open_pipeline(config, Arc::new(SystemClock))?;
        let context = SummaryContext {
            language,
            period_label: String::new(),
        };
        let report = pipeline
            .trends
            .report(&SubjectId::new(subject), start, end, &context)
            .await
            .map_err(|e| e.to_string())?;
        emit(output, quiet, &report, || render(subject, start, end, &report));
        Ok(())
    });
}

fn render(subject: &str, start: Date, end: Date, report: &TrendReport) -> String {
    let stats = &report.stats;
    let mut out = format!("Trend for '{subject}' {start} .. {end}\n");
    out.push_str(&format!(
        "  observations: {} (analyzed {}, rejected {}, pending {}, failed {})\n",
        stats.count, stats.analyzed, stats.rejected, stats.pending, stats.failed
    ));
    if let Some(mean) = stats.mean_score {
        out.push_str(&format!("  mean score: {mean:.1} / 10\n"));
    }
    let status = match report.status {
        TrendStatus::ActivePeriod => "active period (no narrative until the window closes)",
        TrendStatus::InsufficientData => "insufficient data",
        TrendStatus::GenerationFailed => "narrative generation failed; try again later",
        TrendStatus::Cached => "cached",
        TrendStatus::Fresh => "fresh",
    };
    out.push_str(&format!("  status: {status}"));
    if let Some(narrative) = &report.narrative {
        if let Some(grade) = narrative.0.get("grade").and_then(|g| g.as_str()) {
            out.push_str(&format!("\n  grade: {grade}"));
        }
        if let Some(summary) = narrative.0.get("summary").and_then(|s| s.as_str()) {
            out.push_str(&format!("\n  {summary}"));
        }
    }
    out
}
