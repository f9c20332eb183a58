//! Deterministic offline provider.

use async_trait::async_trait;
use vitalog_pipeline::{
    AnalysisContext, InterpretError, Interpreter, Language, SummarizeError, Summarizer,
    SummaryContext, WindowStats,
};
use vitalog_storage::{Narrative, ObservationRecord, ScoreBand};

pub(crate) struct MockProvider;

const MOCK_ANALYSIS: &str = r##"{
  "validity": { "is_stool": true, "privacy_issue": false, "rejection_reason": null },
  "health_score": "B+",
  "bristol": { "scale": 4, "description": "Smooth and soft" },
  "color": { "name": "Brown", "hex": "#8B4513", "meaning": "Normal bile pigment" },
  "texture": "Well formed",
  "short_summary": "Mock analysis: looks normal.",
  "recommendations": ["Stay hydrated", "Keep a fibre-rich diet"]
}"##;

#[async_trait]
impl Interpreter for MockProvider {
    async fn interpret(
        &self,
        image_ref: &str,
        _context: &AnalysisContext,
    ) -> Result<String, InterpretError> {
        tracing::debug!(image_ref, "mock interpreter answering");
        Ok(MOCK_ANALYSIS.to_string())
    }
}

#[async_trait]
impl Summarizer for MockProvider {
    async fn summarize(
        &self,
        stats: &WindowStats,
        observations: &[ObservationRecord],
        context: &SummaryContext,
    ) -> Result<Narrative, SummarizeError> {
        let grade = stats
            .mean_score
            .map(|mean| {
                let idx = (mean.round() as usize).clamp(1, ScoreBand::ALL.len()) - 1;
                ScoreBand::ALL[idx].label()
            })
            .unwrap_or("N/A");
        let summary = match context.language {
            Language::En => format!(
                "{} observations between {}; {} analyzed.",
                observations.len(),
                context.period_label,
                stats.analyzed
            ),
            Language::Zh => format!(
                "{} 期间共 {} 条记录，其中 {} 条已分析。",
                context.period_label,
                observations.len(),
                stats.analyzed
            ),
        };
        Ok(Narrative(serde_json::json!({
            "grade": grade,
            "summary": summary,
            "correlations": [],
            "alerts": [],
            "trends": [],
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitalog_pipeline::parse_payload;

    #[tokio::test]
    async fn mock_analysis_parses_as_valid() {
        let raw = MockProvider
            .interpret("photo.jpg", &AnalysisContext::default())
            .await
            .unwrap();
        let result = parse_payload(&raw).unwrap();
        assert_eq!(result.score_band(), Some(ScoreBand::BPlus));
        assert_eq!(result.extra["color"]["hex"], "#8B4513");
        assert_eq!(result.extra["recommendations"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn mock_narrative_grades_from_mean() {
        let mut stats = WindowStats::compute(&[]);
        stats.mean_score = Some(8.6);
        stats.analyzed = 3;
        let narrative = MockProvider
            .summarize(
                &stats,
                &[],
                &SummaryContext {
                    language: Language::En,
                    period_label: "2024-01-01 to 2024-01-07".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(narrative.0["grade"], "A");
    }
}
