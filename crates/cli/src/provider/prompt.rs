//! Prompt text for the hosted model.

use vitalog_pipeline::{AnalysisContext, Language, SummaryContext, WindowStats};
use vitalog_storage::{AnalysisSlot, ObservationRecord};

const ANALYSIS_SCHEMA: &str = r##"{
  "validity": {
    "is_stool": true | false,
    "privacy_issue": true | false,
    "rejection_reason": "<why the image was rejected, or null>"
  },
  "health_score": "A+" | "A" | "A-" | "B+" | "B" | "B-" | "C+" | "C" | "C-" | "D",
  "bristol": { "scale": 1-7, "description": "<short description>" },
  "color": { "name": "<color>", "hex": "#rrggbb", "meaning": "<what the color suggests>" },
  "texture": "<texture notes>",
  "short_summary": "<one or two sentences>",
  "recommendations": ["<actionable advice>"]
}"##;

const NARRATIVE_SCHEMA: &str = r#"{
  "grade": "A+" | "A" | "A-" | "B+" | "B" | "B-" | "C+" | "C" | "C-" | "D",
  "summary": "<overall assessment of the period>",
  "correlations": ["<links between attributes (diet, symptoms, triggers) and results>"],
  "alerts": ["<anything that warrants attention>"],
  "trends": ["<how things changed over the period>"]
}"#;

fn language_rule(language: Language) -> &'static str {
    match language {
        Language::En => "Write every free-text field in English.",
        Language::Zh => "所有自由文本字段请使用简体中文。",
    }
}

pub(crate) fn analysis_system() -> String {
    format!(
        "You are a careful digestive-health assistant reviewing a single stool photo.\n\
         First decide whether the image actually shows stool (`is_stool`) and whether it \
         exposes a face, body part, or other private information (`privacy_issue`). If either \
         check fails, fill `rejection_reason` and you may omit every other field.\n\
         Otherwise grade the sample on the ten-step scale below.\n\n\
         Return ONLY a JSON object. No markdown, no code fences. Shape:\n{ANALYSIS_SCHEMA}"
    )
}

pub(crate) fn analysis_user(context: &AnalysisContext) -> String {
    let mut prompt = String::from("Analyze the attached image.\n");
    if let Some(profile) = &context.profile {
        prompt.push_str(&format!(
            "Subject profile: {}\n",
            serde_json::to_string(profile).unwrap_or_default()
        ));
    }
    prompt.push_str(language_rule(context.language));
    prompt
}

pub(crate) fn summary_system() -> String {
    format!(
        "You are a digestive-health assistant summarizing a period of logged observations.\n\
         Base every statement on the statistics and entries provided; do not invent data.\n\n\
         Return ONLY a JSON object. No markdown, no code fences. Shape:\n{NARRATIVE_SCHEMA}"
    )
}

pub(crate) fn summary_user(
    stats: &WindowStats,
    observations: &[ObservationRecord],
    context: &SummaryContext,
) -> String {
    let mut prompt = format!("## Period\n\n{}\n\n", context.period_label);
    prompt.push_str(&format!(
        "## Statistics\n\n{}\n\n",
        serde_json::to_string_pretty(stats).unwrap_or_default()
    ));
    prompt.push_str("## Entries (oldest first)\n\n");
    for record in observations {
        let result = match &record.slot {
            AnalysisSlot::Succeeded { result } => match result.score_band() {
                Some(band) => format!("grade {band}"),
                None => "rejected".to_string(),
            },
            other => other.kind().to_string(),
        };
        prompt.push_str(&format!(
            "- {} | {} | attributes: {}\n",
            record.observed_at,
            result,
            serde_json::Value::Object(record.attributes.clone())
        ));
    }
    prompt.push('\n');
    prompt.push_str(language_rule(context.language));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_prompt_carries_profile_and_language() {
        let prompt = analysis_user(&AnalysisContext {
            language: Language::Zh,
            profile: Some(serde_json::json!({"age": 4})),
        });
        assert!(prompt.contains(r#"{"age":4}"#));
        assert!(prompt.contains("简体中文"));
    }

    #[test]
    fn system_prompts_embed_their_schema() {
        assert!(analysis_system().contains("\"health_score\""));
        assert!(summary_system().contains("\"correlations\""));
    }

    #[test]
    fn analysis_schema_is_complete_json_shape() {
        let system = analysis_system();
        assert!(system.contains("\"hex\": \"#rrggbb\""));
        assert!(system.contains("\"recommendations\""));
        assert!(ANALYSIS_SCHEMA.trim_end().ends_with('}'));
    }
}
