use std::sync::Arc;

use time::OffsetDateTime;
use vitalog_pipeline::{
    AnalysisContext, Clock, Dismissal, Language, SystemClock, TriggerOutcome,
};
use vitalog_storage::{AnalysisSlot, NewObservation, ObservationId, SubjectId};

use super::{emit, open_pipeline, run};
use crate::config::AppConfig;
use crate::views::{describe, ObservationView};
use crate::OutputFormat;

pub(crate) struct SubmitArgs {
    pub(crate) subject: String,
    pub(crate) image: String,
    pub(crate) attributes: Vec<(String, serde_json::Value)>,
    pub(crate) observed_at: Option<OffsetDateTime>,
}

pub(crate) fn cmd_submit(config: &AppConfig, args: SubmitArgs, output: OutputFormat, quiet: bool) {
    run(output, quiet, async {
        if args.subject.trim().is_empty() {
            return Err("subject must not be empty".to_string());
        }
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let pipeline = open_pipeline(config, clock.clone())?;
        let now = clock.now();
        let record = pipeline
            .store
            .create(NewObservation {
                subject: SubjectId::new(args.subject),
                image_ref: args.image,
                attributes: args.attributes.into_iter().collect(),
                observed_at: args.observed_at.unwrap_or(now),
                submitted_at: now,
            })
            .await
            .map_err(|e| e.to_string())?;
        let id = record.id;
        emit(
            output,
            quiet,
            &ObservationView::new(record, &pipeline.reader),
            || format!("Created observation {id}"),
        );
        Ok(())
    });
}

pub(crate) fn cmd_list(config: &AppConfig, subject: &str, output: OutputFormat, quiet: bool) {
    run(output, quiet, async {
        let pipeline = open_pipeline(config, Arc::new(SystemClock))?;
        let records = pipeline
            .store
            .list_by_subject(&SubjectId::new(subject))
            .await
            .map_err(|e| e.to_string())?;
        let views: Vec<ObservationView> = records
            .into_iter()
            .map(|r| ObservationView::new(r, &pipeline.reader))
            .collect();
        emit(output, quiet, &views, || {
            if views.is_empty() {
                return format!("No observations for '{subject}'");
            }
            views
                .iter()
                .map(|v| {
                    format!(
                        "#{:<5} {}  {}",
                        v.record.id,
                        v.record.observed_at,
                        describe(&v.analysis)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        });
        Ok(())
    });
}

/// Run one analysis attempt in the foreground.
pub(crate) fn cmd_analyze(
    config: &AppConfig,
    id: ObservationId,
    language: Language,
    output: OutputFormat,
    quiet: bool,
) {
    run(output, quiet, async {
        let pipeline = open_pipeline(config, Arc::new(SystemClock))?;
        let context = AnalysisContext {
            language,
            profile: None,
        };
        let outcome = pipeline
            .coordinator
            .spawn(id, context)
            .join()
            .await
            .map_err(|e| e.to_string())?;

        let (label, failed) = match &outcome {
            TriggerOutcome::Completed(AnalysisSlot::Failed { .. }) => ("completed", true),
            TriggerOutcome::Completed(_) => ("completed", false),
            TriggerOutcome::AlreadyInFlight => ("already_in_flight", false),
            TriggerOutcome::AlreadyComplete => ("already_complete", false),
            TriggerOutcome::Discarded => ("discarded", false),
        };
        if matches!(outcome, TriggerOutcome::Discarded) {
            return Err(format!("observation {id} was deleted during analysis"));
        }

        let record = pipeline.store.get(id).await.map_err(|e| e.to_string())?;
        let view = ObservationView::new(record, &pipeline.reader);
        emit(
            output,
            quiet,
            &serde_json::json!({ "outcome": label, "observation": &view }),
            || match outcome {
                TriggerOutcome::AlreadyInFlight => {
                    format!("Observation {id}: analysis already in flight")
                }
                _ => format!("Observation {id}: {}", describe(&view.analysis)),
            },
        );
        if failed {
            return Err(format!("analysis of observation {id} failed; retry with `vitalog analyze {id}`"));
        }
        Ok(())
    });
}

pub(crate) fn cmd_status(config: &AppConfig, id: ObservationId, output: OutputFormat, quiet: bool) {
    run(output, quiet, async {
        let pipeline = open_pipeline(config, Arc::new(SystemClock))?;
        let record = pipeline.store.get(id).await.map_err(|e| e.to_string())?;
        let view = pipeline.reader.read(&record);
        emit(output, quiet, &view, || {
            format!("Observation {id}: {}", describe(&view))
        });
        Ok(())
    });
}

pub(crate) fn cmd_dismiss(config: &AppConfig, id: ObservationId, output: OutputFormat, quiet: bool) {
    run(output, quiet, async {
        let pipeline = open_pipeline(config, Arc::new(SystemClock))?;
        match pipeline
            .coordinator
            .dismiss_rejection(id)
            .await
            .map_err(|e| e.to_string())?
        {
            Dismissal::Deleted => {
                emit(
                    output,
                    quiet,
                    &serde_json::json!({ "deleted": id }),
                    || format!("Deleted rejected observation {id}"),
                );
                Ok(())
            }
            Dismissal::NotRejected => Err(format!(
                "observation {id} is not rejected; use `vitalog delete {id}` to remove it"
            )),
        }
    });
}

pub(crate) fn cmd_delete(config: &AppConfig, id: ObservationId, output: OutputFormat, quiet: bool) {
    run(output, quiet, async {
        let pipeline = open_pipeline(config, Arc::new(SystemClock))?;
        pipeline.store.delete(id).await.map_err(|e| e.to_string())?;
        emit(
            output,
            quiet,
            &serde_json::json!({ "deleted": id }),
            || format!("Deleted observation {id}"),
        );
        Ok(())
    });
}
