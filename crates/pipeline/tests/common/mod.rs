#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Notify;
use vitalog_pipeline::{
    AnalysisContext, InterpretError, Interpreter, ManualClock, Pipeline, PipelineConfig,
    SummarizeError, Summarizer, SummaryContext, WindowStats,
};
use vitalog_storage::{
    MemoryStore, Narrative, NewObservation, ObservationRecord, ObservationStore, SubjectId,
};

pub const VALID_B_PLUS: &str = r#"{"validity": {"is_stool": true, "privacy_issue": false}, "health_score": "B+", "short_summary": "ok"}"#;
pub const REJECTED_PRIVACY: &str = r#"{"validity": {"is_stool": true, "privacy_issue": true, "rejection_reason": "face in frame"}}"#;

/// One scripted interpreter reply.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(&'static str),
    ReplyAfter(Duration, &'static str),
    Fail,
    Hang,
    /// Wait for the gate to be notified, then reply.
    Gated(Arc<Notify>, &'static str),
}

/// Replays `Step`s in order, then repeats `fallback`. Counts calls.
pub struct ScriptedInterpreter {
    calls: AtomicUsize,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
}

impl ScriptedInterpreter {
    pub fn new(script: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            script: Mutex::new(script.into()),
            fallback,
        })
    }

    pub fn always(step: Step) -> Arc<Self> {
        Self::new(Vec::new(), step)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Interpreter for ScriptedInterpreter {
    async fn interpret(
        &self,
        _image_ref: &str,
        _context: &AnalysisContext,
    ) -> Result<String, InterpretError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Reply(raw) => Ok(raw.to_string()),
            Step::ReplyAfter(delay, raw) => {
                tokio::time::sleep(delay).await;
                Ok(raw.to_string())
            }
            Step::Fail => Err(InterpretError::Unavailable("scripted outage".to_string())),
            Step::Hang => std::future::pending().await,
            Step::Gated(gate, raw) => {
                gate.notified().await;
                Ok(raw.to_string())
            }
        }
    }
}

/// Summarizer that either echoes the sample size or fails.
pub struct CountingSummarizer {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingSummarizer {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for CountingSummarizer {
    async fn summarize(
        &self,
        stats: &WindowStats,
        observations: &[ObservationRecord],
        context: &SummaryContext,
    ) -> Result<Narrative, SummarizeError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(SummarizeError::Unavailable("scripted outage".to_string()));
        }
        Ok(Narrative(serde_json::json!({
            "grade": "B",
            "summary": format!("{} observations ({})", observations.len(), context.period_label),
            "count": stats.count,
            "generation": n,
        })))
    }
}

pub fn pipeline_with(
    store: MemoryStore,
    interpreter: Arc<ScriptedInterpreter>,
    summarizer: Arc<CountingSummarizer>,
    clock: &ManualClock,
) -> Pipeline {
    Pipeline::new(
        store,
        interpreter,
        summarizer,
        Arc::new(clock.clone()),
        &PipelineConfig::default(),
    )
}

pub async fn submit(pipeline: &Pipeline, subject: &str, at: OffsetDateTime) -> ObservationRecord {
    pipeline
        .store
        .create(NewObservation {
            subject: SubjectId::new(subject),
            image_ref: format!("uploads/{subject}-{}.jpg", at.unix_timestamp()),
            attributes: serde_json::Map::new(),
            observed_at: at,
            submitted_at: at,
        })
        .await
        .unwrap()
}
