//! Analysis task coordination.
//!
//! Every slot transition is a compare-and-swap against the state the
//! coordinator last observed. That CAS is the only thing enforcing "at most
//! one attempt in flight per observation"; no lock is held while the
//! interpreter runs.

use std::sync::Arc;
use std::time::Instant;

use time::Duration;
use tokio::task::JoinHandle;
use vitalog_storage::{AnalysisSlot, FailureReason, ObservationId, ObservationStore, StorageError};

use crate::clock::Clock;
use crate::error::PipelineError;
use crate::payload::parse_payload;
use crate::provider::{AnalysisContext, Interpreter};

/// Re-read/CAS rounds allowed when the terminal write loses a race.
const TERMINAL_WRITE_ATTEMPTS: usize = 3;

/// What a call to [`AnalysisCoordinator::trigger`] ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// This call ran an attempt and stored the given terminal slot.
    Completed(AnalysisSlot),
    /// Another attempt holds the slot; nothing was started.
    AlreadyInFlight,
    /// The slot already holds a result (valid or rejected); nothing was started.
    AlreadyComplete,
    /// The observation was deleted while the attempt ran; the result was dropped.
    Discarded,
}

/// Outcome of [`AnalysisCoordinator::dismiss_rejection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dismissal {
    Deleted,
    NotRejected,
}

/// Caller-owned handle to a spawned analysis attempt.
#[derive(Debug)]
pub struct AnalysisHandle {
    id: ObservationId,
    task: JoinHandle<Result<TriggerOutcome, PipelineError>>,
}

impl AnalysisHandle {
    pub fn id(&self) -> ObservationId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop waiting on the attempt. A slot already moved to `InFlight` stays
    /// there until it goes stale.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub async fn join(self) -> Result<TriggerOutcome, PipelineError> {
        self.task
            .await
            .map_err(|e| PipelineError::Join(e.to_string()))?
    }
}

#[derive(Clone)]
pub struct AnalysisCoordinator {
    store: Arc<dyn ObservationStore>,
    interpreter: Arc<dyn Interpreter>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
}

impl AnalysisCoordinator {
    pub fn new(
        store: Arc<dyn ObservationStore>,
        interpreter: Arc<dyn Interpreter>,
        clock: Arc<dyn Clock>,
        stale_after: Duration,
    ) -> Self {
        Self {
            store,
            interpreter,
            clock,
            stale_after,
        }
    }

    /// Run one analysis attempt for `id` unless another is in flight or a
    /// result already exists.
    ///
    /// Interpreter failures are stored as `Failed` slots and reported through
    /// `Ok(TriggerOutcome::Completed(..))`; only storage faults are errors.
    pub async fn trigger(
        &self,
        id: ObservationId,
        context: &AnalysisContext,
    ) -> Result<TriggerOutcome, PipelineError> {
        let record = self.store.get(id).await?;
        let now = self.clock.now();

        match &record.slot {
            AnalysisSlot::Succeeded { .. } => return Ok(TriggerOutcome::AlreadyComplete),
            AnalysisSlot::InFlight { started_at } if now - *started_at <= self.stale_after => {
                tracing::debug!(observation_id = %id, "analysis already in flight");
                return Ok(TriggerOutcome::AlreadyInFlight);
            }
            AnalysisSlot::InFlight { started_at } => {
                tracing::warn!(
                    observation_id = %id,
                    started_at = %started_at,
                    "in-flight analysis is stale; treating it as failed and retrying"
                );
            }
            AnalysisSlot::Empty | AnalysisSlot::Failed { .. } => {}
        }

        let in_flight = AnalysisSlot::InFlight { started_at: now };
        match self
            .store
            .update_slot(id, &record.slot, in_flight.clone())
            .await
        {
            Ok(_) => {}
            Err(StorageError::Conflict { .. }) => {
                tracing::debug!(observation_id = %id, "lost the race to start analysis");
                return Ok(TriggerOutcome::AlreadyInFlight);
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(observation_id = %id, previous = record.slot.kind(), "analysis attempt started");
        let started = Instant::now();
        let terminal = self.attempt(id, &record.image_ref, context).await;
        let outcome = outcome_label(&terminal);

        let stored = self.commit(id, in_flight, terminal).await?;
        tracing::info!(
            observation_id = %id,
            outcome,
            duration_ms = started.elapsed().as_millis() as u64,
            "analysis attempt completed"
        );
        Ok(match stored {
            Some(slot) => TriggerOutcome::Completed(slot),
            None => TriggerOutcome::Discarded,
        })
    }

    /// Run [`trigger`](Self::trigger) on its own task.
    ///
    /// Errors are logged on the task itself, so a caller that drops the
    /// handle still leaves a trace of a failed attempt.
    pub fn spawn(&self, id: ObservationId, context: AnalysisContext) -> AnalysisHandle {
        let coordinator = self.clone();
        let task = tokio::spawn(async move {
            let outcome = coordinator.trigger(id, &context).await;
            if let Err(e) = &outcome {
                tracing::error!(observation_id = %id, error = %e, "background analysis failed");
            }
            outcome
        });
        AnalysisHandle { id, task }
    }

    /// Delete an observation whose stored result is a rejection, once the
    /// client has acknowledged it.
    pub async fn dismiss_rejection(&self, id: ObservationId) -> Result<Dismissal, PipelineError> {
        let record = self.store.get(id).await?;
        match &record.slot {
            AnalysisSlot::Succeeded { result } if result.is_rejection() => {
                self.store.delete(id).await?;
                tracing::info!(observation_id = %id, "rejected observation dismissed and deleted");
                Ok(Dismissal::Deleted)
            }
            _ => Ok(Dismissal::NotRejected),
        }
    }

    async fn attempt(
        &self,
        id: ObservationId,
        image_ref: &str,
        context: &AnalysisContext,
    ) -> AnalysisSlot {
        match self.interpreter.interpret(image_ref, context).await {
            Ok(raw) => match parse_payload(&raw) {
                Ok(result) => AnalysisSlot::Succeeded { result },
                Err(e) => {
                    tracing::warn!(observation_id = %id, error = %e, "malformed interpreter payload");
                    AnalysisSlot::Failed {
                        reason: e.reason(),
                        at: self.clock.now(),
                    }
                }
            },
            Err(e) => {
                tracing::warn!(observation_id = %id, error = %e, "interpreter call failed");
                AnalysisSlot::Failed {
                    reason: FailureReason::ExternalError,
                    at: self.clock.now(),
                }
            }
        }
    }

    /// CAS `InFlight -> terminal`. A conflict here means another writer took
    /// the slot over (stale override); the newer terminal state wins over
    /// whatever is there now. Returns `None` if the observation is gone.
    async fn commit(
        &self,
        id: ObservationId,
        in_flight: AnalysisSlot,
        terminal: AnalysisSlot,
    ) -> Result<Option<AnalysisSlot>, PipelineError> {
        let mut expected = in_flight;
        for attempt in 1..=TERMINAL_WRITE_ATTEMPTS {
            match self.store.update_slot(id, &expected, terminal.clone()).await {
                Ok(record) => return Ok(Some(record.slot)),
                Err(StorageError::NotFound { .. }) => {
                    tracing::info!(observation_id = %id, "observation deleted during analysis; result discarded");
                    return Ok(None);
                }
                Err(StorageError::Conflict { .. }) => {
                    let current = match self.store.get(id).await {
                        Ok(record) => record.slot,
                        Err(StorageError::NotFound { .. }) => return Ok(None),
                        Err(e) => return Err(e.into()),
                    };
                    tracing::error!(
                        observation_id = %id,
                        found = current.kind(),
                        attempt,
                        "terminal slot write conflicted; overwriting"
                    );
                    expected = current;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StorageError::Conflict { id }.into())
    }
}

fn outcome_label(slot: &AnalysisSlot) -> &'static str {
    match slot {
        AnalysisSlot::Succeeded { result } if result.is_rejection() => "rejected",
        AnalysisSlot::Succeeded { .. } => "succeeded",
        AnalysisSlot::Failed {
            reason: FailureReason::ExternalError,
            ..
        } => "external_error",
        AnalysisSlot::Failed {
            reason: FailureReason::EmptyResponse,
            ..
        } => "empty_response",
        AnalysisSlot::Failed {
            reason: FailureReason::Unparseable,
            ..
        } => "unparseable",
        other => other.kind(),
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use time::macros::datetime;
    use time::OffsetDateTime;
    use vitalog_storage::{MemoryStore, NewObservation, ObservationRecord, SubjectId};

    use super::*;
    use crate::clock::ManualClock;
    use crate::provider::InterpretError;

    const VALID: &str = r#"{"validity": {"is_stool": true, "privacy_issue": false}, "health_score": "B"}"#;

    struct FixedInterpreter;

    #[async_trait]
    impl Interpreter for FixedInterpreter {
        async fn interpret(
            &self,
            _image_ref: &str,
            _context: &AnalysisContext,
        ) -> Result<String, InterpretError> {
            Ok(VALID.to_string())
        }
    }

    /// Memory store whose terminal slot writes always fail with `fault`.
    struct TerminalFaultStore {
        inner: MemoryStore,
        fault: fn(ObservationId) -> StorageError,
        terminal_writes: AtomicUsize,
    }

    #[async_trait]
    impl ObservationStore for TerminalFaultStore {
        async fn create(&self, observation: NewObservation) -> Result<ObservationRecord, StorageError> {
            self.inner.create(observation).await
        }

        async fn get(&self, id: ObservationId) -> Result<ObservationRecord, StorageError> {
            self.inner.get(id).await
        }

        async fn list_by_subject(
            &self,
            subject: &SubjectId,
        ) -> Result<Vec<ObservationRecord>, StorageError> {
            self.inner.list_by_subject(subject).await
        }

        async fn list_in_window(
            &self,
            subject: &SubjectId,
            from: OffsetDateTime,
            until: OffsetDateTime,
        ) -> Result<Vec<ObservationRecord>, StorageError> {
            self.inner.list_in_window(subject, from, until).await
        }

        async fn update_slot(
            &self,
            id: ObservationId,
            expected: &AnalysisSlot,
            new: AnalysisSlot,
        ) -> Result<ObservationRecord, StorageError> {
            if new.is_terminal() {
                self.terminal_writes.fetch_add(1, Ordering::SeqCst);
                return Err((self.fault)(id));
            }
            self.inner.update_slot(id, expected, new).await
        }

        async fn update_attributes(
            &self,
            id: ObservationId,
            patch: serde_json::Map<String, serde_json::Value>,
        ) -> Result<ObservationRecord, StorageError> {
            self.inner.update_attributes(id, patch).await
        }

        async fn delete(&self, id: ObservationId) -> Result<(), StorageError> {
            self.inner.delete(id).await
        }
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    async fn setup(
        fault: fn(ObservationId) -> StorageError,
    ) -> (AnalysisCoordinator, Arc<TerminalFaultStore>, ObservationId) {
        let at = datetime!(2024-06-01 08:00 UTC);
        let store = Arc::new(TerminalFaultStore {
            inner: MemoryStore::new(),
            fault,
            terminal_writes: AtomicUsize::new(0),
        });
        let rec = store
            .create(NewObservation {
                subject: SubjectId::new("kid"),
                image_ref: "uploads/kid.jpg".to_string(),
                attributes: serde_json::Map::new(),
                observed_at: at,
                submitted_at: at,
            })
            .await
            .unwrap();
        let coordinator = AnalysisCoordinator::new(
            store.clone(),
            Arc::new(FixedInterpreter),
            Arc::new(ManualClock::new(at)),
            Duration::seconds(120),
        );
        (coordinator, store, rec.id)
    }

    #[tokio::test]
    async fn terminal_write_gives_up_after_repeated_conflicts() {
        let (coordinator, store, id) = setup(|id| StorageError::Conflict { id }).await;

        let err = coordinator
            .trigger(id, &AnalysisContext::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Storage(StorageError::Conflict { id: got }) if got == id
        ));
        assert_eq!(
            store.terminal_writes.load(Ordering::SeqCst),
            TERMINAL_WRITE_ATTEMPTS
        );
        // The slot is left in flight for a later stale takeover.
        assert!(matches!(
            store.get(id).await.unwrap().slot,
            AnalysisSlot::InFlight { .. }
        ));
    }

    #[tokio::test]
    async fn spawned_storage_failure_is_logged_and_returned() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (coordinator, _store, id) =
            setup(|_| StorageError::Backend("disk full".to_string())).await;
        let handle = coordinator.spawn(id, AnalysisContext::default());
        let err = handle.join().await.unwrap_err();

        assert!(matches!(err, PipelineError::Storage(StorageError::Backend(_))));
        let output = logs.contents();
        assert!(output.contains("background analysis failed"), "{output}");
        assert!(output.contains("disk full"), "{output}");
    }
}
