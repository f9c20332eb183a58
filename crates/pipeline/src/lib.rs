//! Analysis and trend orchestration around an [`ObservationStore`].
//!
//! - [`AnalysisCoordinator`] runs at most one interpreter call per observation.
//! - [`AnalysisStateReader`] turns a stored slot into what a polling client sees.
//! - [`TrendAggregator`] builds window reports, caching closed windows in a
//!   [`TrendCache`].

mod clock;
mod config;
mod coordinator;
mod error;
mod payload;
mod provider;
mod reader;
pub mod trend;

use std::sync::Arc;

use vitalog_storage::{ObservationStore, TrendCacheStore};

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PipelineConfig;
pub use coordinator::{AnalysisCoordinator, AnalysisHandle, Dismissal, TriggerOutcome};
pub use error::PipelineError;
pub use payload::{parse_payload, strip_code_fences, truncate, PayloadError};
pub use provider::{
    AnalysisContext, InterpretError, Interpreter, Language, SummarizeError, Summarizer,
    SummaryContext,
};
pub use reader::{read_state, AnalysisStateReader, AnalysisView, RejectionKind, ViewFailure};
pub use trend::{TrendAggregator, TrendCache, TrendEntry, TrendReport, TrendStatus, WindowStats};

/// Everything a front end needs, wired to one store.
#[derive(Clone)]
pub struct Pipeline {
    pub store: Arc<dyn ObservationStore>,
    pub coordinator: AnalysisCoordinator,
    pub reader: AnalysisStateReader,
    pub trends: TrendAggregator,
}

impl Pipeline {
    pub fn new<S>(
        store: S,
        interpreter: Arc<dyn Interpreter>,
        summarizer: Arc<dyn Summarizer>,
        clock: Arc<dyn Clock>,
        config: &PipelineConfig,
    ) -> Self
    where
        S: ObservationStore + TrendCacheStore,
    {
        let shared = Arc::new(store);
        let observations: Arc<dyn ObservationStore> = shared.clone();
        let cache_store: Arc<dyn TrendCacheStore> = shared;

        let cache = TrendCache::new(cache_store, clock.clone(), config.minimum_sample);
        Self {
            coordinator: AnalysisCoordinator::new(
                observations.clone(),
                interpreter,
                clock.clone(),
                config.stale_in_flight(),
            ),
            reader: AnalysisStateReader::new(clock.clone(), config.client_timeout()),
            trends: TrendAggregator::new(
                observations.clone(),
                cache,
                summarizer,
                clock,
                config.minimum_sample,
            ),
            store: observations,
        }
    }
}
