// src/pipeline/mod.rs
//! Trend-to-post job pipeline.
//!
//! Fixed topology, one branch:
//!
//! ```text
//! fetch_keywords -> search_sources (news || video) -> evaluate_novelty -> decide
//!     decide == GeneratePost -> generate_post -> cache_post
//!     decide == NoPostNeeded ------------------> cache_post
//! ```

pub mod context;
pub mod model;
pub mod novelty;
pub mod orchestrator;
pub mod steps;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::ai::DynSummarizer;
use crate::config::PipelineConfig;
use crate::external::{ExternalCallOutcome, RetryPolicy};
use crate::metrics::PipelineCounters;
use crate::sources::{SearchSource, TrendSource};

pub use context::{keys, ContextKey, ExecutionContext, MissingContextKey};
pub use novelty::{NoveltyPolicy, Route};
pub use orchestrator::{JobOrchestrator, JobRun, OrchestratorError, RunKey, RunStatus, Stage};
pub use store::{KeywordStore, PostCache, PostStore};

/// Failure of one step. Keyword-level failures never surface here; they are
/// counted and recorded in the context instead.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    External(#[from] ExternalCallOutcome),
    #[error("trend source returned no usable keywords")]
    EmptyTrendResult,
    #[error(transparent)]
    MissingContext(#[from] MissingContextKey),
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl StepError {
    /// Last classified outcome behind this failure, if it came from a vendor call.
    pub fn last_outcome(&self) -> Option<&ExternalCallOutcome> {
        match self {
            StepError::External(o) => Some(o),
            _ => None,
        }
    }
}

/// Identity of the run a step is executing for.
#[derive(Debug, Clone)]
pub struct RunScope {
    pub run_key: RunKey,
    pub bucket: DateTime<Utc>,
}

/// External collaborators of one pipeline instance.
#[derive(Clone)]
pub struct PipelineDeps {
    pub trend: Arc<dyn TrendSource>,
    pub news: Arc<dyn SearchSource>,
    pub video: Arc<dyn SearchSource>,
    pub summarizer: DynSummarizer,
    pub keywords: Arc<dyn KeywordStore>,
    pub posts: Arc<dyn PostStore>,
    pub cache: Arc<dyn PostCache>,
    pub counters: Arc<PipelineCounters>,
}

/// Tunables resolved from [`PipelineConfig`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub identity: String,
    pub run_retention: usize,
    pub retry: RetryPolicy,
    pub max_sources_per_platform: usize,
    pub novelty: NoveltyPolicy,
    pub generate_concurrency: usize,
    pub max_source_chars: usize,
    pub generate_call_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            identity: cfg.pipeline.identity.clone(),
            run_retention: cfg.pipeline.run_retention,
            retry: cfg.retry.policy(),
            max_sources_per_platform: cfg.search.max_per_platform,
            novelty: NoveltyPolicy {
                history_window: cfg.novelty.history_window,
                min_history: cfg.novelty.min_history,
                threshold: cfg.novelty.variance_threshold,
            },
            generate_concurrency: cfg.generate_concurrency(),
            max_source_chars: cfg.generate.max_source_chars,
            generate_call_timeout: cfg.generate.call_timeout(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}
