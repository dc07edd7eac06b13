//! # Job orchestrator
//! Drives one [`JobRun`] per bucket through the fixed step order and keeps the run
//! registry used for duplicate rejection, operator restart and stop.
//!
//! ```text
//! Created -> Running -> { Completed | Failed | Stopped }
//!                         Failed/Stopped --restart--> Running
//! ```
//!
//! A run key is claimed under the registry lock before any step executes, so two
//! invocations with the same key can never both run. Keys stay claimed after the run
//! record itself is pruned.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use metrics::gauge;
use serde::{Deserialize, Serialize};

use crate::external::ExternalCallOutcome;
use crate::metrics::Counter;
use crate::pipeline::context::{keys, ExecutionContext};
use crate::pipeline::novelty::{self, Route};
use crate::pipeline::steps::{self, GenerateSettings};
use crate::pipeline::{PipelineDeps, PipelineSettings, RunScope, StepError};

/// Pipeline identity plus bucket timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RunKey {
    identity: String,
    bucket: DateTime<Utc>,
}

impl RunKey {
    pub fn new(identity: impl Into<String>, bucket: DateTime<Utc>) -> Self {
        Self {
            identity: identity.into(),
            bucket,
        }
    }

    pub fn bucket(&self) -> DateTime<Utc> {
        self.bucket
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identity, self.bucket.to_rfc3339())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Created => "created",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Stopped)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FetchKeywords,
    SearchSources,
    EvaluateNovelty,
    DecideNovelty,
    GeneratePost,
    CachePost,
}

impl Stage {
    pub const FIRST: Stage = Stage::FetchKeywords;

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::FetchKeywords => "fetch_keywords",
            Stage::SearchSources => "search_sources",
            Stage::EvaluateNovelty => "evaluate_novelty",
            Stage::DecideNovelty => "decide_novelty",
            Stage::GeneratePost => "generate_post",
            Stage::CachePost => "cache_post",
        }
    }

    /// Successor in the fixed topology. Only the decider branches.
    pub fn next(self, route: Option<Route>) -> Option<Stage> {
        match self {
            Stage::FetchKeywords => Some(Stage::SearchSources),
            Stage::SearchSources => Some(Stage::EvaluateNovelty),
            Stage::EvaluateNovelty => Some(Stage::DecideNovelty),
            Stage::DecideNovelty => match route {
                Some(Route::NoPostNeeded) => Some(Stage::CachePost),
                _ => Some(Stage::GeneratePost),
            },
            Stage::GeneratePost => Some(Stage::CachePost),
            Stage::CachePost => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub stage: Stage,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// What an operator needs to decide on a restart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunFailure {
    pub stage: Stage,
    pub message: String,
    pub last_outcome: Option<ExternalCallOutcome>,
}

pub struct JobRun {
    pub run_key: RunKey,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
    pub context: ExecutionContext,
    /// Next stage to execute; `None` once the run has completed.
    pub cursor: Option<Stage>,
    pub failure: Option<RunFailure>,
    pub restarts: u32,
}

impl JobRun {
    fn new(run_key: RunKey) -> Self {
        Self {
            run_key,
            status: RunStatus::Created,
            created_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            context: ExecutionContext::new(),
            cursor: Some(Stage::FIRST),
            failure: None,
            restarts: 0,
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_key: self.run_key.to_string(),
            bucket: self.run_key.bucket(),
            status: self.status,
            created_at: self.created_at,
            finished_at: self.finished_at,
            steps: self.steps.clone(),
            next_stage: self.cursor,
            failure: self.failure.clone(),
            restarts: self.restarts,
        }
    }
}

/// Serializable view of a run, served on `/runs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_key: String,
    pub bucket: DateTime<Utc>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
    pub next_stage: Option<Stage>,
    pub failure: Option<RunFailure>,
    pub restarts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestratorError {
    #[error("run {0} was already invoked")]
    DuplicateRun(RunKey),
    #[error("no run recorded for {0}")]
    UnknownRun(RunKey),
    #[error("run {key} is {status}; only failed or stopped runs can be restarted")]
    NotRestartable { key: RunKey, status: RunStatus },
    #[error("run {key} is {status}, not running")]
    NotRunning { key: RunKey, status: RunStatus },
}

struct RunSlot {
    /// Latest view; refreshed when the run is parked.
    summary: RunSummary,
    /// Parked run. `None` while a task is driving it.
    run: Option<JobRun>,
    stop: Arc<AtomicBool>,
}

#[derive(Default)]
struct Registry {
    slots: HashMap<RunKey, RunSlot>,
    order: VecDeque<RunKey>,
    /// Every key ever claimed. Not pruned, so duplicate rejection covers old buckets
    /// triggered by hand; hourly runs add about 8.8k keys a year.
    used: HashSet<RunKey>,
}

pub struct JobOrchestrator {
    deps: PipelineDeps,
    settings: PipelineSettings,
    registry: Mutex<Registry>,
}

impl JobOrchestrator {
    pub fn new(deps: PipelineDeps, settings: PipelineSettings) -> Self {
        Self {
            deps,
            settings,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn deps(&self) -> &PipelineDeps {
        &self.deps
    }

    pub fn key_for(&self, bucket: DateTime<Utc>) -> RunKey {
        RunKey::new(self.settings.identity.clone(), bucket)
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // registry updates are single assignments; a poisoned guard is still consistent
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a new run for `bucket` and drive it to a terminal state.
    ///
    /// Returns `Err` only when the run was not started at all. A run that starts and
    /// then fails comes back as `Ok` with [`RunStatus::Failed`].
    pub async fn run(&self, bucket: DateTime<Utc>) -> Result<RunSummary, OrchestratorError> {
        let (job, stop, _) = self.claim(bucket)?;
        let job = self.drive(job, &stop).await;
        Ok(self.park(job))
    }

    /// Claim `bucket` and drive the run on a background task.
    ///
    /// Duplicate rejection happens before this returns; the returned summary shows the
    /// run as running. Poll [`JobOrchestrator::run_summary`] for the outcome.
    pub fn start(self: &Arc<Self>, bucket: DateTime<Utc>) -> Result<RunSummary, OrchestratorError> {
        let (job, stop, summary) = self.claim(bucket)?;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let job = this.drive(job, &stop).await;
            this.park(job);
        });
        Ok(summary)
    }

    /// Reserve the run key and register an in-flight slot. No step has run yet.
    fn claim(&self, bucket: DateTime<Utc>) -> Result<(JobRun, Arc<AtomicBool>, RunSummary), OrchestratorError> {
        let key = self.key_for(bucket);
        let job = JobRun::new(key.clone());
        let stop = Arc::new(AtomicBool::new(false));
        let mut summary = job.summary();
        summary.status = RunStatus::Running;
        {
            let mut reg = self.registry();
            if !reg.used.insert(key.clone()) {
                tracing::warn!(target: "pipeline", run_key = %key, "duplicate run rejected");
                return Err(OrchestratorError::DuplicateRun(key));
            }
            reg.slots.insert(
                key.clone(),
                RunSlot {
                    summary: summary.clone(),
                    run: None,
                    stop: stop.clone(),
                },
            );
            reg.order.push_back(key.clone());
        }

        tracing::info!(target: "pipeline", run_key = %key, "run created");
        Ok((job, stop, summary))
    }

    /// Resume a failed or stopped run from the step it did not finish. Completed
    /// steps are not executed again; their context values are reused.
    pub async fn restart(&self, key: &RunKey) -> Result<RunSummary, OrchestratorError> {
        let (mut job, stop) = {
            let mut reg = self.registry();
            let slot = reg
                .slots
                .get_mut(key)
                .ok_or_else(|| OrchestratorError::UnknownRun(key.clone()))?;
            let status = slot.summary.status;
            if !matches!(status, RunStatus::Failed | RunStatus::Stopped) {
                return Err(OrchestratorError::NotRestartable {
                    key: key.clone(),
                    status,
                });
            }
            let job = slot.run.take().ok_or_else(|| OrchestratorError::NotRestartable {
                key: key.clone(),
                status,
            })?;
            slot.stop.store(false, Ordering::SeqCst);
            slot.summary.status = RunStatus::Running;
            (job, slot.stop.clone())
        };

        job.restarts += 1;
        job.failure = None;
        job.finished_at = None;
        tracing::info!(
            target: "pipeline",
            run_key = %key,
            from = job.cursor.map(Stage::as_str),
            restarts = job.restarts,
            "run restarted"
        );
        let job = self.drive(job, &stop).await;
        Ok(self.park(job))
    }

    /// Ask a running run to stop. Honored before the next step starts; the step in
    /// flight finishes normally.
    pub fn stop(&self, key: &RunKey) -> Result<(), OrchestratorError> {
        let reg = self.registry();
        let slot = reg
            .slots
            .get(key)
            .ok_or_else(|| OrchestratorError::UnknownRun(key.clone()))?;
        if slot.summary.status.is_terminal() {
            return Err(OrchestratorError::NotRunning {
                key: key.clone(),
                status: slot.summary.status,
            });
        }
        slot.stop.store(true, Ordering::SeqCst);
        tracing::info!(target: "pipeline", run_key = %key, "stop requested");
        Ok(())
    }

    /// Retained runs, oldest first.
    pub fn runs(&self) -> Vec<RunSummary> {
        let reg = self.registry();
        reg.order
            .iter()
            .filter_map(|k| reg.slots.get(k))
            .map(|s| s.summary.clone())
            .collect()
    }

    pub fn run_summary(&self, key: &RunKey) -> Option<RunSummary> {
        self.registry().slots.get(key).map(|s| s.summary.clone())
    }

    /// Read a parked run's context. `None` for unknown, pruned or in-flight runs.
    pub fn with_context<R>(&self, key: &RunKey, f: impl FnOnce(&ExecutionContext) -> R) -> Option<R> {
        let reg = self.registry();
        let job = reg.slots.get(key)?.run.as_ref()?;
        Some(f(&job.context))
    }

    /// Store a run back in its slot and prune old terminal runs.
    fn park(&self, job: JobRun) -> RunSummary {
        let summary = job.summary();
        let mut reg = self.registry();
        if let Some(slot) = reg.slots.get_mut(&job.run_key) {
            slot.summary = summary.clone();
            slot.run = Some(job);
        }
        prune(&mut reg, self.settings.run_retention);
        summary
    }

    async fn drive(&self, mut job: JobRun, stop: &AtomicBool) -> JobRun {
        job.status = RunStatus::Running;
        let scope = RunScope {
            run_key: job.run_key.clone(),
            bucket: job.run_key.bucket(),
        };
        let counters = &self.deps.counters;

        while let Some(stage) = job.cursor {
            if stop.load(Ordering::SeqCst) {
                job.status = RunStatus::Stopped;
                job.finished_at = Some(Utc::now());
                counters.add(Counter::RunsStopped, 1);
                tracing::warn!(target: "pipeline", run_key = %scope.run_key, before = stage.as_str(), "run stopped");
                return job;
            }

            let started_at = Utc::now();
            tracing::debug!(target: "pipeline", run_key = %scope.run_key, stage = stage.as_str(), "step started");
            match self.execute(stage, &scope, &mut job.context).await {
                Ok(()) => {
                    let finished_at = Utc::now();
                    job.steps.push(StepRecord {
                        stage,
                        status: StepStatus::Completed,
                        started_at,
                        finished_at,
                    });
                    let route = job.context.get(keys::ROUTE).copied();
                    job.cursor = stage.next(route);
                    if stage == Stage::DecideNovelty && route == Some(Route::NoPostNeeded) {
                        job.steps.push(StepRecord {
                            stage: Stage::GeneratePost,
                            status: StepStatus::Skipped,
                            started_at: finished_at,
                            finished_at,
                        });
                    }
                }
                Err(e) => {
                    let finished_at = Utc::now();
                    job.steps.push(StepRecord {
                        stage,
                        status: StepStatus::Failed,
                        started_at,
                        finished_at,
                    });
                    tracing::error!(
                        target: "pipeline",
                        run_key = %scope.run_key,
                        stage = stage.as_str(),
                        error = %e,
                        "step failed; run halted"
                    );
                    job.failure = Some(RunFailure {
                        stage,
                        message: e.to_string(),
                        last_outcome: e.last_outcome().cloned(),
                    });
                    job.status = RunStatus::Failed;
                    job.finished_at = Some(finished_at);
                    counters.add(Counter::RunsFailed, 1);
                    return job;
                }
            }
        }

        job.status = RunStatus::Completed;
        job.finished_at = Some(Utc::now());
        counters.add(Counter::RunsCompleted, 1);
        gauge!("pipeline_last_run_ts").set(Utc::now().timestamp() as f64);
        tracing::info!(target: "pipeline", run_key = %scope.run_key, steps = job.steps.len(), "run completed");
        job
    }

    async fn execute(&self, stage: Stage, scope: &RunScope, ctx: &mut ExecutionContext) -> Result<(), StepError> {
        let d = &self.deps;
        let s = &self.settings;
        match stage {
            Stage::FetchKeywords => {
                steps::fetch_keywords(d.trend.as_ref(), d.keywords.as_ref(), &s.retry, scope, ctx).await?;
            }
            Stage::SearchSources => {
                steps::search_sources(
                    d.news.as_ref(),
                    d.video.as_ref(),
                    s.max_sources_per_platform,
                    &s.retry,
                    &d.counters,
                    scope,
                    ctx,
                )
                .await?;
            }
            Stage::EvaluateNovelty => {
                novelty::evaluate_novelty(d.keywords.as_ref(), &s.novelty, &d.counters, scope, ctx).await?;
            }
            Stage::DecideNovelty => {
                let route = novelty::apply_decider(ctx)?;
                novelty::record_route(route, &d.counters);
                tracing::info!(target: "pipeline", run_key = %scope.run_key, route = ?route, "novelty decided");
            }
            Stage::GeneratePost => {
                let gen = GenerateSettings {
                    max_concurrency: s.generate_concurrency,
                    max_source_chars: s.max_source_chars,
                    call_timeout: s.generate_call_timeout,
                    retry: s.retry,
                };
                steps::generate_posts(d.summarizer.as_ref(), d.posts.as_ref(), &gen, &d.counters, scope, ctx).await?;
            }
            Stage::CachePost => {
                steps::cache_posts(d.cache.as_ref(), &d.counters, scope, ctx).await?;
            }
        }
        Ok(())
    }
}

/// Drop the oldest terminal runs beyond `retention`. In-flight runs are never pruned.
fn prune(reg: &mut Registry, retention: usize) {
    let mut excess = reg.order.len().saturating_sub(retention);
    if excess == 0 {
        return;
    }
    let mut kept = VecDeque::with_capacity(reg.order.len());
    while let Some(key) = reg.order.pop_front() {
        let prunable = excess > 0
            && reg
                .slots
                .get(&key)
                .is_some_and(|s| s.run.is_some() && s.summary.status.is_terminal());
        if prunable {
            reg.slots.remove(&key);
            excess -= 1;
        } else {
            kept.push_back(key);
        }
    }
    reg.order = kept;
}
