// src/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::pipeline::model::hour_bucket;
use crate::pipeline::{JobOrchestrator, OrchestratorError, RunStatus};

#[derive(Clone, Copy, Debug)]
pub struct SchedulerCfg {
    pub interval_secs: u64,
}

/// Spawn the trigger loop: every tick invokes the pipeline for the current hour bucket.
/// The first tick fires immediately; later ticks inside the same hour are rejected as
/// duplicates and only logged.
pub fn spawn_scheduler(orchestrator: Arc<JobOrchestrator>, cfg: SchedulerCfg) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            tick(&orchestrator).await;
        }
    })
}

/// One trigger. Returns the final status when a run was started.
pub async fn tick(orchestrator: &JobOrchestrator) -> Option<RunStatus> {
    let bucket = hour_bucket(Utc::now());
    match orchestrator.run(bucket).await {
        Ok(summary) => {
            tracing::info!(
                target: "scheduler",
                run_key = %summary.run_key,
                status = summary.status.as_str(),
                "scheduled run finished"
            );
            Some(summary.status)
        }
        Err(OrchestratorError::DuplicateRun(key)) => {
            tracing::debug!(target: "scheduler", run_key = %key, "bucket already run; waiting for next hour");
            None
        }
        Err(e) => {
            tracing::warn!(target: "scheduler", error = %e, "scheduled run not started");
            None
        }
    }
}
