use std::sync::atomic::{AtomicU64, Ordering};

use axum::{routing::get, Router};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use serde::Serialize;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and describe the pipeline series.
    pub fn init() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("prometheus: install recorder");
        ensure_metrics_described();
        Self { handle }
    }

    /// Router exposing `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// Named counters the pipeline updates once per run, after the owning step completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    NewsFetched,
    NewsFailed,
    VideoFetched,
    VideoFailed,
    LowVariation,
    PostsCreated,
    PostFailed,
    NoPostNeeded,
    RunsCompleted,
    RunsFailed,
    RunsStopped,
}

impl Counter {
    pub const ALL: [Counter; 11] = [
        Counter::NewsFetched,
        Counter::NewsFailed,
        Counter::VideoFetched,
        Counter::VideoFailed,
        Counter::LowVariation,
        Counter::PostsCreated,
        Counter::PostFailed,
        Counter::NoPostNeeded,
        Counter::RunsCompleted,
        Counter::RunsFailed,
        Counter::RunsStopped,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::NewsFetched => "pipeline_news_fetched_total",
            Counter::NewsFailed => "pipeline_news_failed_total",
            Counter::VideoFetched => "pipeline_video_fetched_total",
            Counter::VideoFailed => "pipeline_video_failed_total",
            Counter::LowVariation => "pipeline_low_variation_total",
            Counter::PostsCreated => "pipeline_posts_created_total",
            Counter::PostFailed => "pipeline_post_failed_total",
            Counter::NoPostNeeded => "pipeline_no_post_needed_total",
            Counter::RunsCompleted => "pipeline_runs_completed_total",
            Counter::RunsFailed => "pipeline_runs_failed_total",
            Counter::RunsStopped => "pipeline_runs_stopped_total",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Process-wide aggregates. Atomic so concurrent runs and fan-out tasks can update
/// them without locking; every update is mirrored into the `metrics` facade.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    counters: [AtomicU64; 11],
    cache_entries: AtomicU64,
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, c: Counter, n: u64) {
        if n == 0 {
            return;
        }
        self.counters[c.index()].fetch_add(n, Ordering::Relaxed);
        counter!(c.name()).increment(n);
    }

    pub fn get(&self, c: Counter) -> u64 {
        self.counters[c.index()].load(Ordering::Relaxed)
    }

    /// Entries written to the serving cache by the latest run.
    pub fn set_cache_entries(&self, n: u64) {
        self.cache_entries.store(n, Ordering::Relaxed);
        gauge!("pipeline_cache_entries").set(n as f64);
    }

    pub fn cache_entries(&self) -> u64 {
        self.cache_entries.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            counters: Counter::ALL.iter().map(|c| (c.name(), self.get(*c))).collect(),
            cache_entries: self.cache_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CounterSnapshot {
    pub counters: Vec<(&'static str, u64)>,
    pub cache_entries: u64,
}

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_news_fetched_total", "Keywords whose news search succeeded.");
        describe_counter!("pipeline_news_failed_total", "Keywords whose news search failed after recovery.");
        describe_counter!("pipeline_video_fetched_total", "Keywords whose video search succeeded.");
        describe_counter!("pipeline_video_failed_total", "Keywords whose video search failed after recovery.");
        describe_counter!("pipeline_low_variation_total", "Keywords skipped by the novelty evaluator.");
        describe_counter!("pipeline_posts_created_total", "Posts generated by the AI summarizer.");
        describe_counter!("pipeline_post_failed_total", "Postable keywords whose post generation failed.");
        describe_counter!("pipeline_no_post_needed_total", "Runs routed straight to caching.");
        describe_counter!("pipeline_runs_completed_total", "Runs that completed.");
        describe_counter!("pipeline_runs_failed_total", "Runs that failed.");
        describe_counter!("pipeline_runs_stopped_total", "Runs stopped by an operator.");
        describe_counter!(
            "external_call_outcomes_total",
            "Classified external call failures by vendor and kind."
        );
        describe_gauge!("pipeline_cache_entries", "Cache entries written by the latest run.");
        describe_gauge!("pipeline_last_run_ts", "Unix ts when the pipeline last finished a run.");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counter_indices_match_all() {
        for (i, c) in Counter::ALL.iter().enumerate() {
            assert_eq!(c.index(), i);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_adds_are_not_lost() {
        let counters = Arc::new(PipelineCounters::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = counters.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..1000 {
                    c.add(Counter::VideoFailed, 1);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(counters.get(Counter::VideoFailed), 8000);
        assert_eq!(counters.get(Counter::NewsFailed), 0);
    }
}
