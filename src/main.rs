//! Trend-to-post pipeline: Binary Entrypoint
//! Boots the hourly scheduler and the operator HTTP surface (health, metrics, runs).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trend_post_pipeline::ai::build_summarizer;
use trend_post_pipeline::config::PipelineConfig;
use trend_post_pipeline::metrics::{Metrics, PipelineCounters};
use trend_post_pipeline::pipeline::store::{InMemoryKeywordStore, InMemoryPostCache, InMemoryPostStore};
use trend_post_pipeline::scheduler::{spawn_scheduler, SchedulerCfg};
use trend_post_pipeline::sources::{google_trends::GoogleTrendsSource, naver_news::NaverNewsSource, youtube::YoutubeSource};
use trend_post_pipeline::{create_router, AppState, JobOrchestrator, PipelineDeps, PipelineSettings};

/// Compact logs by default; `LOG_FORMAT=json` switches to one JSON object per line.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("trend_post_pipeline=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    // Shuttle may have installed a subscriber already; keep theirs in that case.
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

fn ai_mock_mode() -> bool {
    std::env::var("AI_TEST_MODE")
        .map(|v| v.eq_ignore_ascii_case("mock"))
        .unwrap_or(false)
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = PipelineConfig::load_default().context("loading pipeline config")?;
    let ai_cfg = if ai_mock_mode() {
        cfg.ai.clone()
    } else {
        cfg.ai.clone().resolve().context("resolving AI config")?
    };
    let summarizer = build_summarizer(&ai_cfg)?;

    let metrics = Metrics::init();
    let search_timeout = Duration::from_secs(cfg.search.call_timeout_secs);

    let deps = PipelineDeps {
        trend: Arc::new(GoogleTrendsSource::for_geo(
            &cfg.trend.geo,
            cfg.trend.max_keywords,
            Duration::from_secs(cfg.trend.call_timeout_secs),
        )),
        news: Arc::new(NaverNewsSource::from_env(search_timeout)),
        video: Arc::new(YoutubeSource::from_env(search_timeout)),
        summarizer,
        keywords: Arc::new(InMemoryKeywordStore::new()),
        posts: Arc::new(InMemoryPostStore::new()),
        cache: Arc::new(InMemoryPostCache::new()),
        counters: Arc::new(PipelineCounters::new()),
    };
    let settings = PipelineSettings::from_config(&cfg);
    tracing::info!(
        target: "pipeline",
        identity = %settings.identity,
        vendor = ai_cfg.vendor.as_str(),
        concurrency = settings.generate_concurrency,
        threshold = settings.novelty.threshold,
        "pipeline configured"
    );

    let orchestrator = Arc::new(JobOrchestrator::new(deps, settings));
    spawn_scheduler(
        orchestrator.clone(),
        SchedulerCfg {
            interval_secs: cfg.pipeline.interval_secs,
        },
    );

    let router = create_router(AppState { orchestrator }).merge(metrics.router());
    Ok(router.into())
}
