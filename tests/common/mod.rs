// tests/common/mod.rs
//
// Hand-written fake adapters and a harness wiring them into a JobOrchestrator
// with in-memory stores and zero-delay retries.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use trend_post_pipeline::ai::{parse_summary, SummarizeError, Summarizer, Summary};
use trend_post_pipeline::external::{ExternalCallOutcome, RetryPolicy};
use trend_post_pipeline::metrics::PipelineCounters;
use trend_post_pipeline::pipeline::model::{AiVendor, KeywordId, KeywordMetricSample, Platform};
use trend_post_pipeline::pipeline::store::{
    InMemoryKeywordStore, InMemoryPostCache, InMemoryPostStore, KeywordStore,
};
use trend_post_pipeline::pipeline::NoveltyPolicy;
use trend_post_pipeline::sources::{SearchSource, SourceItem, TrendItem, TrendSource};
use trend_post_pipeline::{JobOrchestrator, PipelineDeps, PipelineSettings};

pub fn bucket() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()
}

pub fn trend(text: &str, volume: u64) -> TrendItem {
    TrendItem {
        text: text.to_string(),
        volume,
    }
}

// ---------------- trend ----------------

#[derive(Default)]
pub struct FakeTrend {
    pub items: Mutex<Vec<TrendItem>>,
    pub fail: Mutex<Option<ExternalCallOutcome>>,
    /// When set, every fetch waits for one notification before answering.
    pub gate: Mutex<Option<Arc<Notify>>>,
    calls: AtomicU32,
}

impl FakeTrend {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrendSource for FakeTrend {
    async fn fetch_trending_keywords(&self) -> Result<Vec<TrendItem>, ExternalCallOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().clone();
        if let Some(g) = gate {
            g.notified().await;
        }
        if let Some(o) = self.fail.lock().clone() {
            return Err(o);
        }
        Ok(self.items.lock().clone())
    }

    fn name(&self) -> &'static str {
        "fake_trend"
    }
}

// ---------------- search ----------------

pub struct FakeSearch {
    platform: Platform,
    pub fail: Mutex<Option<ExternalCallOutcome>>,
    calls: AtomicU32,
}

impl FakeSearch {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            fail: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchSource for FakeSearch {
    async fn fetch_sources(&self, keyword: &str, max_count: usize) -> Result<Vec<SourceItem>, ExternalCallOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(o) = self.fail.lock().clone() {
            return Err(o);
        }
        Ok((0..max_count.min(2))
            .map(|i| SourceItem {
                url: format!("https://{}.example.test/{keyword}/{i}", self.platform.as_str()),
                title: format!("{keyword} headline {i}"),
                excerpt: Some(format!("{keyword} details {i}")),
                thumbnail: None,
            })
            .collect())
    }

    fn platform(&self) -> Platform {
        self.platform
    }

    fn name(&self) -> &'static str {
        match self.platform {
            Platform::News => "fake_news",
            _ => "fake_video",
        }
    }
}

// ---------------- summarizer ----------------

/// Answers every call with the same raw body, parsed by the strict parser.
pub struct ScriptedSummarizer {
    pub reply: Mutex<String>,
    calls: AtomicU32,
}

impl ScriptedSummarizer {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: Mutex::new(reply.to_string()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    async fn summarize(&self, _content: &str) -> Result<Summary, SummarizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.reply.lock().clone();
        parse_summary("scripted", &reply)
    }

    fn vendor(&self) -> AiVendor {
        AiVendor::Mock
    }
}

pub const GOOD_REPLY: &str = r#"{"title":"보조금 확대 발표","summary":"정부가 청년 보조금 지원 대상을 넓힌다고 밝혔다."}"#;

// ---------------- harness ----------------

pub struct Harness {
    pub trend: Arc<FakeTrend>,
    pub news: Arc<FakeSearch>,
    pub video: Arc<FakeSearch>,
    pub summarizer: Arc<ScriptedSummarizer>,
    pub keywords: Arc<InMemoryKeywordStore>,
    pub posts: Arc<InMemoryPostStore>,
    pub cache: Arc<InMemoryPostCache>,
    pub counters: Arc<PipelineCounters>,
    pub orchestrator: Arc<JobOrchestrator>,
}

pub fn settings() -> PipelineSettings {
    PipelineSettings {
        identity: "test".to_string(),
        run_retention: 16,
        retry: RetryPolicy::immediate(3),
        max_sources_per_platform: 5,
        novelty: NoveltyPolicy::default(),
        generate_concurrency: 2,
        max_source_chars: 2_000,
        generate_call_timeout: Duration::from_secs(5),
    }
}

impl Harness {
    pub fn new(items: Vec<TrendItem>, reply: &str) -> Self {
        let trend = Arc::new(FakeTrend::default());
        *trend.items.lock() = items;
        let news = Arc::new(FakeSearch::new(Platform::News));
        let video = Arc::new(FakeSearch::new(Platform::Video));
        let summarizer = Arc::new(ScriptedSummarizer::new(reply));
        let keywords = Arc::new(InMemoryKeywordStore::new());
        let posts = Arc::new(InMemoryPostStore::new());
        let cache = Arc::new(InMemoryPostCache::new());
        let counters = Arc::new(PipelineCounters::new());

        let deps = PipelineDeps {
            trend: trend.clone(),
            news: news.clone(),
            video: video.clone(),
            summarizer: summarizer.clone(),
            keywords: keywords.clone(),
            posts: posts.clone(),
            cache: cache.clone(),
            counters: counters.clone(),
        };
        let orchestrator = Arc::new(JobOrchestrator::new(deps, settings()));

        Self {
            trend,
            news,
            video,
            summarizer,
            keywords,
            posts,
            cache,
            counters,
            orchestrator,
        }
    }

    /// Record prior hourly trend samples, newest first, ending one hour before `at`.
    pub async fn seed_history(&self, text: &str, volumes: &[u64], at: DateTime<Utc>) -> KeywordId {
        let kw = self.keywords.resolve_or_create(text).await.unwrap();
        for (i, v) in volumes.iter().enumerate() {
            self.keywords
                .record_sample(KeywordMetricSample {
                    keyword_id: kw.id,
                    platform: Platform::Trends,
                    bucket: at - TimeDelta::hours(i as i64 + 1),
                    volume: *v,
                    score: 50.0,
                })
                .await
                .unwrap();
        }
        kw.id
    }
}
