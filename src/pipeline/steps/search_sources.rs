//! Search-Sources flow: news and video searches run concurrently and join before
//! the pipeline moves on. A keyword whose search fails on one platform keeps its
//! candidacy; it just has less source material.

use chrono::{DateTime, Utc};

use crate::external::{with_retry, RetryPolicy};
use crate::metrics::{Counter, PipelineCounters};
use crate::pipeline::context::{keys, ExecutionContext, SourceMap};
use crate::pipeline::model::{Keyword, KeywordId, SourceCandidate};
use crate::pipeline::{RunScope, StepError};
use crate::sources::SearchSource;

/// Output of one platform branch.
#[derive(Debug, Default)]
pub struct PlatformSearch {
    pub sources: SourceMap,
    pub fetched: Vec<KeywordId>,
    pub failed: Vec<KeywordId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchSummary {
    pub news_fetched: usize,
    pub news_failed: usize,
    pub video_fetched: usize,
    pub video_failed: usize,
}

/// Search every keyword on one platform. Never fails as a whole.
pub async fn search_platform(
    source: &dyn SearchSource,
    keywords: &[Keyword],
    max_count: usize,
    retry: &RetryPolicy,
    fetched_at: DateTime<Utc>,
) -> PlatformSearch {
    let platform = source.platform();
    let mut out = PlatformSearch::default();

    for kw in keywords {
        let res = with_retry(retry, source.name(), |_| source.fetch_sources(&kw.text, max_count)).await;
        match res {
            Ok(items) => {
                let candidates = items
                    .into_iter()
                    .take(max_count)
                    .map(|it| SourceCandidate {
                        keyword_id: kw.id,
                        platform,
                        url: it.url,
                        title: it.title,
                        excerpt: it.excerpt,
                        thumbnail: it.thumbnail,
                        fetched_at,
                    })
                    .collect();
                out.sources.insert(kw.id, candidates);
                out.fetched.push(kw.id);
            }
            Err(outcome) => {
                tracing::warn!(
                    target: "search",
                    platform = platform.as_str(),
                    keyword_id = %kw.id,
                    kind = outcome.kind.as_str(),
                    error = %outcome,
                    "search failed for keyword"
                );
                out.failed.push(kw.id);
            }
        }
    }
    out
}

pub async fn search_sources(
    news: &dyn SearchSource,
    video: &dyn SearchSource,
    max_count: usize,
    retry: &RetryPolicy,
    counters: &PipelineCounters,
    scope: &RunScope,
    ctx: &mut ExecutionContext,
) -> Result<SearchSummary, StepError> {
    let keywords = ctx.require(keys::CANDIDATES)?.clone();
    let eligible = ctx.require(keys::CANDIDATE_IDS)?.clone();
    let now = Utc::now();

    // fork: both branches run until done, regardless of the other's outcome
    let (news_out, video_out) = tokio::join!(
        search_platform(news, &keywords, max_count, retry, now),
        search_platform(video, &keywords, max_count, retry, now),
    );

    let summary = SearchSummary {
        news_fetched: news_out.fetched.len(),
        news_failed: news_out.failed.len(),
        video_fetched: video_out.fetched.len(),
        video_failed: video_out.failed.len(),
    };

    counters.add(Counter::NewsFetched, summary.news_fetched as u64);
    counters.add(Counter::NewsFailed, summary.news_failed as u64);
    counters.add(Counter::VideoFetched, summary.video_fetched as u64);
    counters.add(Counter::VideoFailed, summary.video_failed as u64);

    tracing::info!(
        target: "search",
        run_key = %scope.run_key,
        news_fetched = summary.news_fetched,
        news_failed = summary.news_failed,
        video_fetched = summary.video_fetched,
        video_failed = summary.video_failed,
        "source search joined"
    );

    ctx.insert(keys::NEWS_SOURCES, news_out.sources);
    ctx.insert(keys::NEWS_FAILED_IDS, news_out.failed);
    ctx.insert(keys::VIDEO_SOURCES, video_out.sources);
    ctx.insert(keys::VIDEO_FAILED_IDS, video_out.failed);
    ctx.insert(keys::ELIGIBLE_IDS, eligible);
    Ok(summary)
}
