//! Generate-Post: one summarizer call per postable keyword, fanned out with a
//! concurrency bound and joined before anything is written. A keyword whose call
//! fails (after retries, or terminally) gets no post this run; the step still succeeds.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};

use crate::ai::{SummarizeError, Summarizer, Summary};
use crate::external::{with_retry, Classified, ExternalCallOutcome, RetryPolicy};
use crate::metrics::{Counter, PipelineCounters};
use crate::pipeline::context::{keys, ExecutionContext, SourceMap};
use crate::pipeline::model::{Keyword, KeywordId, SourceCandidate};
use crate::pipeline::store::{NewPost, PostStore};
use crate::pipeline::{RunScope, StepError};

#[derive(Debug, Clone)]
pub struct GenerateSettings {
    pub max_concurrency: usize,
    pub max_source_chars: usize,
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateSummary {
    pub created: usize,
    pub failed: Vec<KeywordId>,
}

/// Combined source text for one keyword: news before video, newest first within a
/// platform, capped at `max_chars` characters. `None` when there is nothing to summarize.
pub fn assemble_source_text(
    keyword: &Keyword,
    news: &[SourceCandidate],
    video: &[SourceCandidate],
    max_chars: usize,
) -> Option<String> {
    if news.is_empty() && video.is_empty() {
        return None;
    }

    let mut lines = vec![format!("Keyword: {}\n", keyword.text)];
    for group in [news, video] {
        let mut ordered: Vec<&SourceCandidate> = group.iter().collect();
        // stable: equal timestamps keep relevance order
        ordered.sort_by(|a, b| b.fetched_at.cmp(&a.fetched_at));

        lines.extend(ordered.into_iter().map(|src| match src.excerpt.as_deref() {
            Some(ex) => format!("[{}] {}: {}\n", src.platform.as_str(), src.title, ex),
            None => format!("[{}] {}\n", src.platform.as_str(), src.title),
        }));
    }

    // the header counts against the cap like any source line
    let mut out = String::new();
    let mut used = 0;
    for line in lines {
        let len = line.chars().count();
        if used + len > max_chars {
            out.extend(line.chars().take(max_chars - used));
            break;
        }
        out.push_str(&line);
        used += len;
    }
    Some(out)
}

/// One summarizer call bounded by its own timeout; a timeout is a retryable outcome.
async fn summarize_once(
    summarizer: &dyn Summarizer,
    content: &str,
    call_timeout: Duration,
) -> Result<Summary, SummarizeError> {
    match tokio::time::timeout(call_timeout, summarizer.summarize(content)).await {
        Ok(res) => res,
        Err(_) => Err(ExternalCallOutcome::timeout(summarizer.vendor().as_str()).into()),
    }
}

pub async fn generate_posts(
    summarizer: &dyn Summarizer,
    posts: &dyn PostStore,
    settings: &GenerateSettings,
    counters: &PipelineCounters,
    scope: &RunScope,
    ctx: &mut ExecutionContext,
) -> Result<GenerateSummary, StepError> {
    let postable = ctx.require(keys::POSTABLE_IDS)?.clone();

    let (jobs, mut failed) = {
        let candidates: HashMap<KeywordId, &Keyword> =
            ctx.require(keys::CANDIDATES)?.iter().map(|k| (k.id, k)).collect();
        let news = ctx.require(keys::NEWS_SOURCES)?;
        let video = ctx.require(keys::VIDEO_SOURCES)?;

        let mut failed = Vec::new();
        let mut jobs: Vec<(usize, KeywordId, String)> = Vec::with_capacity(postable.len());
        for (idx, id) in postable.iter().copied().enumerate() {
            let Some(kw) = candidates.get(&id) else {
                tracing::warn!(target: "generate_post", keyword_id = %id, "postable keyword is not a candidate");
                failed.push(id);
                continue;
            };
            let text = assemble_source_text(
                kw,
                sources_for(news, id),
                sources_for(video, id),
                settings.max_source_chars,
            );
            match text {
                Some(text) => jobs.push((idx, id, text)),
                None => {
                    tracing::warn!(target: "generate_post", keyword_id = %id, "no source material; skipping post");
                    failed.push(id);
                }
            }
        }
        (jobs, failed)
    };

    let vendor = summarizer.vendor();
    let retry = &settings.retry;
    let call_timeout = settings.call_timeout;

    let mut results: Vec<(usize, KeywordId, Result<Summary, SummarizeError>)> = stream::iter(jobs)
        .map(|(idx, id, text)| async move {
            let content = text.as_str();
            let res = with_retry(retry, vendor.as_str(), move |_| {
                summarize_once(summarizer, content, call_timeout)
            })
            .await;
            (idx, id, res)
        })
        .buffer_unordered(settings.max_concurrency.max(1))
        .collect()
        .await;
    // completion order is arbitrary; keep postable order in the outputs
    results.sort_by_key(|(idx, _, _)| *idx);

    let now = Utc::now();
    let mut created = Vec::new();
    for (_, id, res) in results {
        match res {
            Ok(summary) => {
                let new_post = NewPost {
                    keyword_id: id,
                    title: summary.title,
                    body: summary.summary,
                    vendor,
                    created_at: now,
                };
                match posts.create(new_post).await {
                    Ok(post) => created.push(post),
                    Err(e) => {
                        tracing::warn!(target: "generate_post", keyword_id = %id, error = %e, "post store rejected post");
                        failed.push(id);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    target: "generate_post",
                    keyword_id = %id,
                    vendor = vendor.as_str(),
                    retryable = e.outcome().map(|o| o.is_retryable()),
                    error = %e,
                    "post generation failed"
                );
                failed.push(id);
            }
        }
    }

    counters.add(Counter::PostsCreated, created.len() as u64);
    counters.add(Counter::PostFailed, failed.len() as u64);
    tracing::info!(
        target: "generate_post",
        run_key = %scope.run_key,
        vendor = vendor.as_str(),
        created = created.len(),
        failed = failed.len(),
        "posts generated"
    );

    let summary = GenerateSummary {
        created: created.len(),
        failed: failed.clone(),
    };
    ctx.insert(keys::NEW_POST_IDS, created.iter().map(|p| p.id).collect());
    ctx.insert(keys::CREATED_POST_COUNT, created.len());
    ctx.insert(keys::NEW_POSTS, created);
    ctx.insert(keys::POST_FAILED_IDS, failed);
    Ok(summary)
}

fn sources_for(map: &SourceMap, id: KeywordId) -> &[SourceCandidate] {
    map.get(&id).map(Vec::as_slice).unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::model::{AiVendor, GeneratedPost, Platform};
    use crate::pipeline::store::InMemoryPostStore;
    use crate::pipeline::RunKey;
    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn src(platform: Platform, title: &str, mins_ago: i64) -> SourceCandidate {
        let t0 = Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();
        SourceCandidate {
            keyword_id: KeywordId(1),
            platform,
            url: format!("https://example.test/{title}"),
            title: title.to_string(),
            excerpt: None,
            thumbnail: None,
            fetched_at: t0 - TimeDelta::minutes(mins_ago),
        }
    }

    fn kw() -> Keyword {
        Keyword {
            id: KeywordId(1),
            text: "보조금".into(),
        }
    }

    #[test]
    fn news_first_then_video_newest_first() {
        let news = vec![src(Platform::News, "old-news", 30), src(Platform::News, "new-news", 1)];
        let video = vec![src(Platform::Video, "clip", 5)];
        let text = assemble_source_text(&kw(), &news, &video, 10_000).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec!["Keyword: 보조금", "[news] new-news", "[news] old-news", "[video] clip"]
        );
    }

    #[test]
    fn text_is_capped_in_chars() {
        let news = vec![src(Platform::News, &"가".repeat(100), 1)];
        let text = assemble_source_text(&kw(), &news, &[], 40).unwrap();
        assert_eq!(text.chars().count(), 40);

        // a cap shorter than the header cuts the header too
        let long = Keyword {
            id: KeywordId(1),
            text: "긴키워드텍스트".into(),
        };
        let text = assemble_source_text(&long, &news, &[], 5).unwrap();
        assert_eq!(text, "Keywo");
        assert_eq!(text.chars().count(), 5);
    }

    #[test]
    fn no_sources_means_nothing_to_summarize() {
        assert_eq!(assemble_source_text(&kw(), &[], &[], 100), None);
    }

    // ---------------- step-level ----------------

    /// Hangs forever on content mentioning `hang_on`; otherwise answers after `delay`
    /// while tracking how many calls are in flight.
    struct SlowSummarizer {
        hang_on: Option<&'static str>,
        delay: Duration,
        calls: Mutex<HashMap<String, u32>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowSummarizer {
        fn new(hang_on: Option<&'static str>, delay: Duration) -> Self {
            Self {
                hang_on,
                delay,
                calls: Mutex::new(HashMap::new()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn calls_for(&self, text: &str) -> u32 {
            self.calls.lock().get(text).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Summarizer for SlowSummarizer {
        async fn summarize(&self, content: &str) -> Result<Summary, SummarizeError> {
            let header = content.lines().next().unwrap_or_default().trim_start_matches("Keyword: ").to_string();
            *self.calls.lock().entry(header.clone()).or_default() += 1;
            if self.hang_on == Some(header.as_str()) {
                std::future::pending::<()>().await;
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Summary {
                title: format!("{header} 소식"),
                summary: format!("{header} 요약"),
            })
        }

        fn vendor(&self) -> AiVendor {
            AiVendor::Mock
        }
    }

    /// Refuses posts for one keyword and stores the rest.
    struct FlakyPostStore {
        reject: KeywordId,
        inner: InMemoryPostStore,
    }

    #[async_trait]
    impl PostStore for FlakyPostStore {
        async fn create(&self, post: NewPost) -> anyhow::Result<GeneratedPost> {
            if post.keyword_id == self.reject {
                anyhow::bail!("write refused for keyword {}", post.keyword_id);
            }
            self.inner.create(post).await
        }
    }

    fn settings(max_concurrency: usize) -> GenerateSettings {
        GenerateSettings {
            max_concurrency,
            max_source_chars: 2_000,
            call_timeout: Duration::from_millis(50),
            retry: RetryPolicy::immediate(3),
        }
    }

    fn scope() -> RunScope {
        let bucket = Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();
        RunScope {
            run_key: RunKey::new("test", bucket),
            bucket,
        }
    }

    /// Context for `texts` as postable keywords with one news item each.
    fn ctx_for(texts: &[&str]) -> ExecutionContext {
        let keywords: Vec<Keyword> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Keyword {
                id: KeywordId(i as u64 + 1),
                text: t.to_string(),
            })
            .collect();
        let news: SourceMap = keywords
            .iter()
            .map(|k| {
                let mut item = src(Platform::News, &k.text, 1);
                item.keyword_id = k.id;
                (k.id, vec![item])
            })
            .collect();

        let mut ctx = ExecutionContext::new();
        ctx.insert(keys::POSTABLE_IDS, keywords.iter().map(|k| k.id).collect());
        ctx.insert(keys::CANDIDATES, keywords);
        ctx.insert(keys::NEWS_SOURCES, news);
        ctx.insert(keys::VIDEO_SOURCES, SourceMap::new());
        ctx
    }

    #[tokio::test]
    async fn store_failure_is_contained_to_its_keyword() {
        let summarizer = SlowSummarizer::new(None, Duration::ZERO);
        let store = FlakyPostStore {
            reject: KeywordId(2),
            inner: InMemoryPostStore::new(),
        };
        let counters = PipelineCounters::new();
        let mut ctx = ctx_for(&["보조금", "환율", "금리"]);

        let out = generate_posts(&summarizer, &store, &settings(2), &counters, &scope(), &mut ctx)
            .await
            .unwrap();

        assert_eq!(out.created, 2);
        assert_eq!(out.failed, vec![KeywordId(2)]);
        let stored: Vec<KeywordId> = store.inner.all().iter().map(|p| p.keyword_id).collect();
        assert_eq!(stored, vec![KeywordId(1), KeywordId(3)]);
        assert_eq!(ctx.get(keys::NEW_POSTS).map(Vec::len), Some(2));
        assert_eq!(ctx.get(keys::POST_FAILED_IDS), Some(&vec![KeywordId(2)]));
        assert_eq!(counters.get(Counter::PostsCreated), 2);
        assert_eq!(counters.get(Counter::PostFailed), 1);
    }

    #[tokio::test]
    async fn hung_call_times_out_without_blocking_other_keywords() {
        let summarizer = SlowSummarizer::new(Some("멈춤"), Duration::ZERO);
        let store = InMemoryPostStore::new();
        let counters = PipelineCounters::new();
        let mut ctx = ctx_for(&["멈춤", "환율"]);

        let out = tokio::time::timeout(
            Duration::from_secs(5),
            generate_posts(&summarizer, &store, &settings(2), &counters, &scope(), &mut ctx),
        )
        .await
        .expect("step finishes despite the hung call")
        .unwrap();

        assert_eq!(out.created, 1);
        assert_eq!(out.failed, vec![KeywordId(1)]);
        // timeouts are retryable: every attempt was spent
        assert_eq!(summarizer.calls_for("멈춤"), 3);
        assert_eq!(summarizer.calls_for("환율"), 1);
        assert_eq!(store.all()[0].keyword_id, KeywordId(2));
    }

    #[tokio::test]
    async fn in_flight_calls_never_exceed_the_bound() {
        let summarizer = SlowSummarizer::new(None, Duration::from_millis(20));
        let store = InMemoryPostStore::new();
        let counters = PipelineCounters::new();
        let mut ctx = ctx_for(&["가", "나", "다", "라", "마", "바"]);

        let mut cfg = settings(2);
        cfg.call_timeout = Duration::from_secs(5);
        let out = generate_posts(&summarizer, &store, &cfg, &counters, &scope(), &mut ctx)
            .await
            .unwrap();

        assert_eq!(out.created, 6);
        assert_eq!(summarizer.peak.load(Ordering::SeqCst), 2);
        // outputs keep postable order whatever the completion order
        let ids: Vec<KeywordId> = ctx
            .get(keys::NEW_POSTS)
            .unwrap()
            .iter()
            .map(|p| p.keyword_id)
            .collect();
        assert_eq!(ids, (1..=6).map(KeywordId).collect::<Vec<_>>());
    }
}
