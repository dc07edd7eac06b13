//! Fetch-Keywords: one trend fetch, keyword resolution, one sample per keyword.
//! Mandatory: no trending keywords means no run.

use std::collections::HashSet;

use crate::external::{with_retry, RetryPolicy};
use crate::pipeline::context::{keys, ExecutionContext};
use crate::pipeline::model::{keyword_dedup_key, KeywordMetricSample, Platform, TrendKeyword};
use crate::pipeline::store::KeywordStore;
use crate::pipeline::{RunScope, StepError};
use crate::sources::{TrendItem, TrendSource};

/// Rank-derived score in `[0, 100]`: first place scores 100.
pub fn rank_score(rank: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * (total.saturating_sub(rank)) as f64 / total as f64
}

/// Keep the first occurrence of each normalized text, preserving rank order.
pub fn dedup_trending(items: Vec<TrendItem>) -> Vec<TrendItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|it| {
            let key = keyword_dedup_key(&it.text);
            !key.is_empty() && seen.insert(key)
        })
        .collect()
}

/// Returns the number of candidate keywords written to the context.
pub async fn fetch_keywords(
    trend: &dyn TrendSource,
    store: &dyn KeywordStore,
    retry: &RetryPolicy,
    scope: &RunScope,
    ctx: &mut ExecutionContext,
) -> Result<usize, StepError> {
    let raw = with_retry(retry, trend.name(), |_| trend.fetch_trending_keywords()).await?;
    let raw_len = raw.len();
    let items = dedup_trending(raw);
    if items.is_empty() {
        return Err(StepError::EmptyTrendResult);
    }

    let total = items.len();
    let mut candidates = Vec::with_capacity(total);
    let mut trending = Vec::with_capacity(total);
    let mut seen_ids = HashSet::new();
    for (rank, item) in items.into_iter().enumerate() {
        let kw = store.resolve_or_create(&item.text).await?;
        if !seen_ids.insert(kw.id) {
            continue;
        }
        let score = rank_score(rank, total);
        store
            .record_sample(KeywordMetricSample {
                keyword_id: kw.id,
                platform: Platform::Trends,
                bucket: scope.bucket,
                volume: item.volume,
                score,
            })
            .await?;
        trending.push(TrendKeyword {
            keyword_id: kw.id,
            text: item.text,
            volume: item.volume,
            score,
            bucket: scope.bucket,
        });
        candidates.push(kw);
    }

    tracing::info!(
        target: "fetch_keywords",
        run_key = %scope.run_key,
        fetched = raw_len,
        candidates = candidates.len(),
        "trending keywords resolved"
    );

    let ids: Vec<_> = candidates.iter().map(|k| k.id).collect();
    let count = ids.len();
    ctx.insert(keys::TRENDING, trending);
    ctx.insert(keys::CANDIDATES, candidates);
    ctx.insert(keys::CANDIDATE_IDS, ids);
    ctx.insert(keys::CANDIDATE_COUNT, count);
    Ok(count)
}
