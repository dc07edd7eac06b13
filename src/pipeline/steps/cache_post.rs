//! Cache-Post: publish what the serving cache should show after this run.
//!
//! Postable keywords get their fresh post. Every keyword without one (skipped, or
//! postable but failed to generate) gets its previously cached post written back
//! unchanged. A keyword with neither stays absent.

use std::collections::HashMap;

use crate::metrics::PipelineCounters;
use crate::pipeline::context::{keys, ExecutionContext};
use crate::pipeline::model::{GeneratedPost, KeywordId};
use crate::pipeline::novelty::Route;
use crate::pipeline::store::PostCache;
use crate::pipeline::{RunScope, StepError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSummary {
    pub fresh: usize,
    pub carried: usize,
    pub absent: usize,
}

impl CacheSummary {
    pub fn written(&self) -> usize {
        self.fresh + self.carried
    }
}

pub async fn cache_posts(
    cache: &dyn PostCache,
    counters: &PipelineCounters,
    scope: &RunScope,
    ctx: &mut ExecutionContext,
) -> Result<CacheSummary, StepError> {
    let route = *ctx.require(keys::ROUTE)?;
    let mut fresh: HashMap<KeywordId, GeneratedPost> = match route {
        Route::GeneratePost => ctx
            .require(keys::NEW_POSTS)?
            .iter()
            .map(|p| (p.keyword_id, p.clone()))
            .collect(),
        Route::NoPostNeeded => HashMap::new(),
    };

    let ids: Vec<KeywordId> = ctx
        .require(keys::POSTABLE_IDS)?
        .iter()
        .chain(ctx.require(keys::SKIPPED_IDS)?.iter())
        .copied()
        .collect();

    let mut summary = CacheSummary::default();
    let mut cached = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(post) = fresh.remove(&id) {
            cache.put(id, post).await?;
            summary.fresh += 1;
            cached.push(id);
            continue;
        }
        match cache.get(id).await? {
            Some(prior) => {
                cache.put(id, prior).await?;
                summary.carried += 1;
                cached.push(id);
            }
            None => {
                tracing::debug!(target: "cache_post", keyword_id = %id, "no post to cache");
                summary.absent += 1;
            }
        }
    }

    counters.set_cache_entries(summary.written() as u64);
    tracing::info!(
        target: "cache_post",
        run_key = %scope.run_key,
        fresh = summary.fresh,
        carried = summary.carried,
        absent = summary.absent,
        "serving cache updated"
    );

    ctx.insert(keys::CACHE_SIZE, summary.written());
    ctx.insert(keys::CACHED_IDS, cached);
    Ok(summary)
}
