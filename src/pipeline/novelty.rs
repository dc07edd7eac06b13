//! # Novelty
//! Evaluator: decides per keyword whether its volume moved enough against its own
//! history to justify a new post. Decider: routes the run on the result.
//!
//! Signal: coefficient of variation (population std-dev / mean) of the volume
//! series made of the prior window plus the current sample. A keyword is postable
//! only when the signal is strictly above the threshold AND at least
//! `min_history` prior samples exist. Too little history is never read as novelty.

use serde::{Deserialize, Serialize};

use crate::metrics::{Counter, PipelineCounters};
use crate::pipeline::context::{keys, ExecutionContext, MissingContextKey};
use crate::pipeline::model::{KeywordId, KeywordMetricSample, NoveltyDecision, NoveltyReason, Platform};
use crate::pipeline::store::KeywordStore;
use crate::pipeline::{RunScope, StepError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoveltyPolicy {
    pub history_window: usize,
    pub min_history: usize,
    pub threshold: f64,
}

impl Default for NoveltyPolicy {
    fn default() -> Self {
        Self {
            history_window: 24,
            min_history: 3,
            threshold: 0.25,
        }
    }
}

/// Coefficient of variation; 0.0 for an empty or zero-mean series.
pub fn variation_signal(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    var.sqrt() / mean
}

/// Pure per-keyword decision.
pub fn evaluate_keyword(
    keyword_id: KeywordId,
    current: Option<&KeywordMetricSample>,
    prior: &[KeywordMetricSample],
    policy: &NoveltyPolicy,
) -> NoveltyDecision {
    let skipped = |reason| NoveltyDecision {
        keyword_id,
        is_postable: false,
        reason,
    };

    let Some(current) = current else {
        return skipped(NoveltyReason::MissingCurrentSample);
    };
    if prior.len() < policy.min_history {
        return skipped(NoveltyReason::InsufficientHistory {
            have: prior.len(),
            need: policy.min_history,
        });
    }

    let series: Vec<f64> = prior
        .iter()
        .take(policy.history_window)
        .map(|s| s.volume as f64)
        .chain(std::iter::once(current.volume as f64))
        .collect();
    let signal = variation_signal(&series);

    if signal <= policy.threshold {
        skipped(NoveltyReason::LowVariation {
            signal,
            threshold: policy.threshold,
        })
    } else {
        NoveltyDecision {
            keyword_id,
            is_postable: true,
            reason: NoveltyReason::Novel {
                signal,
                threshold: policy.threshold,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoveltyPartition {
    pub postable: Vec<KeywordId>,
    pub skipped: Vec<KeywordId>,
}

pub async fn evaluate_novelty(
    store: &dyn KeywordStore,
    policy: &NoveltyPolicy,
    counters: &PipelineCounters,
    scope: &RunScope,
    ctx: &mut ExecutionContext,
) -> Result<NoveltyPartition, StepError> {
    let eligible = ctx.require(keys::ELIGIBLE_IDS)?.clone();

    let mut decisions = Vec::with_capacity(eligible.len());
    let mut part = NoveltyPartition::default();
    for id in eligible {
        let current = store.sample_at(id, Platform::Trends, scope.bucket).await?;
        let prior = store
            .samples_before(id, Platform::Trends, scope.bucket, policy.history_window)
            .await?;
        let decision = evaluate_keyword(id, current.as_ref(), &prior, policy);

        tracing::debug!(target: "novelty", keyword_id = %id, reason = ?decision.reason, "evaluated");
        if decision.is_postable {
            part.postable.push(id);
        } else {
            part.skipped.push(id);
        }
        decisions.push(decision);
    }

    counters.add(Counter::LowVariation, part.skipped.len() as u64);
    tracing::info!(
        target: "novelty",
        run_key = %scope.run_key,
        postable = part.postable.len(),
        skipped = part.skipped.len(),
        "novelty evaluated"
    );

    ctx.insert(keys::NOVELTY_DECISIONS, decisions);
    ctx.insert(keys::POSTABLE_COUNT, part.postable.len());
    ctx.insert(keys::POSTABLE_IDS, part.postable.clone());
    ctx.insert(keys::SKIPPED_IDS, part.skipped.clone());
    Ok(part)
}

/// Branch taken after novelty evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    NoPostNeeded,
    GeneratePost,
}

/// Pure route choice; only the postable set matters.
pub fn decide(postable: &[KeywordId]) -> Route {
    if postable.is_empty() {
        Route::NoPostNeeded
    } else {
        Route::GeneratePost
    }
}

/// Novelty Decider node: reads `postable_ids`, writes the flag and the route.
pub fn apply_decider(ctx: &mut ExecutionContext) -> Result<Route, MissingContextKey> {
    let route = decide(ctx.require(keys::POSTABLE_IDS)?);
    ctx.insert(keys::NO_POST_NEEDED, route == Route::NoPostNeeded);
    ctx.insert(keys::ROUTE, route);
    Ok(route)
}

/// Counter update for the decider, done once the node has completed.
pub fn record_route(route: Route, counters: &PipelineCounters) {
    if route == Route::NoPostNeeded {
        counters.add(Counter::NoPostNeeded, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone, Utc};

    fn samples(vols: &[u64]) -> Vec<KeywordMetricSample> {
        let t0 = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        vols.iter()
            .enumerate()
            .map(|(i, v)| KeywordMetricSample {
                keyword_id: KeywordId(1),
                platform: Platform::Trends,
                bucket: t0 - TimeDelta::hours(i as i64 + 1),
                volume: *v,
                score: 50.0,
            })
            .collect()
    }

    fn current(v: u64) -> KeywordMetricSample {
        samples(&[v]).remove(0)
    }

    #[test]
    fn steady_history_is_low_variation() {
        let d = evaluate_keyword(KeywordId(1), Some(&current(120)), &samples(&[100, 102, 98]), &NoveltyPolicy::default());
        assert!(!d.is_postable);
        assert!(matches!(d.reason, NoveltyReason::LowVariation { .. }));
    }

    #[test]
    fn fivefold_jump_is_novel() {
        let d = evaluate_keyword(KeywordId(1), Some(&current(500)), &samples(&[100, 100, 100]), &NoveltyPolicy::default());
        assert!(d.is_postable);
    }

    #[test]
    fn short_history_is_never_postable_even_for_outliers() {
        let policy = NoveltyPolicy::default();
        for prior in [&[][..], &[1][..], &[1, 1][..]] {
            let d = evaluate_keyword(KeywordId(1), Some(&current(1_000_000)), &samples(prior), &policy);
            assert!(!d.is_postable);
            assert_eq!(
                d.reason,
                NoveltyReason::InsufficientHistory {
                    have: prior.len(),
                    need: 3
                }
            );
        }
    }

    #[test]
    fn missing_current_sample_is_skipped() {
        let d = evaluate_keyword(KeywordId(1), None, &samples(&[1, 500, 2]), &NoveltyPolicy::default());
        assert_eq!(d.reason, NoveltyReason::MissingCurrentSample);
    }

    #[test]
    fn signal_at_threshold_is_low_variation() {
        // [1, 3] -> mean 2, std 1, cv 0.5
        assert!((variation_signal(&[1.0, 3.0]) - 0.5).abs() < 1e-12);
        let policy = NoveltyPolicy {
            history_window: 24,
            min_history: 1,
            threshold: 0.5,
        };
        let d = evaluate_keyword(KeywordId(1), Some(&current(3)), &samples(&[1]), &policy);
        assert!(!d.is_postable);
        assert_eq!(variation_signal(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn decider_routes_on_postable_only() {
        let mut ctx = ExecutionContext::new();
        ctx.insert(keys::POSTABLE_IDS, vec![]);
        ctx.insert(keys::SKIPPED_IDS, vec![KeywordId(1), KeywordId(2)]);
        assert_eq!(apply_decider(&mut ctx).unwrap(), Route::NoPostNeeded);
        assert_eq!(ctx.get(keys::NO_POST_NEEDED), Some(&true));

        ctx.insert(keys::POSTABLE_IDS, vec![KeywordId(3)]);
        for _ in 0..3 {
            assert_eq!(apply_decider(&mut ctx).unwrap(), Route::GeneratePost);
            assert_eq!(ctx.get(keys::NO_POST_NEEDED), Some(&false));
            assert_eq!(ctx.get(keys::ROUTE), Some(&Route::GeneratePost));
        }
    }

    #[test]
    fn decider_requires_postable_ids() {
        let mut ctx = ExecutionContext::new();
        assert!(apply_decider(&mut ctx).is_err());
    }
}
