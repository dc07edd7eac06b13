//! # Execution context
//! Per-run value store shared by all steps of one [`JobRun`](super::orchestrator::JobRun).
//!
//! Keys are typed: a [`ContextKey<T>`] can only store and return a `T`, so a step
//! cannot read a value under the wrong shape. Values are only ever inserted or
//! overwritten, never removed while the run is alive. Reading a key that has not
//! been written yet is reported as [`MissingContextKey`] instead of yielding a default.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::marker::PhantomData;

use crate::pipeline::model::{
    GeneratedPost, Keyword, KeywordId, NoveltyDecision, PostId, SourceCandidate, TrendKeyword,
};
use crate::pipeline::novelty::Route;

/// Typed name of one context entry.
pub struct ContextKey<T> {
    name: &'static str,
    _ty: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _ty: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextKey({})", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("execution context key `{0}` read before it was written")]
pub struct MissingContextKey(pub &'static str);

#[derive(Default)]
pub struct ExecutionContext {
    values: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the value under `key`.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: ContextKey<T>, value: T) {
        self.values.insert(key.name, Box::new(value));
    }

    pub fn get<T: Any>(&self, key: ContextKey<T>) -> Option<&T> {
        self.values.get(key.name).and_then(|v| v.downcast_ref::<T>())
    }

    /// Like [`get`](Self::get) but treats absence as a contract violation.
    pub fn require<T: Any>(&self, key: ContextKey<T>) -> Result<&T, MissingContextKey> {
        self.get(key).ok_or(MissingContextKey(key.name))
    }

    pub fn contains<T>(&self, key: ContextKey<T>) -> bool {
        self.values.contains_key(key.name)
    }

    /// Names of every key written so far, sorted.
    pub fn written_keys(&self) -> BTreeSet<&'static str> {
        self.values.keys().copied().collect()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("keys", &self.written_keys())
            .finish()
    }
}

pub type SourceMap = HashMap<KeywordId, Vec<SourceCandidate>>;

/// Well-known keys, grouped by the step that writes them.
pub mod keys {
    use super::*;

    // Fetch-Keywords
    pub const CANDIDATES: ContextKey<Vec<Keyword>> = ContextKey::new("candidates");
    pub const CANDIDATE_IDS: ContextKey<Vec<KeywordId>> = ContextKey::new("candidate_ids");
    pub const TRENDING: ContextKey<Vec<TrendKeyword>> = ContextKey::new("trending");
    pub const CANDIDATE_COUNT: ContextKey<usize> = ContextKey::new("candidate_count");

    // Search-Sources: the news and video branches own disjoint keys.
    pub const NEWS_SOURCES: ContextKey<SourceMap> = ContextKey::new("news_sources");
    pub const NEWS_FAILED_IDS: ContextKey<Vec<KeywordId>> = ContextKey::new("news_failed_ids");
    pub const VIDEO_SOURCES: ContextKey<SourceMap> = ContextKey::new("video_sources");
    pub const VIDEO_FAILED_IDS: ContextKey<Vec<KeywordId>> = ContextKey::new("video_failed_ids");
    pub const ELIGIBLE_IDS: ContextKey<Vec<KeywordId>> = ContextKey::new("eligible_ids");

    // Novelty Evaluator
    pub const NOVELTY_DECISIONS: ContextKey<Vec<NoveltyDecision>> = ContextKey::new("novelty_decisions");
    pub const POSTABLE_IDS: ContextKey<Vec<KeywordId>> = ContextKey::new("postable_ids");
    pub const POSTABLE_COUNT: ContextKey<usize> = ContextKey::new("postable_count");
    pub const SKIPPED_IDS: ContextKey<Vec<KeywordId>> = ContextKey::new("skipped_ids");

    // Novelty Decider
    pub const NO_POST_NEEDED: ContextKey<bool> = ContextKey::new("no_post_needed");
    pub const ROUTE: ContextKey<Route> = ContextKey::new("route");

    // Generate-Post
    pub const NEW_POSTS: ContextKey<Vec<GeneratedPost>> = ContextKey::new("new_posts");
    pub const NEW_POST_IDS: ContextKey<Vec<PostId>> = ContextKey::new("new_post_ids");
    pub const CREATED_POST_COUNT: ContextKey<usize> = ContextKey::new("created_post_count");
    pub const POST_FAILED_IDS: ContextKey<Vec<KeywordId>> = ContextKey::new("post_failed_ids");

    // Cache-Post
    pub const CACHED_IDS: ContextKey<Vec<KeywordId>> = ContextKey::new("cached_ids");
    pub const CACHE_SIZE: ContextKey<usize> = ContextKey::new("cache_size");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_roundtrip_and_overwrite() {
        let mut ctx = ExecutionContext::new();
        assert!(!ctx.contains(keys::CANDIDATE_COUNT));
        ctx.insert(keys::CANDIDATE_COUNT, 3);
        ctx.insert(keys::CANDIDATE_COUNT, 4);
        assert_eq!(ctx.get(keys::CANDIDATE_COUNT), Some(&4));
    }

    #[test]
    fn missing_key_is_an_error() {
        let ctx = ExecutionContext::new();
        let err = ctx.require(keys::POSTABLE_IDS).unwrap_err();
        assert_eq!(err, MissingContextKey("postable_ids"));
    }

    #[test]
    fn written_keys_are_listed() {
        let mut ctx = ExecutionContext::new();
        ctx.insert(keys::NO_POST_NEEDED, true);
        ctx.insert(keys::CANDIDATE_IDS, vec![KeywordId(1)]);
        let names: Vec<_> = ctx.written_keys().into_iter().collect();
        assert_eq!(names, vec!["candidate_ids", "no_post_needed"]);
    }
}
