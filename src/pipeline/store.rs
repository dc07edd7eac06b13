//! Persistence collaborators the pipeline talks to, plus in-memory versions used by
//! the binary and tests. The relational schema behind them lives elsewhere.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::pipeline::model::{
    keyword_dedup_key, AiVendor, GeneratedPost, Keyword, KeywordId, KeywordMetricSample, Platform,
    PostId,
};

#[async_trait]
pub trait KeywordStore: Send + Sync {
    /// Find the keyword with the same normalized text, or create it.
    async fn resolve_or_create(&self, text: &str) -> Result<Keyword>;

    /// Record one sample. A sample already stored for the same
    /// keyword/platform/bucket is kept as is.
    async fn record_sample(&self, sample: KeywordMetricSample) -> Result<()>;

    async fn sample_at(
        &self,
        id: KeywordId,
        platform: Platform,
        bucket: DateTime<Utc>,
    ) -> Result<Option<KeywordMetricSample>>;

    /// Up to `limit` samples strictly older than `bucket`, most recent first.
    async fn samples_before(
        &self,
        id: KeywordId,
        platform: Platform,
        bucket: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<KeywordMetricSample>>;
}

/// Fields of a post before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub keyword_id: KeywordId,
    pub title: String,
    pub body: String,
    pub vendor: AiVendor,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn create(&self, post: NewPost) -> Result<GeneratedPost>;
}

/// Serving cache read by the public read path.
#[async_trait]
pub trait PostCache: Send + Sync {
    async fn get(&self, id: KeywordId) -> Result<Option<GeneratedPost>>;
    async fn put(&self, id: KeywordId, post: GeneratedPost) -> Result<()>;
}

// ------------------------------------------------------------
// In-memory implementations
// ------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryKeywordStore {
    inner: Mutex<KeywordTables>,
}

#[derive(Default)]
struct KeywordTables {
    next_id: u64,
    by_key: HashMap<String, Keyword>,
    samples: HashMap<(KeywordId, Platform), BTreeMap<DateTime<Utc>, KeywordMetricSample>>,
}

impl InMemoryKeywordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, KeywordTables>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("keyword store mutex poisoned"))
    }
}

#[async_trait]
impl KeywordStore for InMemoryKeywordStore {
    async fn resolve_or_create(&self, text: &str) -> Result<Keyword> {
        let key = keyword_dedup_key(text);
        if key.is_empty() {
            return Err(anyhow!("empty keyword text"));
        }
        let mut t = self.lock()?;
        if let Some(k) = t.by_key.get(&key) {
            return Ok(k.clone());
        }
        t.next_id += 1;
        let kw = Keyword {
            id: KeywordId(t.next_id),
            text: text.trim().to_string(),
        };
        t.by_key.insert(key, kw.clone());
        Ok(kw)
    }

    async fn record_sample(&self, sample: KeywordMetricSample) -> Result<()> {
        let mut t = self.lock()?;
        t.samples
            .entry((sample.keyword_id, sample.platform))
            .or_default()
            .entry(sample.bucket)
            .or_insert(sample);
        Ok(())
    }

    async fn sample_at(
        &self,
        id: KeywordId,
        platform: Platform,
        bucket: DateTime<Utc>,
    ) -> Result<Option<KeywordMetricSample>> {
        let t = self.lock()?;
        Ok(t.samples
            .get(&(id, platform))
            .and_then(|series| series.get(&bucket))
            .cloned())
    }

    async fn samples_before(
        &self,
        id: KeywordId,
        platform: Platform,
        bucket: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<KeywordMetricSample>> {
        let t = self.lock()?;
        Ok(t.samples
            .get(&(id, platform))
            .map(|series| {
                series
                    .range(..bucket)
                    .rev()
                    .take(limit)
                    .map(|(_, s)| s.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryPostStore {
    inner: Mutex<(u64, Vec<GeneratedPost>)>,
}

impl InMemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<GeneratedPost> {
        self.inner
            .lock()
            .map(|g| g.1.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PostStore for InMemoryPostStore {
    async fn create(&self, post: NewPost) -> Result<GeneratedPost> {
        let mut g = self
            .inner
            .lock()
            .map_err(|_| anyhow!("post store mutex poisoned"))?;
        g.0 += 1;
        let created = GeneratedPost {
            id: PostId(g.0),
            keyword_id: post.keyword_id,
            title: post.title,
            body: post.body,
            vendor: post.vendor,
            created_at: post.created_at,
        };
        g.1.push(created.clone());
        Ok(created)
    }
}

#[derive(Default)]
pub struct InMemoryPostCache {
    inner: Mutex<HashMap<KeywordId, GeneratedPost>>,
}

impl InMemoryPostCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PostCache for InMemoryPostCache {
    async fn get(&self, id: KeywordId) -> Result<Option<GeneratedPost>> {
        let g = self
            .inner
            .lock()
            .map_err(|_| anyhow!("post cache mutex poisoned"))?;
        Ok(g.get(&id).cloned())
    }

    async fn put(&self, id: KeywordId, post: GeneratedPost) -> Result<()> {
        let mut g = self
            .inner
            .lock()
            .map_err(|_| anyhow!("post cache mutex poisoned"))?;
        g.insert(id, post);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn sample(id: KeywordId, bucket: DateTime<Utc>, volume: u64) -> KeywordMetricSample {
        KeywordMetricSample {
            keyword_id: id,
            platform: Platform::Trends,
            bucket,
            volume,
            score: 0.0,
        }
    }

    #[tokio::test]
    async fn resolve_reuses_normalized_text() {
        let store = InMemoryKeywordStore::new();
        let a = store.resolve_or_create("Apple  Event").await.unwrap();
        let b = store.resolve_or_create(" apple event ").await.unwrap();
        assert_eq!(a.id, b.id);
        assert!(store.resolve_or_create("   ").await.is_err());
    }

    #[tokio::test]
    async fn samples_are_immutable_and_windowed() {
        let store = InMemoryKeywordStore::new();
        let id = KeywordId(7);
        let t0 = Utc.with_ymd_and_hms(2026, 10, 16, 0, 0, 0).unwrap();
        for h in 0..5 {
            store
                .record_sample(sample(id, t0 + TimeDelta::hours(h), 100 + h as u64))
                .await
                .unwrap();
        }
        // second write for the same bucket is ignored
        store.record_sample(sample(id, t0, 9_999)).await.unwrap();
        let first = store.sample_at(id, Platform::Trends, t0).await.unwrap().unwrap();
        assert_eq!(first.volume, 100);

        let prior = store
            .samples_before(id, Platform::Trends, t0 + TimeDelta::hours(4), 3)
            .await
            .unwrap();
        let vols: Vec<u64> = prior.iter().map(|s| s.volume).collect();
        assert_eq!(vols, vec![103, 102, 101]);
    }
}
