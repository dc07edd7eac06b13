//! Domain records flowing through one pipeline run.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned by the keyword store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeywordId(pub u64);

impl fmt::Display for KeywordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kw#{}", self.0)
    }
}

/// A keyword record resolved (or created) by the keyword store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub id: KeywordId,
    pub text: String,
}

/// One trending keyword observed for a bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendKeyword {
    pub keyword_id: KeywordId,
    pub text: String,
    pub volume: u64,
    /// Rank-derived score in `[0, 100]`.
    pub score: f64,
    pub bucket: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Trends,
    News,
    Video,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Trends => "trends",
            Platform::News => "news",
            Platform::Video => "video",
        }
    }
}

/// One hourly observation of a keyword. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordMetricSample {
    pub keyword_id: KeywordId,
    pub platform: Platform,
    pub bucket: DateTime<Utc>,
    pub volume: u64,
    pub score: f64,
}

/// A news article or video found for a keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCandidate {
    pub keyword_id: KeywordId,
    pub platform: Platform,
    pub url: String,
    pub title: String,
    pub excerpt: Option<String>,
    pub thumbnail: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoveltyReason {
    /// Fewer prior samples than required; never postable.
    InsufficientHistory { have: usize, need: usize },
    /// No sample was recorded for the current bucket.
    MissingCurrentSample,
    LowVariation { signal: f64, threshold: f64 },
    Novel { signal: f64, threshold: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoveltyDecision {
    pub keyword_id: KeywordId,
    pub is_postable: bool,
    pub reason: NoveltyReason,
}

/// AI vendor that produced a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiVendor {
    OpenAi,
    Claude,
    Mock,
}

impl AiVendor {
    pub fn as_str(self) -> &'static str {
        match self {
            AiVendor::OpenAi => "openai",
            AiVendor::Claude => "claude",
            AiVendor::Mock => "mock",
        }
    }

    /// Case-insensitive parse of a configured vendor name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(AiVendor::OpenAi),
            "claude" | "anthropic" => Some(AiVendor::Claude),
            "mock" => Some(AiVendor::Mock),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PostId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedPost {
    pub id: PostId,
    pub keyword_id: KeywordId,
    pub title: String,
    pub body: String,
    pub vendor: AiVendor,
    pub created_at: DateTime<Utc>,
}

/// Truncate `ts` to the start of its hour.
pub fn hour_bucket(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::hours(1)).unwrap_or(ts)
}

/// Key used to deduplicate trending keywords within a run.
pub fn keyword_dedup_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
