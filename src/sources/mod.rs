// src/sources/mod.rs
//! Trend and search adapters. Each adapter reports failures as classified
//! [`ExternalCallOutcome`]s; retrying is the caller's business.

pub mod google_trends;
pub mod naver_news;
pub mod youtube;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::external::ExternalCallOutcome;
use crate::pipeline::model::Platform;

/// One entry of the trending list, in rank order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendItem {
    pub text: String,
    pub volume: u64,
}

/// One search hit before it is attached to a keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceItem {
    pub url: String,
    pub title: String,
    pub excerpt: Option<String>,
    pub thumbnail: Option<String>,
}

#[async_trait]
pub trait TrendSource: Send + Sync {
    async fn fetch_trending_keywords(&self) -> Result<Vec<TrendItem>, ExternalCallOutcome>;
    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait SearchSource: Send + Sync {
    /// At most `max_count` hits, most relevant first.
    async fn fetch_sources(&self, keyword: &str, max_count: usize) -> Result<Vec<SourceItem>, ExternalCallOutcome>;
    fn platform(&self) -> Platform;
    fn name(&self) -> &'static str;
}

/// Normalize vendor text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    static RE_WS: OnceCell<Regex> = OnceCell::new();

    let mut out = html_escape::decode_html_entities(s).to_string();

    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("static regex"));
    out = re_tags.replace_all(&out, "").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("static regex"));
    re_ws.replace_all(&out, " ").trim().to_string()
}
