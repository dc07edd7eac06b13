use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::external::http;
use crate::external::ExternalCallOutcome;
use crate::pipeline::model::Platform;
use crate::sources::{normalize_text, SearchSource, SourceItem};

const VENDOR: &str = "naver_news";
const ENDPOINT: &str = "https://openapi.naver.com/v1/search/news.json";
/// Naver rejects `display` above 100.
const MAX_DISPLAY: usize = 100;

#[derive(Debug, Deserialize)]
struct SearchResp {
    #[serde(default)]
    items: Vec<NewsItem>,
}

#[derive(Debug, Deserialize)]
struct NewsItem {
    title: String,
    #[serde(default)]
    originallink: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct NaverError {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

/// News Search Adapter over the Naver search API.
pub struct NaverNewsSource {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    timeout: Duration,
}

impl NaverNewsSource {
    pub fn new(client_id: String, client_secret: String, timeout: Duration) -> Self {
        Self {
            client: http::build_client(Duration::from_secs(4)),
            client_id,
            client_secret,
            timeout,
        }
    }

    /// Credentials from `NAVER_CLIENT_ID` / `NAVER_CLIENT_SECRET`; empty when unset.
    pub fn from_env(timeout: Duration) -> Self {
        Self::new(
            std::env::var("NAVER_CLIENT_ID").unwrap_or_default(),
            std::env::var("NAVER_CLIENT_SECRET").unwrap_or_default(),
            timeout,
        )
    }
}

#[async_trait]
impl SearchSource for NaverNewsSource {
    async fn fetch_sources(&self, keyword: &str, max_count: usize) -> Result<Vec<SourceItem>, ExternalCallOutcome> {
        let display = max_count.clamp(1, MAX_DISPLAY).to_string();
        let req = self
            .client
            .get(ENDPOINT)
            .header("X-Naver-Client-Id", &self.client_id)
            .header("X-Naver-Client-Secret", &self.client_secret)
            .query(&[("query", keyword), ("display", display.as_str()), ("sort", "sim")]);

        let resp = http::send(VENDOR, req, self.timeout, parse_error_body).await?;
        let body: SearchResp = http::read_json(VENDOR, resp).await?;
        Ok(to_sources(body, max_count))
    }

    fn platform(&self) -> Platform {
        Platform::News
    }

    fn name(&self) -> &'static str {
        VENDOR
    }
}

fn to_sources(body: SearchResp, max_count: usize) -> Vec<SourceItem> {
    body.items
        .into_iter()
        .filter_map(|it| {
            let url = if it.originallink.is_empty() { it.link } else { it.originallink };
            let title = normalize_text(&it.title);
            if url.is_empty() || title.is_empty() {
                return None;
            }
            let excerpt = Some(normalize_text(&it.description)).filter(|d| !d.is_empty());
            Some(SourceItem {
                url,
                title,
                excerpt,
                thumbnail: None,
            })
        })
        .take(max_count)
        .collect()
}

fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    serde_json::from_str::<NaverError>(body)
        .map(|e| (e.error_code, e.error_message))
        .unwrap_or((None, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_are_cleaned_and_capped() {
        let body: SearchResp = serde_json::from_str(
            r#"{"items":[
                {"title":"<b>보조금</b> 확대","originallink":"https://a.example/1","link":"https://n.example/1","description":"정부가 &quot;지원&quot;"},
                {"title":"","originallink":"https://a.example/2","link":"","description":""},
                {"title":"둘째","originallink":"","link":"https://n.example/3","description":""},
                {"title":"셋째","originallink":"https://a.example/4","link":"","description":""}
            ]}"#,
        )
        .unwrap();
        let out = to_sources(body, 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].title, "보조금 확대");
        assert_eq!(out[0].url, "https://a.example/1");
        assert_eq!(out[0].excerpt.as_deref(), Some(r#"정부가 "지원""#));
        assert_eq!(out[1].url, "https://n.example/3");
        assert_eq!(out[1].excerpt, None);
    }

    #[test]
    fn error_body_yields_code_and_message() {
        let (code, msg) = parse_error_body(r#"{"errorMessage":"Rate limit exceeded.","errorCode":"012"}"#);
        assert_eq!(code.as_deref(), Some("012"));
        assert_eq!(msg.as_deref(), Some("Rate limit exceeded."));
        assert_eq!(parse_error_body("<html>"), (None, None));
    }
}
