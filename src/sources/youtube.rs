use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::external::http;
use crate::external::ExternalCallOutcome;
use crate::pipeline::model::Platform;
use crate::sources::{normalize_text, SearchSource, SourceItem};

const VENDOR: &str = "youtube";
const ENDPOINT: &str = "https://www.googleapis.com/youtube/v3/search";
const MAX_RESULTS: usize = 50;

#[derive(Debug, Deserialize)]
struct SearchResp {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    id: VideoId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
struct VideoId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    high: Option<Thumb>,
    medium: Option<Thumb>,
    default: Option<Thumb>,
}

#[derive(Debug, Deserialize)]
struct Thumb {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    reason: Option<String>,
}

/// Video Search Adapter over the YouTube Data API v3.
pub struct YoutubeSource {
    client: reqwest::Client,
    api_key: String,
    timeout: Duration,
}

impl YoutubeSource {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self {
            client: http::build_client(Duration::from_secs(4)),
            api_key,
            timeout,
        }
    }

    /// Key from `YOUTUBE_API_KEY`; empty when unset.
    pub fn from_env(timeout: Duration) -> Self {
        Self::new(std::env::var("YOUTUBE_API_KEY").unwrap_or_default(), timeout)
    }
}

#[async_trait]
impl SearchSource for YoutubeSource {
    async fn fetch_sources(&self, keyword: &str, max_count: usize) -> Result<Vec<SourceItem>, ExternalCallOutcome> {
        let max_results = max_count.clamp(1, MAX_RESULTS).to_string();
        let req = self.client.get(ENDPOINT).query(&[
            ("part", "snippet"),
            ("type", "video"),
            ("order", "relevance"),
            ("q", keyword),
            ("maxResults", max_results.as_str()),
            ("key", self.api_key.as_str()),
        ]);

        let resp = http::send(VENDOR, req, self.timeout, parse_error_body).await?;
        let body: SearchResp = http::read_json(VENDOR, resp).await?;
        Ok(to_sources(body, max_count))
    }

    fn platform(&self) -> Platform {
        Platform::Video
    }

    fn name(&self) -> &'static str {
        VENDOR
    }
}

fn to_sources(body: SearchResp, max_count: usize) -> Vec<SourceItem> {
    body.items
        .into_iter()
        .filter_map(|it| {
            let video_id = it.id.video_id?;
            let title = normalize_text(&it.snippet.title);
            if title.is_empty() {
                return None;
            }
            let t = it.snippet.thumbnails;
            let thumbnail = t.high.or(t.medium).or(t.default).map(|th| th.url);
            Some(SourceItem {
                url: format!("https://www.youtube.com/watch?v={video_id}"),
                title,
                excerpt: Some(normalize_text(&it.snippet.description)).filter(|d| !d.is_empty()),
                thumbnail,
            })
        })
        .take(max_count)
        .collect()
}

fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => {
            let reason = env.error.errors.into_iter().find_map(|d| d.reason);
            (reason, env.error.message)
        }
        Err(_) => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::classify;

    #[test]
    fn channel_hits_are_skipped() {
        let body: SearchResp = serde_json::from_str(
            r#"{"items":[
                {"id":{"kind":"youtube#channel","channelId":"c1"},"snippet":{"title":"Channel"}},
                {"id":{"kind":"youtube#video","videoId":"abc"},"snippet":{"title":"보조금 &amp; 세금","description":"","thumbnails":{"medium":{"url":"https://i.ytimg.com/m.jpg"},"default":{"url":"https://i.ytimg.com/d.jpg"}}}}
            ]}"#,
        )
        .unwrap();
        let out = to_sources(body, 10);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].url, "https://www.youtube.com/watch?v=abc");
        assert_eq!(out[0].title, "보조금 & 세금");
        assert_eq!(out[0].thumbnail.as_deref(), Some("https://i.ytimg.com/m.jpg"));
    }

    #[test]
    fn quota_error_classifies_terminal_with_reason() {
        let (code, msg) = parse_error_body(
            r#"{"error":{"code":403,"message":"The request cannot be completed because you have exceeded your quota.","errors":[{"reason":"quotaExceeded"}]}}"#,
        );
        let out = classify(VENDOR, 403, code.as_deref(), msg.as_deref());
        assert!(!out.is_retryable());
        assert!(out.message.starts_with("[quotaExceeded] The request"));
    }
}
