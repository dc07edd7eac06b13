use std::time::Duration;

use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::external::http::{self, no_error_body};
use crate::external::ExternalCallOutcome;
use crate::sources::{normalize_text, TrendItem, TrendSource};

const VENDOR: &str = "google_trends";
const DEFAULT_FEED: &str = "https://trends.google.com/trending/rss";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    approx_traffic: Option<String>,
}

/// Trend Source Adapter over the Google Trends "trending now" RSS feed.
pub struct GoogleTrendsSource {
    mode: Mode,
    max_keywords: usize,
}

enum Mode {
    Fixture(String),
    Http {
        url: String,
        client: reqwest::Client,
        timeout: Duration,
    },
}

impl GoogleTrendsSource {
    /// Live feed for a region code such as `"KR"`.
    pub fn for_geo(geo: &str, max_keywords: usize, timeout: Duration) -> Self {
        Self {
            mode: Mode::Http {
                url: format!("{DEFAULT_FEED}?geo={}", geo.trim().to_ascii_uppercase()),
                client: http::build_client(Duration::from_secs(4)),
                timeout,
            },
            max_keywords,
        }
    }

    /// Serve a fixed feed body; used by tests and offline runs.
    pub fn from_fixture(xml: &str, max_keywords: usize) -> Self {
        Self {
            mode: Mode::Fixture(xml.to_string()),
            max_keywords,
        }
    }

    fn parse_feed(&self, xml: &str) -> Result<Vec<TrendItem>, ExternalCallOutcome> {
        let rss: Rss = from_str(&scrub_namespaces(xml))
            .map_err(|e| ExternalCallOutcome::invalid_body(VENDOR, 200, e))?;

        Ok(rss
            .channel
            .item
            .into_iter()
            .filter_map(|it| {
                let text = normalize_text(it.title.as_deref().unwrap_or_default());
                if text.is_empty() {
                    return None;
                }
                let volume = it.approx_traffic.as_deref().map(parse_traffic).unwrap_or(0);
                Some(TrendItem { text, volume })
            })
            .take(self.max_keywords)
            .collect())
    }
}

#[async_trait]
impl TrendSource for GoogleTrendsSource {
    async fn fetch_trending_keywords(&self) -> Result<Vec<TrendItem>, ExternalCallOutcome> {
        match &self.mode {
            Mode::Fixture(xml) => self.parse_feed(xml),
            Mode::Http {
                url,
                client,
                timeout,
            } => {
                let resp = http::send(VENDOR, client.get(url), *timeout, no_error_body).await?;
                let body = http::read_text(VENDOR, resp).await?;
                self.parse_feed(&body)
            }
        }
    }

    fn name(&self) -> &'static str {
        VENDOR
    }
}

/// The feed puts traffic under the `ht:` namespace; flatten it so serde sees a plain field.
fn scrub_namespaces(xml: &str) -> String {
    xml.replace("<ht:approx_traffic>", "<approx_traffic>")
        .replace("</ht:approx_traffic>", "</approx_traffic>")
}

/// `"20,000+"` → 20000, `"2K+"` → 2000, `"1.5M+"` → 1500000. Unreadable → 0.
pub fn parse_traffic(s: &str) -> u64 {
    let cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, ',' | '+') && !c.is_whitespace())
        .collect();
    let (num, mult) = match cleaned.chars().last() {
        Some('K') | Some('k') => (&cleaned[..cleaned.len() - 1], 1_000.0),
        Some('M') | Some('m') => (&cleaned[..cleaned.len() - 1], 1_000_000.0),
        _ => (cleaned.as_str(), 1.0),
    };
    num.parse::<f64>()
        .map(|n| (n * mult).round().max(0.0) as u64)
        .unwrap_or(0)
}
