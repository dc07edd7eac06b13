// src/ai/mod.rs
//! AI summarizer: vendor abstraction + strict response parsing + factory.
//!
//! The pipeline only sees [`Summarizer`] and the normalized [`Summary`]; vendor
//! request/response shapes stay inside `openai.rs` / `claude.rs`.

pub mod claude;
pub mod openai;
pub mod parse;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ai::AiConfig;
use crate::external::{Classified, ExternalCallOutcome};
use crate::pipeline::model::AiVendor;

pub use parse::parse_summary;

/// Normalized summarizer answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub title: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SummarizeError {
    /// The vendor call itself failed; retry policy follows the classification.
    #[error(transparent)]
    Call(#[from] ExternalCallOutcome),
    /// The vendor answered, but not with exactly one `{title, summary}` object.
    /// Never retried.
    #[error("malformed {vendor} response: {detail}")]
    Malformed { vendor: &'static str, detail: String },
}

impl Classified for SummarizeError {
    fn outcome(&self) -> Option<&ExternalCallOutcome> {
        match self {
            SummarizeError::Call(o) => Some(o),
            SummarizeError::Malformed { .. } => None,
        }
    }
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize assembled source text into one title and one summary.
    async fn summarize(&self, content: &str) -> Result<Summary, SummarizeError>;
    fn vendor(&self) -> AiVendor;
}

pub type DynSummarizer = Arc<dyn Summarizer>;

/// Instructions shared by every vendor adapter.
pub const SYSTEM_PROMPT: &str = "You write short news digest posts about a trending keyword. \
Use only the provided sources. Answer in the language of the sources. \
Respond with exactly one JSON object and nothing else: \
{\"title\": \"<headline, at most 80 characters>\", \"summary\": \"<3-5 sentence neutral summary>\"}";

/// Deterministic summarizer for tests and local runs (`AI_TEST_MODE=mock`).
#[derive(Debug, Clone, Default)]
pub struct MockSummarizer;

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, content: &str) -> Result<Summary, SummarizeError> {
        let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());
        let title = lines.next().unwrap_or("Trending now").to_string();
        let summary: String = lines.collect::<Vec<_>>().join(" ").chars().take(280).collect();
        Ok(Summary {
            title,
            summary: if summary.is_empty() {
                "No details available (mock).".to_string()
            } else {
                summary
            },
        })
    }

    fn vendor(&self) -> AiVendor {
        AiVendor::Mock
    }
}

/// Build the adapter for the configured vendor.
///
/// * `AI_TEST_MODE=mock` always yields [`MockSummarizer`].
/// * Otherwise the vendor in `cfg` selects the adapter; its API key must already be resolved.
pub fn build_summarizer(cfg: &AiConfig) -> anyhow::Result<DynSummarizer> {
    let mock_mode = std::env::var("AI_TEST_MODE")
        .map(|v| v.eq_ignore_ascii_case("mock"))
        .unwrap_or(false);
    if mock_mode {
        return Ok(Arc::new(MockSummarizer));
    }

    let timeout = std::time::Duration::from_secs(cfg.request_timeout_secs);
    match cfg.vendor()? {
        AiVendor::OpenAi => Ok(Arc::new(openai::OpenAiSummarizer::new(
            cfg.api_key.clone(),
            cfg.model.as_deref(),
            cfg.max_tokens,
            timeout,
        ))),
        AiVendor::Claude => Ok(Arc::new(claude::ClaudeSummarizer::new(
            cfg.api_key.clone(),
            cfg.model.as_deref(),
            cfg.max_tokens,
            timeout,
        ))),
        AiVendor::Mock => Ok(Arc::new(MockSummarizer)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_uses_first_line_as_title() {
        let s = MockSummarizer
            .summarize("Keyword: 보조금\n\n[news] 정부 보조금 확대\n")
            .await
            .unwrap();
        assert_eq!(s.title, "Keyword: 보조금");
        assert_eq!(s.summary, "[news] 정부 보조금 확대");
    }

    #[test]
    fn malformed_is_never_retryable() {
        let e = SummarizeError::Malformed {
            vendor: "openai",
            detail: "array".into(),
        };
        assert!(!e.is_retryable());
        assert!(SummarizeError::from(ExternalCallOutcome::timeout("openai")).is_retryable());
    }
}
