use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ai::{parse_summary, SummarizeError, Summarizer, Summary, SYSTEM_PROMPT};
use crate::external::http;
use crate::pipeline::model::AiVendor;

const VENDOR: &str = "claude";
const ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

/// Anthropic Messages API adapter.
pub struct ClaudeSummarizer {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl ClaudeSummarizer {
    pub fn new(api_key: String, model: Option<&str>, max_tokens: u32, timeout: Duration) -> Self {
        Self {
            http: http::build_client(Duration::from_secs(4)),
            api_key,
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
            max_tokens,
            timeout,
        }
    }
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}
#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Msg<'a>>,
}
#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    content: Vec<Block>,
}
#[derive(Deserialize)]
struct Block {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

#[async_trait]
impl Summarizer for ClaudeSummarizer {
    async fn summarize(&self, content: &str) -> Result<Summary, SummarizeError> {
        let req = Req {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: SYSTEM_PROMPT,
            messages: vec![Msg {
                role: "user",
                content,
            }],
        };

        let resp = http::send(
            VENDOR,
            self.http
                .post(ENDPOINT)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .json(&req),
            self.timeout,
            parse_error_body,
        )
        .await?;
        let body: Resp = http::read_json(VENDOR, resp).await?;

        let mut texts = body
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text);
        let text = texts.next().ok_or_else(|| SummarizeError::Malformed {
            vendor: VENDOR,
            detail: "no text block in response".to_string(),
        })?;
        if texts.next().is_some() {
            return Err(SummarizeError::Malformed {
                vendor: VENDOR,
                detail: "more than one text block".to_string(),
            });
        }
        parse_summary(VENDOR, &text)
    }

    fn vendor(&self) -> AiVendor {
        AiVendor::Claude
    }
}

fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| (e.error.kind, e.error.message))
        .unwrap_or((None, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::classify;

    #[test]
    fn overloaded_is_retryable() {
        let (code, msg) =
            parse_error_body(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#);
        let out = classify(VENDOR, 529, code.as_deref(), msg.as_deref());
        assert!(out.is_retryable());
        assert_eq!(out.message, "[overloaded_error] Overloaded");
    }
}
