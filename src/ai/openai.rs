use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ai::{parse_summary, SummarizeError, Summarizer, Summary, SYSTEM_PROMPT};
use crate::external::http;
use crate::pipeline::model::AiVendor;

const VENDOR: &str = "openai";
const ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI Chat Completions adapter (JSON mode).
pub struct OpenAiSummarizer {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl OpenAiSummarizer {
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
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}
#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}
#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    choices: Vec<Choice>,
}
#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}
#[derive(Deserialize)]
struct ChoiceMsg {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}
#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<serde_json::Value>,
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, content: &str) -> Result<Summary, SummarizeError> {
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content,
                },
            ],
            temperature: 0.3,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = http::send(
            VENDOR,
            self.http.post(ENDPOINT).bearer_auth(&self.api_key).json(&req),
            self.timeout,
            parse_error_body,
        )
        .await?;
        let body: Resp = http::read_json(VENDOR, resp).await?;

        let text = body
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| SummarizeError::Malformed {
                vendor: VENDOR,
                detail: "no message content in choices".to_string(),
            })?;
        parse_summary(VENDOR, text)
    }

    fn vendor(&self) -> AiVendor {
        AiVendor::OpenAi
    }
}

/// `error.code` may be a string, a number or null; fall back to `error.type`.
fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    let Ok(env) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return (None, None);
    };
    let code = match env.error.code {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => env.error.kind,
    };
    (code, env.error.message)
}
