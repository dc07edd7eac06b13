// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::env;

use crate::pipeline::model::AiVendor;

fn default_vendor() -> String {
    "openai".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_max_tokens() -> u32 {
    600
}
fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// "openai" | "claude" | "mock" (case-insensitive)
    #[serde(default = "default_vendor")]
    pub vendor: String,
    #[serde(default)]
    pub model: Option<String>,
    /// "ENV" means: read from OPENAI_API_KEY / CLAUDE_API_KEY (by vendor)
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// HTTP-level timeout of one vendor request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Concurrent-call budget of the vendor account; caps Generate-Post fan-out when set.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            vendor: default_vendor(),
            model: None,
            api_key: default_api_key(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            max_concurrency: None,
        }
    }
}

impl AiConfig {
    pub fn vendor(&self) -> anyhow::Result<AiVendor> {
        AiVendor::parse(&self.vendor)
            .ok_or_else(|| anyhow::anyhow!("Unsupported AI vendor in config: {}", self.vendor))
    }

    /// Normalize the vendor name and resolve an `"ENV"` API key.
    pub fn resolve(mut self) -> anyhow::Result<Self> {
        if let Ok(v) = env::var("AI_VENDOR") {
            if !v.trim().is_empty() {
                self.vendor = v;
            }
        }
        self.vendor = self.vendor.trim().to_lowercase();
        let vendor = self.vendor()?;

        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = match vendor {
                AiVendor::OpenAi => env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?,
                AiVendor::Claude => env::var("CLAUDE_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing CLAUDE_API_KEY env var"))?,
                AiVendor::Mock => String::new(),
            };
        }

        if self.max_concurrency == Some(0) {
            self.max_concurrency = Some(1);
        }
        if self.max_tokens == 0 {
            self.max_tokens = default_max_tokens();
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[serial_test::serial]
    #[test]
    fn env_key_is_resolved_per_vendor() {
        env::remove_var("AI_VENDOR");
        env::set_var("CLAUDE_API_KEY", "sk-ant-test");
        let cfg = AiConfig {
            vendor: " Claude ".into(),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(cfg.vendor, "claude");
        assert_eq!(cfg.api_key, "sk-ant-test");
        env::remove_var("CLAUDE_API_KEY");
    }

    #[serial_test::serial]
    #[test]
    fn missing_key_and_unknown_vendor_fail() {
        env::remove_var("AI_VENDOR");
        env::remove_var("OPENAI_API_KEY");
        assert!(AiConfig::default().resolve().is_err());

        let bad = AiConfig {
            vendor: "gemini".into(),
            api_key: "literal".into(),
            ..Default::default()
        };
        assert!(bad.resolve().is_err());
    }

    #[serial_test::serial]
    #[test]
    fn mock_vendor_needs_no_key() {
        env::remove_var("AI_VENDOR");
        let cfg = AiConfig {
            vendor: "mock".into(),
            max_concurrency: Some(0),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(cfg.vendor().unwrap(), AiVendor::Mock);
        assert_eq!(cfg.max_concurrency, Some(1));
    }
}
