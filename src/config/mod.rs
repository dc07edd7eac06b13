// src/config/mod.rs
//! Pipeline configuration: `config/pipeline.toml` (or `$PIPELINE_CONFIG_PATH`)
//! with serde defaults for every field, then a few env overrides.

pub mod ai;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::external::RetryPolicy;

pub use ai::AiConfig;

pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub pipeline: RunSection,
    #[serde(default)]
    pub trend: TrendSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub novelty: NoveltySection,
    #[serde(default)]
    pub generate: GenerateSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub ai: AiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Pipeline identity; part of every run key.
    #[serde(default = "default_identity")]
    pub identity: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Full run records kept in memory; used run keys are kept regardless.
    #[serde(default = "default_run_retention")]
    pub run_retention: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendSection {
    #[serde(default = "default_geo")]
    pub geo: String,
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
    #[serde(default = "default_search_timeout_secs")]
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_max_per_platform")]
    pub max_per_platform: usize,
    #[serde(default = "default_search_timeout_secs")]
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoveltySection {
    /// Prior samples looked at (hours).
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Prior samples required before a keyword can be postable.
    #[serde(default = "default_min_history")]
    pub min_history: usize,
    /// Coefficient of variation at or below which a keyword is low-variation.
    #[serde(default = "default_variance_threshold")]
    pub variance_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateSection {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_source_chars")]
    pub max_source_chars: usize,
    /// Per-call timeout; a timed-out call is classified retryable.
    #[serde(default = "default_generate_timeout_secs")]
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_identity() -> String {
    "trend-post".to_string()
}
fn default_interval_secs() -> u64 {
    3600
}
fn default_run_retention() -> usize {
    48
}
fn default_geo() -> String {
    "KR".to_string()
}
fn default_max_keywords() -> usize {
    20
}
fn default_max_per_platform() -> usize {
    10
}
fn default_search_timeout_secs() -> u64 {
    10
}
fn default_history_window() -> usize {
    24
}
fn default_min_history() -> usize {
    3
}
fn default_variance_threshold() -> f64 {
    0.25
}
fn default_max_concurrency() -> usize {
    4
}
fn default_max_source_chars() -> usize {
    4000
}
fn default_generate_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_jitter_ms() -> u64 {
    250
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            interval_secs: default_interval_secs(),
            run_retention: default_run_retention(),
        }
    }
}
impl Default for TrendSection {
    fn default() -> Self {
        Self {
            geo: default_geo(),
            max_keywords: default_max_keywords(),
            call_timeout_secs: default_search_timeout_secs(),
        }
    }
}
impl Default for SearchSection {
    fn default() -> Self {
        Self {
            max_per_platform: default_max_per_platform(),
            call_timeout_secs: default_search_timeout_secs(),
        }
    }
}
impl Default for NoveltySection {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            min_history: default_min_history(),
            variance_threshold: default_variance_threshold(),
        }
    }
}
impl Default for GenerateSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_source_chars: default_max_source_chars(),
            call_timeout_secs: default_generate_timeout_secs(),
        }
    }
}
impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.jitter_ms),
        )
    }
}

impl GenerateSection {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl PipelineConfig {
    /// Parse a TOML document, then sanitize.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: PipelineConfig = toml::from_str(s).context("parsing pipeline config")?;
        Ok(cfg.sanitized())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// 1) `$PIPELINE_CONFIG_PATH` (must exist)
    /// 2) `config/pipeline.toml`
    /// 3) built-in defaults
    ///
    /// Env overrides are applied last.
    pub fn load_default() -> Result<Self> {
        let cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let pb = PathBuf::from(DEFAULT_CONFIG_PATH);
            if pb.exists() {
                Self::load_from(&pb)?
            } else {
                Self::default()
            }
        };
        Ok(cfg.with_env_overrides())
    }

    /// `NOVELTY_THRESHOLD`, `GENERATE_MAX_CONCURRENCY`. Unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(t) = env_parse::<f64>("NOVELTY_THRESHOLD") {
            self.novelty.variance_threshold = t;
        }
        if let Some(n) = env_parse::<usize>("GENERATE_MAX_CONCURRENCY") {
            self.generate.max_concurrency = n;
        }
        self.sanitized()
    }

    /// Effective fan-out bound for Generate-Post: the vendor budget when configured.
    pub fn generate_concurrency(&self) -> usize {
        self.ai
            .max_concurrency
            .unwrap_or(self.generate.max_concurrency)
            .max(1)
    }

    fn sanitized(mut self) -> Self {
        if !self.novelty.variance_threshold.is_finite() || self.novelty.variance_threshold < 0.0 {
            self.novelty.variance_threshold = default_variance_threshold();
        }
        if self.novelty.history_window < self.novelty.min_history {
            self.novelty.history_window = self.novelty.min_history;
        }
        self.generate.max_concurrency = self.generate.max_concurrency.max(1);
        self.generate.max_source_chars = self.generate.max_source_chars.max(1);
        self.retry.max_attempts = self.retry.max_attempts.max(1);
        self.search.max_per_platform = self.search.max_per_platform.max(1);
        self.pipeline.run_retention = self.pipeline.run_retention.max(1);
        if self.pipeline.identity.trim().is_empty() {
            self.pipeline.identity = default_identity();
        }
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
