//! # Failure classification
//! One shared policy for every external call site (trend fetch, news search,
//! video search, AI summarize): a failed call becomes an [`ExternalCallOutcome`]
//! that is either retryable or client-terminal.
//!
//! - 429 and every 5xx are retryable.
//! - Every other 4xx is client-terminal.
//! - Timeouts and transport errors (no HTTP status at all) are retryable.
//! - Anything else that reaches the classifier (1xx/2xx/3xx with an unusable body)
//!   is client-terminal: retrying the same request would not change the answer.

use reqwest::StatusCode;
use serde::Serialize;
use std::fmt;

/// Retry category of a failed external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Retryable,
    ClientTerminal,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Retryable => "retryable",
            FailureKind::ClientTerminal => "client_terminal",
        }
    }
}

/// Classified failure of one external call. Transient: drives retry and counters,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{vendor} call failed ({}): {message}", .kind.as_str())]
pub struct ExternalCallOutcome {
    pub vendor: String,
    /// `None` when the call never produced a response (timeout, connect error).
    pub http_status: Option<u16>,
    pub vendor_code: Option<String>,
    pub vendor_message: Option<String>,
    pub kind: FailureKind,
    /// Normalized, human readable message (see [`normalize_message`]).
    pub message: String,
}

impl ExternalCallOutcome {
    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Retryable
    }

    /// The call did not answer within its own timeout.
    pub fn timeout(vendor: &str) -> Self {
        Self {
            vendor: vendor.to_string(),
            http_status: None,
            vendor_code: None,
            vendor_message: None,
            kind: FailureKind::Retryable,
            message: "request timed out".to_string(),
        }
    }

    /// Connection refused, DNS failure, reset mid-body and the like.
    pub fn transport(vendor: &str, err: impl fmt::Display) -> Self {
        Self {
            vendor: vendor.to_string(),
            http_status: None,
            vendor_code: None,
            vendor_message: None,
            kind: FailureKind::Retryable,
            message: format!("transport error: {err}"),
        }
    }

    /// The vendor answered 2xx but the body could not be understood.
    pub fn invalid_body(vendor: &str, status: u16, detail: impl fmt::Display) -> Self {
        Self {
            vendor: vendor.to_string(),
            http_status: Some(status),
            vendor_code: None,
            vendor_message: None,
            kind: FailureKind::ClientTerminal,
            message: format!("unreadable response body: {detail}"),
        }
    }
}

/// Classify an HTTP failure reported by `vendor`.
pub fn classify(
    vendor: &str,
    status: u16,
    vendor_code: Option<&str>,
    vendor_message: Option<&str>,
) -> ExternalCallOutcome {
    let vendor_code = non_blank(vendor_code);
    let vendor_message = non_blank(vendor_message);

    ExternalCallOutcome {
        vendor: vendor.to_string(),
        http_status: Some(status),
        message: normalize_message(status, vendor_code.as_deref(), vendor_message.as_deref()),
        vendor_code,
        vendor_message,
        kind: kind_for_status(status),
    }
}

pub fn kind_for_status(status: u16) -> FailureKind {
    match status {
        429 | 500..=599 => FailureKind::Retryable,
        _ => FailureKind::ClientTerminal,
    }
}

/// `"[code] message"` when both are known, the bare vendor message when only it
/// is known, otherwise the textual status description.
pub fn normalize_message(status: u16, vendor_code: Option<&str>, vendor_message: Option<&str>) -> String {
    match (vendor_code, vendor_message) {
        (Some(code), Some(msg)) => format!("[{code}] {msg}"),
        (None, Some(msg)) => msg.to_string(),
        _ => status_description(status),
    }
}

fn status_description(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"))
}

fn non_blank(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        for status in std::iter::once(429).chain(500..=599) {
            let out = classify("naver", status, None, None);
            assert_eq!(out.kind, FailureKind::Retryable, "status {status}");
        }
    }

    #[test]
    fn other_client_errors_are_terminal() {
        for status in (400..=499).filter(|s| *s != 429) {
            let out = classify("youtube", status, None, None);
            assert_eq!(out.kind, FailureKind::ClientTerminal, "status {status}");
        }
    }

    #[test]
    fn message_prefers_vendor_text() {
        let out = classify("naver", 400, Some("SE01"), Some("Incorrect query request"));
        assert_eq!(out.message, "[SE01] Incorrect query request");

        let out = classify("openai", 401, None, Some("Invalid API key"));
        assert_eq!(out.message, "Invalid API key");

        // a code alone does not make a message
        let out = classify("claude", 529, Some("overloaded_error"), Some("  "));
        assert_eq!(out.message, "HTTP 529");
        assert_eq!(out.vendor_message, None);
        assert!(out.is_retryable());

        let out = classify("youtube", 503, None, None);
        assert_eq!(out.message, "Service Unavailable");
    }

    #[test]
    fn timeouts_are_retryable() {
        let out = ExternalCallOutcome::timeout("openai");
        assert!(out.is_retryable());
        assert_eq!(out.http_status, None);
    }
}
