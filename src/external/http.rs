//! Small reqwest helpers so every adapter reports failures the same way.

use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::external::classify::{classify, ExternalCallOutcome};

/// Pulls `(vendor_code, vendor_message)` out of a vendor's error body.
pub type ErrorBodyParser = fn(&str) -> (Option<String>, Option<String>);

pub const USER_AGENT: &str = "trend-post-pipeline/0.1";

pub fn build_client(connect_timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Send `req` with a per-call timeout and turn any non-2xx answer into a classified outcome.
pub async fn send(
    vendor: &str,
    req: RequestBuilder,
    timeout: Duration,
    parse_error: ErrorBodyParser,
) -> Result<Response, ExternalCallOutcome> {
    let resp = req
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| transport_outcome(vendor, &e))?;

    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    // The error body is best-effort; a failed read still leaves the status to classify.
    let body = resp.text().await.unwrap_or_default();
    let (code, message) = parse_error(&body);
    Err(classify(vendor, status.as_u16(), code.as_deref(), message.as_deref()))
}

/// Read a 2xx body as JSON.
pub async fn read_json<T: DeserializeOwned>(vendor: &str, resp: Response) -> Result<T, ExternalCallOutcome> {
    let status = resp.status().as_u16();
    let body = read_text(vendor, resp).await?;
    serde_json::from_str(&body).map_err(|e| ExternalCallOutcome::invalid_body(vendor, status, e))
}

pub async fn read_text(vendor: &str, resp: Response) -> Result<String, ExternalCallOutcome> {
    resp.text().await.map_err(|e| transport_outcome(vendor, &e))
}

fn transport_outcome(vendor: &str, e: &reqwest::Error) -> ExternalCallOutcome {
    if e.is_timeout() {
        ExternalCallOutcome::timeout(vendor)
    } else {
        ExternalCallOutcome::transport(vendor, e)
    }
}

/// Parser for bodies without a structured error shape.
pub fn no_error_body(_body: &str) -> (Option<String>, Option<String>) {
    (None, None)
}
