// src/external/mod.rs
//! Plumbing shared by every outbound call: failure classification, retry, HTTP helpers.

pub mod classify;
pub mod http;
pub mod retry;

pub use classify::{classify, ExternalCallOutcome, FailureKind};
pub use retry::{with_retry, Classified, RetryPolicy};
