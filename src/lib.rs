// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod ai;
pub mod api;
pub mod config;
pub mod external;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod sources;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::pipeline::{JobOrchestrator, PipelineDeps, PipelineSettings};
