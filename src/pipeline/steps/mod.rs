//! Step entry points. Each takes the run's [`ExecutionContext`](super::ExecutionContext)
//! by `&mut` and writes only its own keys.

pub mod cache_post;
pub mod fetch_keywords;
pub mod generate_post;
pub mod search_sources;

pub use cache_post::{cache_posts, CacheSummary};
pub use fetch_keywords::fetch_keywords;
pub use generate_post::{generate_posts, GenerateSettings, GenerateSummary};
pub use search_sources::{search_sources, SearchSummary};
