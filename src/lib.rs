// src/lib.rs
// Public library surface for the service binary and integration tests.

pub mod analyze;
pub mod api;
pub mod cache;
pub mod categories;
pub mod config;
pub mod error;
pub mod extract;
pub mod markets;
pub mod matcher;
pub mod metrics;
pub mod orchestrator;
pub mod store;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::error::{FetchError, PipelineError};
pub use crate::markets::{MarketListing, MarketSource, Platform};
pub use crate::matcher::Recommendation;
pub use crate::orchestrator::{Orchestrator, OrchestratorHandle, Request, Response};
