//! service-core: shared infrastructure for the invoice ledger binaries.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;

pub use axum;
pub use tracing;
