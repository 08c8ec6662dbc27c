//! # Calsync Server
//!
//! HTTP application layer - routes, wiring and the main entry point.
//!
//! This crate contains:
//! - axum routes for webhook receipt, cron triggers, sync and connections
//! - Application context (dependency injection)
//! - Tracing setup for the binary
//!
//! ## Architecture
//! - Depends on `domain`, `core`, and `infra`
//! - Wires up the hexagonal architecture
//! - Owns the lifecycles of workers and schedulers

pub mod auth;
pub mod context;
pub mod error;
pub mod routes;
pub mod utils;

// Re-export for convenience
pub use context::AppContext;
pub use error::{ApiError, ApiResult};
pub use routes::build_router;
