//! # Calsync Domain
//!
//! Business domain types and models for the calendar synchronization engine.
//!
//! This crate contains:
//! - Persisted entities (Connection, EventMapping, SyncLogEntry,
//!   RetryQueueItem)
//! - Read models for appointments and external calendar events
//! - Domain error types and Result definitions
//! - Configuration structures
//!
//! ## Architecture
//! - No dependencies on other calsync crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
