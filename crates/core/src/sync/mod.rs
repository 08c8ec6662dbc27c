//! Two-way sync between appointments and the external calendar

mod bulk;
pub mod ports;
mod processor;
mod resolution;

pub use processor::{SyncProcessor, SyncProcessorConfig};
pub use resolution::{resolve, Resolution};
