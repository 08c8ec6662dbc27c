//! Configuration loading
//!
//! Builds the [`calsync_domain::Config`] aggregate from the environment or a
//! config file.

pub mod loader;

pub use loader::{discover_config_path, load, load_from_env, load_from_file};
