//! Configuration loading
//!
//! Resolves a [`keelson_domain::KeelsonConfig`] from a file, the environment
//! and defaults.

pub mod loader;

pub use loader::{apply_env_overrides, load, load_from_file, probe_config_paths, validate};
