//! kv-cache-hybrid: hybrid KV-cache compression configs.
//!
//! Loads and validates the YAML config that drives a hybrid KV-cache
//! compression engine, and provides the pieces an engine needs to act on it:
//!   - [`config`]: the immutable [`config::HybridCacheConfig`] record and loader options
//!   - [`strategy`]: typed sub-strategies and the ordered fallback chain
//!   - [`plan`]: layerwise fields resolved against a [`model::ModelPreset`]
//!   - [`profile`]: per-head strategy choices and their per-layer distribution

pub mod config;
mod document;
pub mod error;
pub mod model;
pub mod plan;
pub mod profile;
pub mod strategy;

pub use config::{Advisory, HybridCacheConfig, LoadOptions, LoadReport};
pub use error::{ConfigError, FieldPath};
