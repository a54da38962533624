//! Error types for cache construction and configuration.
//!
//! Supplier failures are not wrapped: reads return the supplier's own error
//! type behind an `Arc`, so a replayed failure is the very object that was
//! cached.

use std::sync::Arc;

use thiserror::Error;

/// A supplier failure as handed to callers. Replays share the allocation.
pub type SharedError<E> = Arc<E>;

/// Invalid cache configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("number of simultaneous computations must be at least 1, got {0}")]
    InvalidConcurrency(usize),
    #[error("invalid value {value:?} for environment variable {key}")]
    InvalidEnv { key: String, value: String },
    #[error("failed to parse cache config: {0}")]
    Parse(#[from] serde_yml::Error),
}

/// Failure to construct a cache.
#[derive(Error, Debug)]
pub enum CreateError<E> {
    #[error("invalid cache configuration")]
    Config(#[from] ConfigError),
    /// The synchronous initial computation failed.
    #[error("initial computation failed")]
    Supplier(#[source] E),
}
