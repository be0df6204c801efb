//! Error types for the SBITS engine

use thiserror::Error;

/// Errors surfaced by the SBITS engine.
///
/// `Format` and `SplineFull` are fatal: the engine must be closed and
/// reinitialized. The rest are recoverable by the caller.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("format error: {0}")]
    Format(String),

    #[error("key not found")]
    NotFound,

    #[error("variable data was reclaimed by wrap")]
    Stale,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("spline index is full")]
    SplineFull,
}

pub type Result<T> = std::result::Result<T, Error>;
