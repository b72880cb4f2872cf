//! Error types for fibertrack-core.

use thiserror::Error;

/// Result type alias for fibertrack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for fibertrack operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (missing input, bad parameter, unknown algorithm).
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Two volumes that must share a voxel grid do not.
    #[error("geometry mismatch: {0}")]
    GeometryMismatch(String),

    /// Volume data does not match its declared shape or component layout.
    #[error("invalid volume: {0}")]
    InvalidVolume(String),

    /// Classifier model is malformed or inconsistent with the inputs.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// Unknown tracking algorithm name.
    #[error("unknown tracking algorithm: {0}")]
    UnknownAlgorithm(String),

    /// The run was cancelled before all seeds were processed.
    #[error("tracking cancelled")]
    Cancelled,
}
