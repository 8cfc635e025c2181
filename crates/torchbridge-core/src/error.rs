//! Error types shared by the torchbridge crates

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("empty target string")]
    EmptyTarget,

    #[error("target requests more than one GPU backend: {first} and {second}")]
    ConflictingBackends { first: String, second: String },

    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("unknown scalar type: {0}")]
    UnknownScalarType(String),
}
