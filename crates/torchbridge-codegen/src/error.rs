//! Error types for wrapper generation

use thiserror::Error;
use torchbridge_core::CoreError;

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Target(#[from] CoreError),

    #[error("Invalid signature set: {0}")]
    InvalidSchema(String),

    #[error("Invalid signature for `{function}`: {reason}")]
    InvalidSignature { function: String, reason: String },

    /// The wrapper must hand the host framework's device context to the
    /// kernel; without the capability GPU memory ownership cannot be split
    /// between the host framework and the kernel runtime.
    #[error(
        "compiling a wrapper for a CUDA kernel requires the user_context target feature \
         to manage GPU memory; add \"-user_context\" to the target (got \"{target}\")"
    )]
    MissingUserContextFeature { target: String },

    #[error("`{function}` has no user-context parameter, which the {backend} bridge needs")]
    MissingContextParameter { function: String, backend: String },
}

impl CodegenError {
    pub fn invalid_signature(function: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSignature {
            function: function.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CodegenError>;
