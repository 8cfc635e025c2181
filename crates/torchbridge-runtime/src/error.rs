//! Error types for the context bridge and wrapper invocation

use crate::buffer::TensorDevice;
use thiserror::Error;
use torchbridge_core::Backend;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Without the bridge the kernel runtime would create its own context.
    #[error("no {backend} bridge hooks are installed; install them before invoking kernels")]
    HooksNotInstalled { backend: Backend },

    #[error("buffer {buffer} is not contiguous")]
    NonContiguous { buffer: String },

    #[error("buffer {buffer} is on {actual}, expected CUDA device {expected}")]
    WrongDevice {
        buffer: String,
        expected: i32,
        actual: TensorDevice,
    },

    #[error("kernel {kernel} failed with status {status}")]
    KernelFailed { kernel: String, status: i32 },

    #[error(
        "device not synchronized for buffer {buffer}, make sure all update stages are explicitly computed on GPU"
    )]
    HostDirty { buffer: String },

    #[error("{hook} hook failed with status {status}")]
    HookFailed { hook: &'static str, status: i32 },

    #[error("requested Metal device {requested:#x} does not match the host stream's device {host:#x}")]
    DeviceMismatch { requested: usize, host: usize },

    #[error("invalid user context: {0}")]
    InvalidUserContext(&'static str),
}
