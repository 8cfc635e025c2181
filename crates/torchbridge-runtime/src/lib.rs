//! # torchbridge-runtime
//!
//! The Context Bridge: kernel-runtime device hooks that answer "which
//! context, which stream, which device" with whatever the host framework is
//! already using, instead of letting the kernel runtime create its own.
//!
//! Hooks live in a process-wide [`HookRegistry`]. Install a bridge once,
//! before the first kernel call:
//!
//! ```rust
//! use torchbridge_core::Backend;
//! use torchbridge_runtime::registry;
//!
//! registry().install_cuda_bridge();
//! assert!(registry().is_installed(Backend::Cuda));
//! ```
//!
//! Per call, the wrapper builds a User Context on its stack
//! ([`CudaUserContext`] / [`MetalUserContext`]) and passes it to the kernel,
//! which hands it back to the hooks. [`WrapperInvocation`] performs the whole
//! wrapper sequence for Rust hosts.

pub mod abi;
pub mod buffer;
pub mod config;
pub mod cuda;
pub mod error;
pub mod invocation;
pub mod metal;
pub mod registry;
pub mod user_context;

pub use buffer::{BufferView, HostTensor, TensorDevice};
pub use config::{BridgeConfig, DeviceMismatchPolicy};
pub use cuda::register_cuda_with_runtime;
pub use error::{BridgeError, Result};
pub use invocation::{HostDevice, WrapperInvocation};
pub use crate::metal::{check_device_match, MetalStream, MetalStreamOps};
pub use registry::{dispatch, registry, CudaHooks, HookRegistry, MetalHooks};
pub use user_context::{CudaUserContext, MetalUserContext};

#[cfg(target_vendor = "apple")]
pub use crate::metal::NativeMetalStream;
