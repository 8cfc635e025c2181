//! C ABI shared with kernel runtimes.
//!
//! Driver handles are opaque pointers on this side of the boundary; the
//! bridge only ever copies them, it never calls into a driver.

use std::os::raw::{c_int, c_void};

/// CUDA driver context (`CUcontext`).
pub type CUcontext = *mut c_void;
/// CUDA stream (`CUstream` / `cudaStream_t`).
pub type CUstream = *mut c_void;

/// Status returned by every status-returning hook.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStatus {
    Success = 0,
    /// An out-parameter was null.
    InvalidArgument = -1,
    /// The host-side stream table needed by the hook is not registered.
    NotInstalled = -2,
}

impl HookStatus {
    pub fn code(self) -> c_int {
        self as c_int
    }
}

pub type CudaAcquireContextFn =
    unsafe extern "C" fn(user_context: *mut c_void, ctx: *mut CUcontext, create: bool) -> c_int;
pub type CudaReleaseContextFn = unsafe extern "C" fn(user_context: *mut c_void) -> c_int;
pub type CudaGetStreamFn =
    unsafe extern "C" fn(user_context: *mut c_void, ctx: CUcontext, stream: *mut CUstream) -> c_int;

/// Device ordinal the runtime should use for this call.
pub type GetGpuDeviceFn = unsafe extern "C" fn(user_context: *mut c_void) -> c_int;

pub type MetalAcquireContextFn = unsafe extern "C" fn(
    user_context: *mut c_void,
    device: *mut *mut c_void,
    queue: *mut *mut c_void,
    create: bool,
) -> c_int;
pub type MetalReleaseContextFn = unsafe extern "C" fn(user_context: *mut c_void) -> c_int;
pub type MetalPreRunFn = unsafe extern "C" fn(user_context: *mut c_void);
pub type MetalDefaultDeviceFn = unsafe extern "C" fn(user_context: *mut c_void) -> *mut c_void;
pub type MetalNewCommandQueueFn =
    unsafe extern "C" fn(device: *mut c_void, user_context: *mut c_void) -> *mut c_void;

pub type MemoizationCleanupFn = unsafe extern "C" fn(user_context: *mut c_void);

/// Kernel-runtime setters for platforms where hooks cannot be replaced at
/// link time. Each returns the handler it replaced.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CudaRuntimeSetters {
    pub set_acquire_context: unsafe extern "C" fn(CudaAcquireContextFn) -> Option<CudaAcquireContextFn>,
    pub set_release_context: unsafe extern "C" fn(CudaReleaseContextFn) -> Option<CudaReleaseContextFn>,
    pub set_get_stream: unsafe extern "C" fn(CudaGetStreamFn) -> Option<CudaGetStreamFn>,
}
