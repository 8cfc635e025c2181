//! CUDA context bridge.
//!
//! The kernel runtime asks these hooks for a context, a stream and a device
//! ordinal. Each answer comes from the [`CudaUserContext`] the wrapper built
//! for the current call; with no User Context the runtime gets the null
//! context, the null stream and device 0.

use crate::abi::{CUcontext, CUstream, CudaRuntimeSetters, HookStatus};
use crate::registry::{registry, CudaHooks};
use crate::user_context::CudaUserContext;
use std::os::raw::{c_int, c_void};
use std::ptr;
use tracing::{info, trace};

impl CudaHooks {
    /// The bridge implementation of every CUDA hook.
    pub fn bridge() -> Self {
        Self {
            acquire_context: Some(acquire_context),
            release_context: Some(release_context),
            get_stream: Some(get_stream),
            get_gpu_device: Some(get_gpu_device),
        }
    }
}

/// Hand out the host's current context. Never creates one, whatever
/// `create` says: creation belongs to the host framework.
///
/// # Safety
///
/// `user_context` must be null or point to a live [`CudaUserContext`]; `ctx`
/// must be null or writable.
pub unsafe extern "C" fn acquire_context(user_context: *mut c_void, ctx: *mut CUcontext, _create: bool) -> c_int {
    if ctx.is_null() {
        return HookStatus::InvalidArgument.code();
    }
    *ctx = match CudaUserContext::from_user_context(user_context) {
        Some(record) => record.context(),
        None => ptr::null_mut(),
    };
    trace!(ctx = ?*ctx, "cuda acquire_context");
    HookStatus::Success.code()
}

/// Nothing to release; the host owns the context.
///
/// # Safety
///
/// Never dereferences `user_context`.
pub unsafe extern "C" fn release_context(_user_context: *mut c_void) -> c_int {
    HookStatus::Success.code()
}

/// # Safety
///
/// As [`acquire_context`], with `stream` in place of `ctx`.
pub unsafe extern "C" fn get_stream(user_context: *mut c_void, _ctx: CUcontext, stream: *mut CUstream) -> c_int {
    if stream.is_null() {
        return HookStatus::InvalidArgument.code();
    }
    *stream = match CudaUserContext::from_user_context(user_context) {
        Some(record) => record.stream(),
        None => ptr::null_mut(),
    };
    trace!(stream = ?*stream, "cuda get_stream");
    HookStatus::Success.code()
}

/// # Safety
///
/// `user_context` must be null or point to a live [`CudaUserContext`].
pub unsafe extern "C" fn get_gpu_device(user_context: *mut c_void) -> c_int {
    CudaUserContext::from_user_context(user_context).map_or(0, |record| record.device_id)
}

/// Install the bridge into a kernel runtime that only offers setters, and
/// into the registry. Returns the runtime's previous handlers.
///
/// # Safety
///
/// Every setter in `setters` must be safe to call.
pub unsafe fn register_cuda_with_runtime(setters: &CudaRuntimeSetters) -> CudaHooks {
    let previous = CudaHooks {
        acquire_context: (setters.set_acquire_context)(acquire_context),
        release_context: (setters.set_release_context)(release_context),
        get_stream: (setters.set_get_stream)(get_stream),
        get_gpu_device: None,
    };
    registry().install_cuda_bridge();
    info!("cuda bridge registered with kernel runtime setters");
    previous
}

/// C entry point for [`register_cuda_with_runtime`]. Returns 0 on success.
///
/// # Safety
///
/// `setters` must be null or point to a valid [`CudaRuntimeSetters`].
#[no_mangle]
pub unsafe extern "C" fn torchbridge_register_cuda(setters: *const CudaRuntimeSetters) -> c_int {
    match setters.as_ref() {
        Some(setters) => {
            register_cuda_with_runtime(setters);
            HookStatus::Success.code()
        }
        None => HookStatus::InvalidArgument.code(),
    }
}

#[no_mangle]
pub extern "C" fn torchbridge_install_cuda_bridge() {
    registry().install_cuda_bridge();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{CudaAcquireContextFn, CudaGetStreamFn, CudaReleaseContextFn};
    use crate::registry::dispatch;
    use proptest::prelude::*;
    use serial_test::serial;
    use std::sync::Mutex;

    #[test]
    fn null_user_context_gives_defaults() {
        let mut ctx = 0x1 as CUcontext;
        let mut stream = 0x1 as CUstream;
        unsafe {
            assert_eq!(acquire_context(ptr::null_mut(), &mut ctx, true), 0);
            assert_eq!(get_stream(ptr::null_mut(), ctx, &mut stream), 0);
            assert_eq!(get_gpu_device(ptr::null_mut()), 0);
        }
        assert!(ctx.is_null());
        assert!(stream.is_null());
    }

    #[test]
    fn null_out_parameter_is_rejected() {
        unsafe {
            assert_eq!(acquire_context(ptr::null_mut(), ptr::null_mut(), false), -1);
            assert_eq!(get_stream(ptr::null_mut(), ptr::null_mut(), ptr::null_mut()), -1);
        }
    }

    #[test]
    fn borrowed_handles_come_back_unchanged() {
        let mut host_ctx = 0xC0 as CUcontext;
        let mut host_stream = 0x5E as CUstream;
        let mut record = CudaUserContext::new(1, &mut host_ctx, &mut host_stream);
        let uc = record.as_user_context();

        let mut ctx = ptr::null_mut();
        let mut stream = ptr::null_mut();
        unsafe {
            assert_eq!(acquire_context(uc, &mut ctx, false), 0);
            assert_eq!(get_stream(uc, ctx, &mut stream), 0);
            assert_eq!(release_context(uc), 0);
        }
        assert_eq!(ctx, 0xC0 as CUcontext);
        assert_eq!(stream, 0x5E as CUstream);
    }

    proptest! {
        #[test]
        fn ordinal_round_trips(k in 0i32..64) {
            let mut ctx = ptr::null_mut();
            let mut stream = ptr::null_mut();
            let mut record = CudaUserContext::new(k, &mut ctx, &mut stream);
            prop_assert_eq!(unsafe { get_gpu_device(record.as_user_context()) }, k);
        }
    }

    static INSTALLED: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    unsafe extern "C" fn set_acquire(_: CudaAcquireContextFn) -> Option<CudaAcquireContextFn> {
        INSTALLED.lock().unwrap().push("acquire_context");
        None
    }

    unsafe extern "C" fn set_release(_: CudaReleaseContextFn) -> Option<CudaReleaseContextFn> {
        INSTALLED.lock().unwrap().push("release_context");
        None
    }

    unsafe extern "C" fn set_stream(_: CudaGetStreamFn) -> Option<CudaGetStreamFn> {
        INSTALLED.lock().unwrap().push("get_stream");
        Some(get_stream)
    }

    #[test]
    #[serial]
    fn setters_receive_every_hook() {
        registry().reset();
        INSTALLED.lock().unwrap().clear();
        let setters = CudaRuntimeSetters {
            set_acquire_context: set_acquire,
            set_release_context: set_release,
            set_get_stream: set_stream,
        };
        let previous = unsafe { register_cuda_with_runtime(&setters) };
        assert_eq!(*INSTALLED.lock().unwrap(), vec!["acquire_context", "release_context", "get_stream"]);
        assert!(previous.acquire_context.is_none());
        assert!(previous.get_stream.is_some());
        assert!(registry().is_installed(torchbridge_core::Backend::Cuda));
        assert_eq!(unsafe { torchbridge_register_cuda(ptr::null()) }, -1);
        registry().reset();
    }

    #[test]
    #[serial]
    fn dispatch_reaches_installed_bridge() {
        registry().reset();
        torchbridge_install_cuda_bridge();
        let mut host_ctx = 0xAB as CUcontext;
        let mut host_stream = 0xCD as CUstream;
        let mut record = CudaUserContext::new(2, &mut host_ctx, &mut host_stream);
        let uc = record.as_user_context();
        unsafe {
            let ctx = dispatch::cuda_acquire_context(uc, true).unwrap();
            assert_eq!(ctx, 0xAB as CUcontext);
            assert_eq!(dispatch::cuda_get_stream(uc, ctx).unwrap(), 0xCD as CUstream);
            assert_eq!(dispatch::gpu_device(torchbridge_core::Backend::Cuda, uc).unwrap(), 2);
            dispatch::cuda_release_context(uc).unwrap();
        }
        registry().reset();
    }
}
