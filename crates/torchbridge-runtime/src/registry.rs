//! Process-wide hook registry.
//!
//! Kernel runtimes look their device hooks up here instead of relying on
//! link-time symbol replacement. A bridge must be installed before the first
//! wrapper for its backend runs; [`crate::WrapperInvocation`] refuses to call
//! a GPU kernel otherwise.

use crate::abi::*;
use crate::config::BridgeConfig;
use crate::metal::MetalStreamOps;
use parking_lot::RwLock;
use std::mem;
use std::sync::LazyLock;
use torchbridge_core::Backend;
use tracing::{debug, info};

/// CUDA hooks consulted by the kernel runtime. `None` leaves the runtime's
/// own default in place.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CudaHooks {
    pub acquire_context: Option<CudaAcquireContextFn>,
    pub release_context: Option<CudaReleaseContextFn>,
    pub get_stream: Option<CudaGetStreamFn>,
    pub get_gpu_device: Option<GetGpuDeviceFn>,
}

impl CudaHooks {
    pub fn is_complete(&self) -> bool {
        self.acquire_context.is_some()
            && self.release_context.is_some()
            && self.get_stream.is_some()
            && self.get_gpu_device.is_some()
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MetalHooks {
    pub acquire_context: Option<MetalAcquireContextFn>,
    pub release_context: Option<MetalReleaseContextFn>,
    pub pre_run: Option<MetalPreRunFn>,
    pub default_device: Option<MetalDefaultDeviceFn>,
    pub new_command_queue: Option<MetalNewCommandQueueFn>,
    pub get_gpu_device: Option<GetGpuDeviceFn>,
}

impl MetalHooks {
    pub fn is_complete(&self) -> bool {
        self.acquire_context.is_some()
            && self.release_context.is_some()
            && self.pre_run.is_some()
            && self.default_device.is_some()
            && self.new_command_queue.is_some()
            && self.get_gpu_device.is_some()
    }
}

#[derive(Default)]
pub struct HookRegistry {
    cuda: RwLock<CudaHooks>,
    metal: RwLock<MetalHooks>,
    metal_stream: RwLock<Option<MetalStreamOps>>,
    memoization_cleanup: RwLock<Option<MemoizationCleanupFn>>,
    config: RwLock<BridgeConfig>,
}

static REGISTRY: LazyLock<HookRegistry> = LazyLock::new(HookRegistry::default);

/// The global registry.
pub fn registry() -> &'static HookRegistry {
    &REGISTRY
}

impl HookRegistry {
    pub fn cuda_hooks(&self) -> CudaHooks {
        *self.cuda.read()
    }

    pub fn metal_hooks(&self) -> MetalHooks {
        *self.metal.read()
    }

    pub fn metal_stream_ops(&self) -> Option<MetalStreamOps> {
        *self.metal_stream.read()
    }

    /// Replace the whole CUDA table, returning the previous one.
    pub fn set_cuda_hooks(&self, hooks: CudaHooks) -> CudaHooks {
        mem::replace(&mut *self.cuda.write(), hooks)
    }

    pub fn set_cuda_acquire_context(&self, handler: CudaAcquireContextFn) -> Option<CudaAcquireContextFn> {
        self.cuda.write().acquire_context.replace(handler)
    }

    pub fn set_cuda_release_context(&self, handler: CudaReleaseContextFn) -> Option<CudaReleaseContextFn> {
        self.cuda.write().release_context.replace(handler)
    }

    pub fn set_cuda_get_stream(&self, handler: CudaGetStreamFn) -> Option<CudaGetStreamFn> {
        self.cuda.write().get_stream.replace(handler)
    }

    pub fn set_cuda_get_gpu_device(&self, handler: GetGpuDeviceFn) -> Option<GetGpuDeviceFn> {
        self.cuda.write().get_gpu_device.replace(handler)
    }

    pub fn set_metal_hooks(&self, hooks: MetalHooks) -> MetalHooks {
        mem::replace(&mut *self.metal.write(), hooks)
    }

    pub fn set_metal_pre_run(&self, handler: MetalPreRunFn) -> Option<MetalPreRunFn> {
        self.metal.write().pre_run.replace(handler)
    }

    /// Install the CUDA bridge hooks.
    pub fn install_cuda_bridge(&self) {
        self.set_cuda_hooks(CudaHooks::bridge());
        info!(backend = %Backend::Cuda, "context bridge installed");
    }

    /// Install the Metal bridge hooks, reaching the host's stream object
    /// through `ops`.
    pub fn install_metal_bridge(&self, ops: MetalStreamOps) {
        *self.metal_stream.write() = Some(ops);
        self.set_metal_hooks(MetalHooks::bridge());
        info!(backend = %Backend::Metal, "context bridge installed");
    }

    /// Whether kernels for `backend` will see the host's device state.
    pub fn is_installed(&self, backend: Backend) -> bool {
        match backend {
            Backend::Cpu => true,
            Backend::Cuda => self.cuda.read().is_complete(),
            Backend::Metal => self.metal.read().is_complete() && self.metal_stream.read().is_some(),
        }
    }

    pub fn uninstall(&self, backend: Backend) {
        match backend {
            Backend::Cpu => {}
            Backend::Cuda => {
                self.set_cuda_hooks(CudaHooks::default());
            }
            Backend::Metal => {
                self.set_metal_hooks(MetalHooks::default());
                *self.metal_stream.write() = None;
            }
        }
        debug!(%backend, "context bridge uninstalled");
    }

    /// Drop every hook and restore the default configuration.
    pub fn reset(&self) {
        for backend in Backend::ALL {
            self.uninstall(backend);
        }
        *self.memoization_cleanup.write() = None;
        *self.config.write() = BridgeConfig::default();
    }

    pub fn set_memoization_cleanup(&self, handler: MemoizationCleanupFn) -> Option<MemoizationCleanupFn> {
        self.memoization_cleanup.write().replace(handler)
    }

    /// Run the registered memoization-cache cleanup. Returns false when none
    /// is registered.
    ///
    /// # Safety
    ///
    /// `user_context` must be whatever the registered cleanup expects for the
    /// current call: null or a live User Context.
    pub unsafe fn flush_memoization_cache(&self, user_context: *mut std::os::raw::c_void) -> bool {
        let cleanup = *self.memoization_cleanup.read();
        match cleanup {
            Some(cleanup) => {
                cleanup(user_context);
                true
            }
            None => {
                debug!("no memoization cleanup registered; flush skipped");
                false
            }
        }
    }

    pub fn config(&self) -> BridgeConfig {
        *self.config.read()
    }

    pub fn set_config(&self, config: BridgeConfig) -> BridgeConfig {
        mem::replace(&mut *self.config.write(), config)
    }
}

/// Runtime-facing entry points.
///
/// Each resolves the hook through the registry and calls it with no lock
/// held, so hooks may consult the registry themselves.
pub mod dispatch {
    use super::registry;
    use crate::abi::{CUcontext, CUstream};
    use crate::error::{BridgeError, Result};
    use std::os::raw::{c_int, c_void};
    use std::ptr;
    use torchbridge_core::Backend;
    use tracing::warn;

    fn missing(backend: Backend, hook: &'static str) -> BridgeError {
        warn!(%backend, hook, "kernel runtime hook dispatched with no bridge installed");
        BridgeError::HooksNotInstalled { backend }
    }

    fn check(hook: &'static str, status: c_int) -> Result<()> {
        if status == 0 {
            Ok(())
        } else {
            Err(BridgeError::HookFailed { hook, status })
        }
    }

    /// # Safety
    ///
    /// `user_context` must be null or point to a live CUDA User Context.
    pub unsafe fn cuda_acquire_context(user_context: *mut c_void, create: bool) -> Result<CUcontext> {
        let hook = registry()
            .cuda_hooks()
            .acquire_context
            .ok_or_else(|| missing(Backend::Cuda, "acquire_context"))?;
        let mut ctx: CUcontext = ptr::null_mut();
        check("cuda_acquire_context", hook(user_context, &mut ctx, create))?;
        Ok(ctx)
    }

    /// # Safety
    ///
    /// As [`cuda_acquire_context`].
    pub unsafe fn cuda_release_context(user_context: *mut c_void) -> Result<()> {
        let hook = registry()
            .cuda_hooks()
            .release_context
            .ok_or_else(|| missing(Backend::Cuda, "release_context"))?;
        check("cuda_release_context", hook(user_context))
    }

    /// # Safety
    ///
    /// As [`cuda_acquire_context`].
    pub unsafe fn cuda_get_stream(user_context: *mut c_void, ctx: CUcontext) -> Result<CUstream> {
        let hook = registry()
            .cuda_hooks()
            .get_stream
            .ok_or_else(|| missing(Backend::Cuda, "get_stream"))?;
        let mut stream: CUstream = ptr::null_mut();
        check("cuda_get_stream", hook(user_context, ctx, &mut stream))?;
        Ok(stream)
    }

    /// Device ordinal for this call. Always 0 on the host.
    ///
    /// # Safety
    ///
    /// `user_context` must be null or point to a live User Context of `backend`.
    pub unsafe fn gpu_device(backend: Backend, user_context: *mut c_void) -> Result<i32> {
        let hook = match backend {
            Backend::Cpu => return Ok(0),
            Backend::Cuda => registry().cuda_hooks().get_gpu_device,
            Backend::Metal => registry().metal_hooks().get_gpu_device,
        };
        let hook = hook.ok_or_else(|| missing(backend, "get_gpu_device"))?;
        Ok(hook(user_context))
    }

    /// Returns `(device, command_queue)`.
    ///
    /// # Safety
    ///
    /// `user_context` must be null or point to a live Metal User Context.
    pub unsafe fn metal_acquire_context(user_context: *mut c_void, create: bool) -> Result<(*mut c_void, *mut c_void)> {
        let hook = registry()
            .metal_hooks()
            .acquire_context
            .ok_or_else(|| missing(Backend::Metal, "acquire_context"))?;
        let mut device = ptr::null_mut();
        let mut queue = ptr::null_mut();
        check("metal_acquire_context", hook(user_context, &mut device, &mut queue, create))?;
        Ok((device, queue))
    }

    /// # Safety
    ///
    /// As [`metal_acquire_context`].
    pub unsafe fn metal_release_context(user_context: *mut c_void) -> Result<()> {
        let hook = registry()
            .metal_hooks()
            .release_context
            .ok_or_else(|| missing(Backend::Metal, "release_context"))?;
        check("metal_release_context", hook(user_context))
    }

    /// # Safety
    ///
    /// As [`metal_acquire_context`].
    pub unsafe fn metal_pre_run(user_context: *mut c_void) -> Result<()> {
        let hook = registry()
            .metal_hooks()
            .pre_run
            .ok_or_else(|| missing(Backend::Metal, "pre_run"))?;
        hook(user_context);
        Ok(())
    }

    /// # Safety
    ///
    /// As [`metal_acquire_context`].
    pub unsafe fn metal_default_device(user_context: *mut c_void) -> Result<*mut c_void> {
        let hook = registry()
            .metal_hooks()
            .default_device
            .ok_or_else(|| missing(Backend::Metal, "default_device"))?;
        Ok(hook(user_context))
    }

    /// # Safety
    ///
    /// As [`metal_acquire_context`].
    pub unsafe fn metal_new_command_queue(device: *mut c_void, user_context: *mut c_void) -> Result<*mut c_void> {
        let hook = registry()
            .metal_hooks()
            .new_command_queue
            .ok_or_else(|| missing(Backend::Metal, "new_command_queue"))?;
        Ok(hook(device, user_context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use serial_test::serial;
    use std::os::raw::{c_int, c_void};
    use std::ptr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    unsafe extern "C" fn fixed_device(_: *mut c_void) -> c_int {
        7
    }

    unsafe extern "C" fn other_device(_: *mut c_void) -> c_int {
        9
    }

    static CLEANUPS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn count_cleanup(_: *mut c_void) {
        CLEANUPS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    #[serial]
    fn setters_return_previous_handler() {
        registry().reset();
        assert!(registry().set_cuda_get_gpu_device(fixed_device).is_none());
        let previous = registry().set_cuda_get_gpu_device(other_device);
        assert_eq!(previous.map(|f| f as usize), Some(fixed_device as usize));
        registry().reset();
    }

    #[test]
    #[serial]
    fn partial_table_is_not_installed() {
        registry().reset();
        registry().set_cuda_get_gpu_device(fixed_device);
        assert!(!registry().is_installed(Backend::Cuda));
        assert!(registry().is_installed(Backend::Cpu));
        assert_eq!(unsafe { dispatch::gpu_device(Backend::Cuda, ptr::null_mut()) }, Ok(7));
        registry().reset();
    }

    #[test]
    #[serial]
    fn dispatch_without_bridge_fails() {
        registry().reset();
        let err = unsafe { dispatch::cuda_acquire_context(ptr::null_mut(), true) }.unwrap_err();
        assert_eq!(err, BridgeError::HooksNotInstalled { backend: Backend::Cuda });
        assert!(unsafe { dispatch::metal_pre_run(ptr::null_mut()) }.is_err());
        assert_eq!(unsafe { dispatch::gpu_device(Backend::Cpu, ptr::null_mut()) }, Ok(0));
    }

    #[test]
    #[serial]
    fn install_and_uninstall_cuda() {
        registry().reset();
        registry().install_cuda_bridge();
        assert!(registry().is_installed(Backend::Cuda));
        assert!(!registry().is_installed(Backend::Metal));
        registry().uninstall(Backend::Cuda);
        assert!(!registry().is_installed(Backend::Cuda));
    }

    #[test]
    #[serial]
    fn memoization_cleanup_runs_when_registered() {
        registry().reset();
        assert!(!unsafe { registry().flush_memoization_cache(ptr::null_mut()) });
        registry().set_memoization_cleanup(count_cleanup);
        let before = CLEANUPS.load(Ordering::SeqCst);
        assert!(unsafe { registry().flush_memoization_cache(ptr::null_mut()) });
        assert_eq!(CLEANUPS.load(Ordering::SeqCst), before + 1);
        registry().reset();
    }

    #[test]
    #[serial]
    fn config_round_trips() {
        registry().reset();
        let previous = registry().set_config(BridgeConfig::strict());
        assert_eq!(previous, BridgeConfig::default());
        assert_eq!(registry().config(), BridgeConfig::strict());
        registry().reset();
        assert_eq!(registry().config(), BridgeConfig::default());
    }
}
