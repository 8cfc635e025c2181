//! Rust-side wrapper invocation.
//!
//! [`WrapperInvocation`] does for a Rust host what a generated `_th_` wrapper
//! does for PyTorch: lend the host's device state to the kernel through a
//! User Context, check every tensor, wrap it without copying, call the
//! kernel and enforce the post-call invariants.

use crate::abi::{CUcontext, CUstream};
use crate::buffer::{BufferView, HostTensor, TensorDevice};
use crate::error::{BridgeError, Result};
use crate::registry::registry;
use crate::user_context::{CudaUserContext, MetalUserContext};
use std::os::raw::c_void;
use std::ptr;
use std::time::Instant;
use torchbridge_core::Backend;
use torchbridge_tracing::perf_span;
use tracing::{debug, error, warn};

/// The host framework's current device state for one call.
#[derive(Debug, Clone, Copy)]
pub enum HostDevice {
    Cpu,
    Cuda {
        device_id: i32,
        context: CUcontext,
        stream: CUstream,
    },
    Metal {
        device_index: i32,
        /// Host stream object, as understood by the registered stream ops.
        stream: *mut c_void,
    },
}

impl HostDevice {
    pub fn backend(&self) -> Backend {
        match self {
            HostDevice::Cpu => Backend::Cpu,
            HostDevice::Cuda { .. } => Backend::Cuda,
            HostDevice::Metal { .. } => Backend::Metal,
        }
    }
}

pub struct WrapperInvocation<'a> {
    kernel: String,
    device: HostDevice,
    tensors: Vec<(String, &'a dyn HostTensor)>,
    flush_cache: bool,
}

impl<'a> WrapperInvocation<'a> {
    pub fn new(kernel: impl Into<String>, device: HostDevice) -> Self {
        Self {
            kernel: kernel.into(),
            device,
            tensors: Vec::new(),
            flush_cache: false,
        }
    }

    /// Add the next buffer argument, in kernel order.
    pub fn tensor(mut self, name: impl Into<String>, tensor: &'a dyn HostTensor) -> Self {
        self.tensors.push((name.into(), tensor));
        self
    }

    /// Flush the memoization cache after the kernel returns.
    pub fn flush_cache(mut self, flush: bool) -> Self {
        self.flush_cache = flush;
        self
    }

    pub fn kernel(&self) -> &str {
        &self.kernel
    }

    pub fn backend(&self) -> Backend {
        self.device.backend()
    }

    /// Every contiguity check, then every residency check.
    pub fn check_preconditions(&self) -> Result<()> {
        for (name, tensor) in &self.tensors {
            if !tensor.is_contiguous() {
                return Err(BridgeError::NonContiguous { buffer: name.clone() });
            }
        }
        if let HostDevice::Cuda { device_id, .. } = self.device {
            for (name, tensor) in &self.tensors {
                let actual = tensor.device();
                if actual != TensorDevice::Cuda(device_id) {
                    return Err(BridgeError::WrongDevice {
                        buffer: name.clone(),
                        expected: device_id,
                        actual,
                    });
                }
            }
        }
        Ok(())
    }

    /// Run `kernel` with one view per tensor and the opaque User Context.
    /// Returns 0; every failure is an error and the kernel may not have run.
    pub fn run<F>(&self, kernel: F) -> Result<i32>
    where
        F: FnOnce(&mut [BufferView<'a>], *mut c_void) -> i32,
    {
        match self.device {
            HostDevice::Cpu => self.call(ptr::null_mut(), kernel),
            HostDevice::Cuda {
                device_id,
                mut context,
                mut stream,
            } => {
                let mut record = CudaUserContext::new(device_id, &mut context, &mut stream);
                self.call(record.as_user_context(), kernel)
            }
            HostDevice::Metal { device_index, stream } => {
                // A null stream would send the kernel runtime down its own
                // device and queue instead of the host's.
                if stream.is_null() {
                    return Err(BridgeError::InvalidUserContext("null Metal stream"));
                }
                let mut record = MetalUserContext::new(device_index, stream);
                self.call(record.as_user_context(), kernel)
            }
        }
    }

    /// [`run`](Self::run), treating any failure as fatal.
    ///
    /// # Panics
    ///
    /// On any precondition, kernel-status or post-condition failure.
    pub fn run_or_abort<F>(&self, kernel: F) -> i32
    where
        F: FnOnce(&mut [BufferView<'a>], *mut c_void) -> i32,
    {
        match self.run(kernel) {
            Ok(status) => status,
            Err(err) => {
                error!(kernel = %self.kernel, backend = %self.backend(), %err, "wrapper call failed");
                panic!("{}: {err}", self.kernel);
            }
        }
    }

    fn call<F>(&self, user_context: *mut c_void, kernel: F) -> Result<i32>
    where
        F: FnOnce(&mut [BufferView<'a>], *mut c_void) -> i32,
    {
        let backend = self.backend();
        let _span = perf_span!("invoke_kernel", kernel = self.kernel.as_str(), backend = backend.name());
        let start = Instant::now();

        self.check_preconditions()?;
        if !registry().is_installed(backend) {
            return Err(BridgeError::HooksNotInstalled { backend });
        }

        let mut views: Vec<BufferView<'a>> = self
            .tensors
            .iter()
            .map(|(name, tensor)| match backend {
                Backend::Cuda => BufferView::wrap_device(name, *tensor, Backend::Cuda),
                Backend::Cpu | Backend::Metal => BufferView::wrap_host(name, *tensor),
            })
            .collect();

        debug!(kernel = %self.kernel, %backend, buffers = views.len(), "invoking kernel");
        let status = kernel(&mut views, user_context);
        if status != 0 {
            return Err(BridgeError::KernelFailed {
                kernel: self.kernel.clone(),
                status,
            });
        }

        if backend == Backend::Cuda {
            for view in &mut views {
                if view.host_dirty() {
                    return Err(BridgeError::HostDirty {
                        buffer: view.name().to_string(),
                    });
                }
                view.device_detach_native();
            }
        }

        if self.flush_cache {
            self.flush(user_context);
        }

        torchbridge_tracing::performance::record_invocation(
            &self.kernel,
            backend.name(),
            views.len(),
            start.elapsed().as_micros() as u64,
        );
        Ok(0)
    }

    /// Flush the kernel runtime's memoization cache. Returns false when no
    /// cleanup is registered, so the requested flush did not happen.
    fn flush(&self, user_context: *mut c_void) -> bool {
        // SAFETY: `user_context` is null or the record built in `run`,
        // which outlives this call.
        let flushed = unsafe { registry().flush_memoization_cache(user_context) };
        if !flushed {
            warn!(kernel = %self.kernel, "cache flush requested but no memoization cleanup is registered");
        }
        flushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::cell::Cell;
    use torchbridge_core::ScalarType;

    struct Fake {
        shape: Vec<i64>,
        strides: Vec<i64>,
        device: TensorDevice,
    }

    impl Fake {
        fn on(device: TensorDevice) -> Self {
            Self {
                shape: vec![2, 2],
                strides: vec![2, 1],
                device,
            }
        }

        fn strided(device: TensorDevice) -> Self {
            Self {
                strides: vec![1, 2],
                ..Self::on(device)
            }
        }
    }

    impl HostTensor for Fake {
        fn scalar_type(&self) -> ScalarType {
            ScalarType::F32
        }
        fn shape(&self) -> &[i64] {
            &self.shape
        }
        fn strides(&self) -> &[i64] {
            &self.strides
        }
        fn device(&self) -> TensorDevice {
            self.device
        }
        fn data_ptr(&self) -> *mut c_void {
            0x1000 as *mut c_void
        }
    }

    fn cuda(device_id: i32) -> HostDevice {
        HostDevice::Cuda {
            device_id,
            context: 0xC as CUcontext,
            stream: 0x5 as CUstream,
        }
    }

    #[test]
    fn cpu_call_passes_null_context() {
        let x = Fake::on(TensorDevice::Host);
        let status = WrapperInvocation::new("f", HostDevice::Cpu)
            .tensor("x", &x)
            .run(|views, uc| {
                assert!(uc.is_null());
                assert_eq!(views.len(), 1);
                assert_eq!(views[0].host_ptr(), 0x1000 as *mut c_void);
                0
            })
            .unwrap();
        assert_eq!(status, 0);
    }

    #[test]
    fn contiguity_is_checked_before_residency() {
        let a = Fake::on(TensorDevice::Host);
        let b = Fake::strided(TensorDevice::Cuda(0));
        let called = Cell::new(false);
        let err = WrapperInvocation::new("f", cuda(0))
            .tensor("a", &a)
            .tensor("b", &b)
            .run(|_, _| {
                called.set(true);
                0
            })
            .unwrap_err();
        assert_eq!(err, BridgeError::NonContiguous { buffer: "b".into() });
        assert!(!called.get());
    }

    #[test]
    fn residency_follows_the_active_device() {
        let a = Fake::on(TensorDevice::Cuda(1));
        let err = WrapperInvocation::new("f", cuda(0))
            .tensor("a", &a)
            .check_preconditions()
            .unwrap_err();
        assert_eq!(
            err,
            BridgeError::WrongDevice {
                buffer: "a".into(),
                expected: 0,
                actual: TensorDevice::Cuda(1)
            }
        );
    }

    #[test]
    fn kernel_status_is_checked() {
        let err = WrapperInvocation::new("f", HostDevice::Cpu).run(|_, _| 3).unwrap_err();
        assert_eq!(err, BridgeError::KernelFailed { kernel: "f".into(), status: 3 });
    }

    #[test]
    #[should_panic(expected = "f: kernel f failed with status -1")]
    fn run_or_abort_panics() {
        WrapperInvocation::new("f", HostDevice::Cpu).run_or_abort(|_, _| -1);
    }

    #[test]
    #[serial]
    fn gpu_call_requires_installed_bridge() {
        registry().reset();
        let a = Fake::on(TensorDevice::Cuda(0));
        let called = Cell::new(false);
        let err = WrapperInvocation::new("f", cuda(0))
            .tensor("a", &a)
            .run(|_, _| {
                called.set(true);
                0
            })
            .unwrap_err();
        assert_eq!(err, BridgeError::HooksNotInstalled { backend: Backend::Cuda });
        assert!(!called.get());
    }

    #[test]
    #[serial]
    fn null_metal_stream_is_rejected() {
        registry().reset();
        let a = Fake::on(TensorDevice::Mps(0));
        let called = Cell::new(false);
        let err = WrapperInvocation::new("f", HostDevice::Metal {
            device_index: 0,
            stream: ptr::null_mut(),
        })
        .tensor("a", &a)
        .run(|_, _| {
            called.set(true);
            0
        })
        .unwrap_err();
        assert_eq!(err, BridgeError::InvalidUserContext("null Metal stream"));
        assert!(!called.get());
    }

    unsafe extern "C" fn noop_cleanup(_user_context: *mut c_void) {}

    #[test]
    #[serial]
    fn flush_reports_missing_cleanup() {
        registry().reset();
        let invocation = WrapperInvocation::new("f", HostDevice::Cpu).flush_cache(true);
        assert!(!invocation.flush(ptr::null_mut()));

        registry().set_memoization_cleanup(noop_cleanup);
        assert!(invocation.flush(ptr::null_mut()));
        assert_eq!(invocation.run(|_, _| 0).unwrap(), 0);
        registry().reset();
    }

    #[test]
    #[serial]
    fn cuda_post_checks_detach_and_reject_dirty_host() {
        registry().reset();
        registry().install_cuda_bridge();
        let a = Fake::on(TensorDevice::Cuda(0));

        let invocation = WrapperInvocation::new("f", cuda(0)).tensor("a", &a);
        invocation
            .run(|views, _| {
                assert!(views[0].is_device_attached());
                assert!(views[0].host_ptr().is_null());
                0
            })
            .unwrap();

        let err = invocation
            .run(|views, _| {
                views[0].set_host_dirty(true);
                0
            })
            .unwrap_err();
        assert_eq!(err, BridgeError::HostDirty { buffer: "a".into() });
        registry().reset();
    }
}
