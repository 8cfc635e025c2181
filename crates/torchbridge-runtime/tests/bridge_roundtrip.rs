//! A fake kernel runtime consulting the bridge from inside a wrapped call.

use proptest::prelude::*;
use serial_test::serial;
use std::os::raw::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use torchbridge_core::{Backend, ScalarType};
use torchbridge_runtime::abi::{CUcontext, CUstream};
use torchbridge_runtime::{
    dispatch, registry, BridgeError, HostDevice, HostTensor, MetalStream, MetalStreamOps, TensorDevice,
    WrapperInvocation,
};

struct Tensor {
    shape: Vec<i64>,
    strides: Vec<i64>,
    device: TensorDevice,
    storage: usize,
}

impl Tensor {
    fn vector(len: i64, device: TensorDevice) -> Self {
        Self {
            shape: vec![len],
            strides: vec![1],
            device,
            storage: 0x4000,
        }
    }
}

impl HostTensor for Tensor {
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
        self.storage as *mut c_void
    }
}

static CLEANUPS: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn cleanup(_: *mut c_void) {
    CLEANUPS.fetch_add(1, Ordering::SeqCst);
}

#[test]
#[serial]
fn cuda_kernel_sees_host_context_and_stream() {
    registry().reset();
    registry().install_cuda_bridge();
    registry().set_memoization_cleanup(cleanup);

    let x = Tensor::vector(16, TensorDevice::Cuda(1));
    let host = HostDevice::Cuda {
        device_id: 1,
        context: 0xCAFE as CUcontext,
        stream: 0xBEEF as CUstream,
    };
    let before = CLEANUPS.load(Ordering::SeqCst);

    let status = WrapperInvocation::new("ops::scale", host)
        .tensor("x", &x)
        .flush_cache(true)
        .run(|views, uc| unsafe {
            let ctx = dispatch::cuda_acquire_context(uc, true).unwrap();
            assert_eq!(ctx, 0xCAFE as CUcontext);
            assert_eq!(dispatch::cuda_get_stream(uc, ctx).unwrap(), 0xBEEF as CUstream);
            assert_eq!(dispatch::gpu_device(Backend::Cuda, uc).unwrap(), 1);
            dispatch::cuda_release_context(uc).unwrap();
            assert_eq!(views[0].device_ptr(), 0x4000 as *mut c_void);
            0
        })
        .unwrap();

    assert_eq!(status, 0);
    assert_eq!(CLEANUPS.load(Ordering::SeqCst), before + 1);
    registry().reset();
}

#[test]
#[serial]
fn cpu_kernel_gets_null_context_and_defaults() {
    registry().reset();
    registry().install_cuda_bridge();
    let x = Tensor::vector(4, TensorDevice::Host);
    WrapperInvocation::new("f", HostDevice::Cpu)
        .tensor("x", &x)
        .run(|_, uc| unsafe {
            assert!(uc.is_null());
            assert!(dispatch::cuda_acquire_context(uc, true).unwrap().is_null());
            assert!(dispatch::cuda_get_stream(uc, std::ptr::null_mut()).unwrap().is_null());
            assert_eq!(dispatch::gpu_device(Backend::Cuda, uc).unwrap(), 0);
            0
        })
        .unwrap();
    registry().reset();
}

#[derive(Default)]
struct HostStream {
    commits: AtomicUsize,
}

impl MetalStream for HostStream {
    fn device(&self) -> *mut c_void {
        0xDE as *mut c_void
    }
    fn command_queue(&self) -> *mut c_void {
        0xCE as *mut c_void
    }
    fn commit(&self, _flush: bool) {
        self.commits.fetch_add(1, Ordering::SeqCst);
    }
    fn dispatch_sync(&self, work: &mut dyn FnMut()) {
        work();
    }
}

#[test]
#[serial]
fn metal_kernel_commits_host_work_first() {
    registry().reset();
    registry().install_metal_bridge(MetalStreamOps::for_stream::<HostStream>());

    let stream = HostStream::default();
    let x = Tensor::vector(8, TensorDevice::Mps(0));
    let host = HostDevice::Metal {
        device_index: 0,
        stream: &stream as *const HostStream as *mut c_void,
    };

    WrapperInvocation::new("f", host)
        .tensor("x", &x)
        .run(|views, uc| unsafe {
            dispatch::metal_pre_run(uc).unwrap();
            let device = dispatch::metal_default_device(uc).unwrap();
            assert_eq!(device, 0xDE as *mut c_void);
            assert_eq!(dispatch::metal_new_command_queue(device, uc).unwrap(), 0xCE as *mut c_void);
            assert_eq!(views[0].host_ptr(), 0x4000 as *mut c_void);
            0
        })
        .unwrap();

    assert_eq!(stream.commits.load(Ordering::SeqCst), 1);
    registry().reset();
}

#[test]
#[serial]
fn metal_without_bridge_is_refused() {
    registry().reset();
    let stream = HostStream::default();
    let host = HostDevice::Metal {
        device_index: 0,
        stream: &stream as *const HostStream as *mut c_void,
    };
    let err = WrapperInvocation::new("f", host).run(|_, _| 0).unwrap_err();
    assert_eq!(err, BridgeError::HooksNotInstalled { backend: Backend::Metal });
}

#[test]
#[serial]
fn metal_bridge_never_sees_a_null_stream() {
    registry().reset();
    registry().install_metal_bridge(MetalStreamOps::for_stream::<HostStream>());
    let x = Tensor::vector(8, TensorDevice::Mps(0));
    let host = HostDevice::Metal {
        device_index: 0,
        stream: std::ptr::null_mut(),
    };
    let err = WrapperInvocation::new("f", host)
        .tensor("x", &x)
        .run(|_, _| panic!("kernel ran without the host stream"))
        .unwrap_err();
    assert_eq!(err, BridgeError::InvalidUserContext("null Metal stream"));
    registry().reset();
}

proptest! {
    #[test]
    #[serial]
    fn ordinal_round_trips_through_the_bridge(k in 0i32..16) {
        registry().install_cuda_bridge();
        let x = Tensor::vector(1, TensorDevice::Cuda(k));
        let host = HostDevice::Cuda {
            device_id: k,
            context: std::ptr::null_mut(),
            stream: std::ptr::null_mut(),
        };
        let mut seen = -1;
        WrapperInvocation::new("f", host)
            .tensor("x", &x)
            .run(|_, uc| {
                seen = unsafe { dispatch::gpu_device(Backend::Cuda, uc) }.unwrap();
                0
            })
            .unwrap();
        prop_assert_eq!(seen, k);
    }
}
