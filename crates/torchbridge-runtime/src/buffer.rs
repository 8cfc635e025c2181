//! Host tensors and the non-owning views kernels see.

use std::fmt;
use std::marker::PhantomData;
use std::os::raw::c_void;
use std::ptr;
use torchbridge_core::{Backend, ScalarType};

/// Where a host tensor's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorDevice {
    Host,
    Cuda(i32),
    Mps(i32),
}

impl fmt::Display for TensorDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorDevice::Host => f.write_str("cpu"),
            TensorDevice::Cuda(index) => write!(f, "cuda:{index}"),
            TensorDevice::Mps(index) => write!(f, "mps:{index}"),
        }
    }
}

/// What a wrapper needs from a host framework's tensor.
pub trait HostTensor {
    fn scalar_type(&self) -> ScalarType;

    fn shape(&self) -> &[i64];

    /// Strides in elements.
    fn strides(&self) -> &[i64];

    fn device(&self) -> TensorDevice;

    /// First element of the storage, on whatever device holds it.
    fn data_ptr(&self) -> *mut c_void;

    /// Row-major density. Size-1 dimensions may carry any stride; a shape
    /// whose element count overflows `i64` is never dense.
    fn is_contiguous(&self) -> bool {
        let (shape, strides) = (self.shape(), self.strides());
        if shape.len() != strides.len() {
            return false;
        }
        if shape.iter().any(|&extent| extent == 0) {
            return true;
        }
        let mut expected = 1i64;
        for (&extent, &stride) in shape.iter().zip(strides).rev() {
            if extent != 1 && stride != expected {
                return false;
            }
            expected = match expected.checked_mul(extent) {
                Some(next) => next,
                None => return false,
            };
        }
        true
    }
}

/// A non-owning view over one tensor's storage, valid while the tensor is
/// borrowed. Building one never allocates or copies element data.
#[derive(Debug)]
pub struct BufferView<'a> {
    name: String,
    ty: ScalarType,
    shape: Vec<i64>,
    strides: Vec<i64>,
    host: *mut c_void,
    device: *mut c_void,
    device_backend: Option<Backend>,
    host_dirty: bool,
    device_dirty: bool,
    _tensor: PhantomData<&'a dyn HostTensor>,
}

impl<'a> BufferView<'a> {
    fn from_tensor(name: &str, tensor: &'a dyn HostTensor) -> Self {
        Self {
            name: name.to_string(),
            ty: tensor.scalar_type(),
            shape: tensor.shape().to_vec(),
            strides: tensor.strides().to_vec(),
            host: ptr::null_mut(),
            device: ptr::null_mut(),
            device_backend: None,
            host_dirty: false,
            device_dirty: false,
            _tensor: PhantomData,
        }
    }

    /// View over host-addressable storage.
    pub fn wrap_host(name: &str, tensor: &'a dyn HostTensor) -> Self {
        Self {
            host: tensor.data_ptr(),
            ..Self::from_tensor(name, tensor)
        }
    }

    /// View over device storage, attached as a native allocation the kernel
    /// runtime must not free.
    pub fn wrap_device(name: &str, tensor: &'a dyn HostTensor, backend: Backend) -> Self {
        Self {
            device: tensor.data_ptr(),
            device_backend: Some(backend),
            ..Self::from_tensor(name, tensor)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.ty
    }

    pub fn dimensions(&self) -> usize {
        self.shape.len()
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn strides(&self) -> &[i64] {
        &self.strides
    }

    /// Saturates at `usize::MAX`.
    pub fn number_of_elements(&self) -> usize {
        self.shape
            .iter()
            .try_fold(1usize, |acc, &extent| acc.checked_mul(extent.max(0) as usize))
            .unwrap_or(usize::MAX)
    }

    pub fn size_in_bytes(&self) -> usize {
        self.number_of_elements().saturating_mul(self.ty.bytes())
    }

    pub fn host_ptr(&self) -> *mut c_void {
        self.host
    }

    pub fn device_ptr(&self) -> *mut c_void {
        self.device
    }

    pub fn device_backend(&self) -> Option<Backend> {
        self.device_backend
    }

    pub fn is_device_attached(&self) -> bool {
        self.device_backend.is_some()
    }

    /// True when the host copy is newer than the device copy.
    pub fn host_dirty(&self) -> bool {
        self.host_dirty
    }

    pub fn set_host_dirty(&mut self, dirty: bool) {
        self.host_dirty = dirty;
    }

    pub fn device_dirty(&self) -> bool {
        self.device_dirty
    }

    pub fn set_device_dirty(&mut self, dirty: bool) {
        self.device_dirty = dirty;
    }

    /// Give the device allocation back to the host framework.
    pub fn device_detach_native(&mut self) {
        self.device = ptr::null_mut();
        self.device_backend = None;
        self.device_dirty = false;
    }
}
