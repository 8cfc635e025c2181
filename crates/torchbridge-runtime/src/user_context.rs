//! User Context records.
//!
//! A User Context is built on the caller's stack for exactly one wrapper call
//! and handed to the kernel as an opaque pointer. It borrows everything it
//! names; nothing here owns a device, context or stream.

use crate::abi::{CUcontext, CUstream};
use std::os::raw::{c_int, c_void};
use std::ptr;

/// Layout-identical to the struct the generated CUDA wrapper declares.
#[repr(C)]
#[derive(Debug)]
pub struct CudaUserContext {
    pub device_id: c_int,
    pub cuda_context: *mut CUcontext,
    pub stream: *mut CUstream,
}

impl CudaUserContext {
    pub fn new(device_id: c_int, cuda_context: &mut CUcontext, stream: &mut CUstream) -> Self {
        Self {
            device_id,
            cuda_context,
            stream,
        }
    }

    pub fn as_user_context(&mut self) -> *mut c_void {
        self as *mut Self as *mut c_void
    }

    /// # Safety
    ///
    /// `user_context` must be null or point to a live `CudaUserContext`.
    pub unsafe fn from_user_context<'a>(user_context: *mut c_void) -> Option<&'a Self> {
        (user_context as *const Self).as_ref()
    }

    /// Borrowed driver context, or null when the record carries none.
    pub fn context(&self) -> CUcontext {
        // SAFETY: a non-null `cuda_context` points at the wrapper's local.
        unsafe { self.cuda_context.as_ref().copied().unwrap_or(ptr::null_mut()) }
    }

    pub fn stream(&self) -> CUstream {
        // SAFETY: as above.
        unsafe { self.stream.as_ref().copied().unwrap_or(ptr::null_mut()) }
    }
}

/// Layout-identical to the struct the generated Metal wrapper declares.
/// `stream` is the host framework's stream object, opaque to the bridge.
#[repr(C)]
#[derive(Debug)]
pub struct MetalUserContext {
    pub device_id: c_int,
    pub stream: *mut c_void,
}

impl MetalUserContext {
    pub fn new(device_id: c_int, stream: *mut c_void) -> Self {
        Self { device_id, stream }
    }

    pub fn as_user_context(&mut self) -> *mut c_void {
        self as *mut Self as *mut c_void
    }

    /// # Safety
    ///
    /// `user_context` must be null or point to a live `MetalUserContext`.
    pub unsafe fn from_user_context<'a>(user_context: *mut c_void) -> Option<&'a Self> {
        (user_context as *const Self).as_ref()
    }
}
