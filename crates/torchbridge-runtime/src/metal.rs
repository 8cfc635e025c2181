//! Metal context bridge.
//!
//! The host's stream object owns the device and command queue kernels must
//! use. The bridge never looks inside it: the host registers a
//! [`MetalStreamOps`] table once, and every hook reaches the stream named by
//! the current [`MetalUserContext`] through that table.

use crate::abi::HookStatus;
use crate::config::DeviceMismatchPolicy;
use crate::error::{BridgeError, Result};
use crate::registry::{registry, MetalHooks};
use crate::user_context::MetalUserContext;
use std::os::raw::{c_int, c_void};
use std::ptr;
use tracing::{error, trace, warn};

/// A host stream the bridge can drive.
pub trait MetalStream {
    /// `id<MTLDevice>` the stream is bound to.
    fn device(&self) -> *mut c_void;
    /// `id<MTLCommandQueue>` the stream submits to.
    fn command_queue(&self) -> *mut c_void;
    /// Submit already-encoded work; block until it completes when `flush`.
    fn commit(&self, flush: bool);
    /// Run `work` on the stream's serial queue and return once it has run.
    fn dispatch_sync(&self, work: &mut dyn FnMut());
}

/// C view of a [`MetalStream`]; `stream` is always the pointer carried by the
/// User Context.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MetalStreamOps {
    pub device: unsafe extern "C" fn(stream: *mut c_void) -> *mut c_void,
    pub command_queue: unsafe extern "C" fn(stream: *mut c_void) -> *mut c_void,
    pub commit: unsafe extern "C" fn(stream: *mut c_void, flush: bool),
    pub dispatch_sync:
        unsafe extern "C" fn(stream: *mut c_void, context: *mut c_void, work: unsafe extern "C" fn(*mut c_void)),
}

impl MetalStreamOps {
    /// Table for hosts whose User Context `stream` points at an `S`.
    pub fn for_stream<S: MetalStream>() -> Self {
        Self {
            device: stream_device::<S>,
            command_queue: stream_command_queue::<S>,
            commit: stream_commit::<S>,
            dispatch_sync: stream_dispatch_sync::<S>,
        }
    }
}

unsafe extern "C" fn stream_device<S: MetalStream>(stream: *mut c_void) -> *mut c_void {
    (*(stream as *const S)).device()
}

unsafe extern "C" fn stream_command_queue<S: MetalStream>(stream: *mut c_void) -> *mut c_void {
    (*(stream as *const S)).command_queue()
}

unsafe extern "C" fn stream_commit<S: MetalStream>(stream: *mut c_void, flush: bool) {
    (*(stream as *const S)).commit(flush)
}

unsafe extern "C" fn stream_dispatch_sync<S: MetalStream>(
    stream: *mut c_void,
    context: *mut c_void,
    work: unsafe extern "C" fn(*mut c_void),
) {
    (*(stream as *const S)).dispatch_sync(&mut || work(context))
}

impl MetalHooks {
    /// The bridge implementation of every Metal hook.
    pub fn bridge() -> Self {
        Self {
            acquire_context: Some(acquire_context),
            release_context: Some(release_context),
            pre_run: Some(pre_run),
            default_device: Some(default_device),
            new_command_queue: Some(new_command_queue),
            get_gpu_device: Some(get_gpu_device),
        }
    }
}

/// `Ok(None)` on the pure-host path (no User Context or no stream).
unsafe fn host_stream(user_context: *mut c_void) -> std::result::Result<Option<(MetalStreamOps, *mut c_void)>, HookStatus> {
    let Some(record) = MetalUserContext::from_user_context(user_context) else {
        return Ok(None);
    };
    if record.stream.is_null() {
        return Ok(None);
    }
    match registry().metal_stream_ops() {
        Some(ops) => Ok(Some((ops, record.stream))),
        None => {
            warn!("metal user context present but no stream ops are registered");
            Err(HookStatus::NotInstalled)
        }
    }
}

/// Compare the device the runtime asked for with the host stream's device.
/// A null request means "whatever the stream uses" and always matches.
pub fn check_device_match(requested: *mut c_void, host: *mut c_void, policy: DeviceMismatchPolicy) -> Result<()> {
    if requested.is_null() || requested == host {
        return Ok(());
    }
    error!(
        requested = ?requested,
        host = ?host,
        ?policy,
        "devices don't match; the host stream's device is authoritative"
    );
    match policy {
        DeviceMismatchPolicy::Report => Ok(()),
        DeviceMismatchPolicy::Abort => Err(BridgeError::DeviceMismatch {
            requested: requested as usize,
            host: host as usize,
        }),
    }
}

/// # Safety
///
/// `user_context` must be null or point to a live [`MetalUserContext`];
/// `device` and `queue` must be null or writable.
pub unsafe extern "C" fn acquire_context(
    user_context: *mut c_void,
    device: *mut *mut c_void,
    queue: *mut *mut c_void,
    _create: bool,
) -> c_int {
    if device.is_null() || queue.is_null() {
        return HookStatus::InvalidArgument.code();
    }
    match host_stream(user_context) {
        Ok(Some((ops, stream))) => {
            *device = (ops.device)(stream);
            *queue = (ops.command_queue)(stream);
        }
        Ok(None) => {
            *device = ptr::null_mut();
            *queue = ptr::null_mut();
        }
        Err(status) => return status.code(),
    }
    trace!(device = ?*device, queue = ?*queue, "metal acquire_context");
    HookStatus::Success.code()
}

/// # Safety
///
/// Never dereferences `user_context`.
pub unsafe extern "C" fn release_context(_user_context: *mut c_void) -> c_int {
    HookStatus::Success.code()
}

unsafe extern "C" fn sync_stream(user_context: *mut c_void) {
    if let Ok(Some((ops, stream))) = host_stream(user_context) {
        (ops.commit)(stream, false);
    }
}

/// Commit whatever the host has queued but not yet submitted, from the
/// stream's own queue, so the kernel's work lands after it.
///
/// # Safety
///
/// `user_context` must be null or point to a live [`MetalUserContext`].
pub unsafe extern "C" fn pre_run(user_context: *mut c_void) {
    match host_stream(user_context) {
        Ok(Some((ops, stream))) => {
            trace!(stream = ?stream, "metal pre_run commit");
            (ops.dispatch_sync)(stream, user_context, sync_stream);
        }
        Ok(None) => {}
        Err(_) => warn!("metal pre_run skipped; queued host work may be ordered after the kernel"),
    }
}

/// # Safety
///
/// As [`pre_run`].
pub unsafe extern "C" fn default_device(user_context: *mut c_void) -> *mut c_void {
    match host_stream(user_context) {
        Ok(Some((ops, stream))) => (ops.device)(stream),
        _ => ptr::null_mut(),
    }
}

/// Hand back the host stream's queue instead of creating one.
///
/// # Safety
///
/// As [`pre_run`].
pub unsafe extern "C" fn new_command_queue(device: *mut c_void, user_context: *mut c_void) -> *mut c_void {
    let Ok(Some((ops, stream))) = host_stream(user_context) else {
        return ptr::null_mut();
    };
    let host_device = (ops.device)(stream);
    if let Err(err) = check_device_match(device, host_device, registry().config().mismatch_policy) {
        error!(%err, "aborting on device mismatch");
        std::process::abort();
    }
    (ops.command_queue)(stream)
}

/// # Safety
///
/// `user_context` must be null or point to a live [`MetalUserContext`].
pub unsafe extern "C" fn get_gpu_device(user_context: *mut c_void) -> c_int {
    MetalUserContext::from_user_context(user_context).map_or(0, |record| record.device_id)
}

/// C entry point for [`crate::HookRegistry::install_metal_bridge`].
///
/// # Safety
///
/// `ops` must be null or point to a valid [`MetalStreamOps`].
#[no_mangle]
pub unsafe extern "C" fn torchbridge_install_metal_bridge(ops: *const MetalStreamOps) -> c_int {
    match ops.as_ref() {
        Some(ops) => {
            registry().install_metal_bridge(*ops);
            HookStatus::Success.code()
        }
        None => HookStatus::InvalidArgument.code(),
    }
}

#[cfg(target_vendor = "apple")]
pub use native::NativeMetalStream;

#[cfg(target_vendor = "apple")]
mod native {
    use super::MetalStream;
    use ::metal::foreign_types::ForeignType;
    use ::metal::{CommandBuffer, CommandBufferRef, CommandQueue, Device};
    use parking_lot::Mutex;
    use std::os::raw::c_void;

    /// A stream over one Metal device and command queue, for Rust hosts.
    ///
    /// Work encoded through [`with_command_buffer`](Self::with_command_buffer)
    /// stays pending until the next commit. `dispatch_sync` runs on the
    /// calling thread under the stream's submission lock.
    pub struct NativeMetalStream {
        device: Device,
        queue: CommandQueue,
        pending: Mutex<Option<CommandBuffer>>,
        submission: Mutex<()>,
    }

    impl NativeMetalStream {
        pub fn new(device: Device) -> Self {
            let queue = device.new_command_queue();
            Self {
                device,
                queue,
                pending: Mutex::new(None),
                submission: Mutex::new(()),
            }
        }

        pub fn system_default() -> Option<Self> {
            Device::system_default().map(Self::new)
        }

        pub fn metal_device(&self) -> &Device {
            &self.device
        }

        /// Encode into the pending command buffer, opening one if needed.
        pub fn with_command_buffer<R>(&self, encode: impl FnOnce(&CommandBufferRef) -> R) -> R {
            let mut pending = self.pending.lock();
            let buffer = pending.get_or_insert_with(|| self.queue.new_command_buffer().to_owned());
            encode(buffer)
        }

        pub fn has_pending_work(&self) -> bool {
            self.pending.lock().is_some()
        }
    }

    impl MetalStream for NativeMetalStream {
        fn device(&self) -> *mut c_void {
            self.device.as_ptr() as *mut c_void
        }

        fn command_queue(&self) -> *mut c_void {
            self.queue.as_ptr() as *mut c_void
        }

        fn commit(&self, flush: bool) {
            let Some(buffer) = self.pending.lock().take() else {
                return;
            };
            buffer.commit();
            if flush {
                buffer.wait_until_completed();
            }
        }

        fn dispatch_sync(&self, work: &mut dyn FnMut()) {
            let _submission = self.submission.lock();
            work();
        }
    }
}
