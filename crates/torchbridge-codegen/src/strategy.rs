//! Per-backend emission strategies.
//!
//! Each backend contributes its includes, the User Context setup, the
//! residency checks, the view constructor and the post-call invariants. The
//! generator drives them in a fixed order and never branches on the backend
//! itself.

use crate::emitter::CodeEmitter;
use crate::plan::PlannedArg;
use torchbridge_core::Backend;

pub trait BackendStrategy: Sync {
    fn backend(&self) -> Backend;

    /// Backend-specific `#include` targets, quotes or brackets included.
    fn includes(&self) -> &'static [&'static str];

    /// Locals the context setup declares; arguments may not reuse them.
    fn reserved_locals(&self) -> &'static [&'static str];

    /// Unqualified functions and types the emitted body names; a parameter
    /// with one of these names would hide it.
    fn referenced_names(&self) -> &'static [&'static str] {
        &[]
    }

    /// Declare `__user_context` (and whatever it points at).
    fn emit_context_setup(&self, out: &mut CodeEmitter);

    fn emit_residency_check(&self, _out: &mut CodeEmitter, _buffer: &PlannedArg) {}

    /// Expression building the non-owning runtime view over `buffer`'s tensor.
    fn wrap_expression(&self, buffer: &PlannedArg) -> String;

    fn emit_post_checks(&self, _out: &mut CodeEmitter, _buffers: &[&PlannedArg]) {}

    /// Argument handed to the memoization-cache cleanup call.
    fn cache_flush_argument(&self) -> &'static str;

    /// Whether a kernel without a user-context parameter can be wrapped at all.
    fn requires_context_parameter(&self) -> bool {
        false
    }
}

pub fn strategy_for(backend: Backend) -> &'static dyn BackendStrategy {
    match backend {
        Backend::Cpu => &CpuStrategy,
        Backend::Cuda => &CudaStrategy,
        Backend::Metal => &MetalStrategy,
    }
}

fn host_wrap(buffer: &PlannedArg) -> String {
    format!("Halide::PyTorch::wrap<{}>({})", buffer.element_c_type(), buffer.name)
}

pub struct CpuStrategy;

impl BackendStrategy for CpuStrategy {
    fn backend(&self) -> Backend {
        Backend::Cpu
    }

    fn includes(&self) -> &'static [&'static str] {
        &[]
    }

    fn reserved_locals(&self) -> &'static [&'static str] {
        &[]
    }

    fn emit_context_setup(&self, out: &mut CodeEmitter) {
        out.line("void* __user_context = nullptr;");
        out.blank();
    }

    fn wrap_expression(&self, buffer: &PlannedArg) -> String {
        host_wrap(buffer)
    }

    fn cache_flush_argument(&self) -> &'static str {
        "nullptr"
    }
}

/// Borrows the host's current device, driver context and stream.
pub struct CudaStrategy;

impl BackendStrategy for CudaStrategy {
    fn backend(&self) -> Backend {
        Backend::Cuda
    }

    fn includes(&self) -> &'static [&'static str] {
        &["\"ATen/cuda/CUDAContext.h\""]
    }

    fn reserved_locals(&self) -> &'static [&'static str] {
        &["device_id", "ctx", "res", "stream", "user_ctx"]
    }

    fn referenced_names(&self) -> &'static [&'static str] {
        &["cuCtxGetCurrent", "CUcontext", "CUresult", "cudaStream_t", "UserContext"]
    }

    fn emit_context_setup(&self, out: &mut CodeEmitter) {
        out.line("// Setup CUDA");
        out.line("int device_id = at::cuda::current_device();");
        out.line("CUcontext ctx = 0;");
        out.line("CUresult res = cuCtxGetCurrent(&ctx);");
        out.line("AT_ASSERTM(res == 0, \"Could not acquire CUDA context\");");
        out.line("cudaStream_t stream = at::cuda::getCurrentCUDAStream(device_id);");
        out.line("struct UserContext { int device_id; CUcontext *cuda_context; cudaStream_t *stream; } user_ctx;");
        out.line("user_ctx.device_id = device_id;");
        out.line("user_ctx.cuda_context = &ctx;");
        out.line("user_ctx.stream = &stream;");
        out.line("void* __user_context = (void*) &user_ctx;");
        out.blank();
    }

    fn emit_residency_check(&self, out: &mut CodeEmitter, buffer: &PlannedArg) {
        out.line(format!("HLPT_CHECK_DEVICE({}, device_id);", buffer.name));
    }

    fn wrap_expression(&self, buffer: &PlannedArg) -> String {
        format!("Halide::PyTorch::wrap_cuda<{}>({})", buffer.element_c_type(), buffer.name)
    }

    fn emit_post_checks(&self, out: &mut CodeEmitter, buffers: &[&PlannedArg]) {
        if buffers.is_empty() {
            return;
        }
        out.line("// Make sure data is on device");
        for buffer in buffers {
            out.line(format!(
                "AT_ASSERTM(!{view}.host_dirty(), \"device not synchronized for buffer {name}, \
                 make sure all update stages are explicitly computed on GPU.\");",
                view = buffer.view_name(),
                name = buffer.name,
            ));
            out.line(format!("{}.device_detach_native();", buffer.view_name()));
        }
        out.blank();
    }

    fn cache_flush_argument(&self) -> &'static str {
        "__user_context"
    }

    fn requires_context_parameter(&self) -> bool {
        true
    }
}

/// Borrows the host's current MPS stream, which owns device and queues.
pub struct MetalStrategy;

impl BackendStrategy for MetalStrategy {
    fn backend(&self) -> Backend {
        Backend::Metal
    }

    fn includes(&self) -> &'static [&'static str] {
        &["\"ATen/mps/MPSStream.h\"", "<c10/core/Stream.h>"]
    }

    fn reserved_locals(&self) -> &'static [&'static str] {
        &["stream", "user_ctx"]
    }

    fn referenced_names(&self) -> &'static [&'static str] {
        &["UserContext"]
    }

    fn emit_context_setup(&self, out: &mut CodeEmitter) {
        out.line("// Setup Metal");
        out.line("at::mps::MPSStream* stream = at::mps::getCurrentMPSStream();");
        out.line("AT_ASSERTM(stream != nullptr, \"Could not acquire MPS stream\");");
        out.line("struct UserContext { int device_id; at::mps::MPSStream* stream; } user_ctx;");
        out.line("user_ctx.device_id = static_cast<int>(stream->device_index());");
        out.line("user_ctx.stream = stream;");
        out.line("void* __user_context = (void*) &user_ctx;");
        out.blank();
    }

    fn wrap_expression(&self, buffer: &PlannedArg) -> String {
        host_wrap(buffer)
    }

    fn cache_flush_argument(&self) -> &'static str {
        "__user_context"
    }
}
