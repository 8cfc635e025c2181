//! # torchbridge-codegen
//!
//! Turns the exported signatures of precompiled kernels into C++ source that
//! exposes each kernel as a host-framework (PyTorch) entry point.
//!
//! For every kernel `ns::f(a, b, n, __user_context)` the generator emits an
//! inline `ns::f_th_(at::Tensor &a, at::Tensor &b, int32_t n)` that:
//!
//! 1. builds the backend's User Context from the host's current device state,
//! 2. checks every tensor is contiguous (and, on CUDA, resident on the
//!    current device),
//! 3. wraps every tensor in a non-owning runtime buffer view,
//! 4. calls the kernel and asserts on its status,
//! 5. on CUDA, asserts results were computed on the device and detaches the
//!    views from the host framework's memory.
//!
//! ```rust
//! use torchbridge_codegen::{generate, ArgumentDef, FunctionSignature, GeneratorOptions};
//! use torchbridge_core::{ScalarType, Target};
//!
//! let vadd = FunctionSignature::new(
//!     "ops::vadd",
//!     vec![
//!         ArgumentDef::buffer("a", ScalarType::F32, 1),
//!         ArgumentDef::buffer("b", ScalarType::F32, 1),
//!         ArgumentDef::user_context(),
//!     ],
//! );
//! let target: Target = "host-cuda-user_context".parse().unwrap();
//! let source = generate(&[vadd], &target, GeneratorOptions::default()).unwrap();
//! assert!(source.contains("inline int vadd_th_(at::Tensor &a, at::Tensor &b)"));
//! ```

pub mod emitter;
pub mod error;
pub mod generator;
pub mod names;
pub mod options;
pub mod plan;
pub mod signature;
pub mod strategy;

pub use error::{CodegenError, Result};
pub use generator::{generate, WrapperGenerator};
pub use options::GeneratorOptions;
pub use signature::{load, parse, ArgKind, ArgumentDef, FunctionSignature, SignatureSet, SCHEMA_VERSION};
pub use strategy::{strategy_for, BackendStrategy};
