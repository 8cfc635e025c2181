//! # torchbridge-core
//!
//! Leaf definitions shared by the wrapper generator and the context bridge:
//!
//! - [`Backend`] - the closed set of accelerator families a wrapper targets
//! - [`ScalarType`] - element and scalar types carried by kernel signatures
//! - [`Target`] - a backend plus the feature tokens of a kernel target string
//!
//! ```
//! use torchbridge_core::{Backend, Feature, Target};
//!
//! let target: Target = "host-cuda-cuda_capability_61-user_context".parse().unwrap();
//! assert_eq!(target.backend(), Backend::Cuda);
//! assert!(target.has_feature(&Feature::UserContext));
//! ```

pub mod backend;
pub mod error;
pub mod target;
pub mod types;

pub use backend::Backend;
pub use error::{CoreError, Result};
pub use target::{Feature, Target};
pub use types::{ScalarType, TypeCode};
