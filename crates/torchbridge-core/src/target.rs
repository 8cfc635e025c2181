//! Kernel target strings (`host-cuda-cuda_capability_61-user_context`)

use crate::backend::Backend;
use crate::error::{CoreError, Result};
use std::fmt;
use std::str::FromStr;

/// One dash-separated token of a target string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Feature {
    Cuda,
    Metal,
    /// Kernels take a leading opaque `__user_context` argument that the
    /// runtime forwards to its device hooks.
    UserContext,
    CudaCapability(u32),
    /// Any token this crate does not interpret (arch, os, bits, `host`, ...).
    Other(String),
}

impl Feature {
    fn parse_token(token: &str) -> Feature {
        match token {
            "cuda" => Feature::Cuda,
            "metal" => Feature::Metal,
            "user_context" => Feature::UserContext,
            _ => token
                .strip_prefix("cuda_capability_")
                .and_then(|cap| cap.parse().ok())
                .map(Feature::CudaCapability)
                .unwrap_or_else(|| Feature::Other(token.to_string())),
        }
    }

    fn backend(&self) -> Option<Backend> {
        match self {
            Feature::Cuda => Some(Backend::Cuda),
            Feature::Metal => Some(Backend::Metal),
            _ => None,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::Cuda => f.write_str("cuda"),
            Feature::Metal => f.write_str("metal"),
            Feature::UserContext => f.write_str("user_context"),
            Feature::CudaCapability(cap) => write!(f, "cuda_capability_{cap}"),
            Feature::Other(token) => f.write_str(token),
        }
    }
}

/// A backend plus the feature set it was requested with.
///
/// Tokens keep the order they were parsed in so that [`Display`](fmt::Display)
/// reproduces the original string (minus duplicates).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    backend: Backend,
    features: Vec<Feature>,
}

impl Target {
    /// Target for `backend` on the host, without optional features.
    pub fn new(backend: Backend) -> Self {
        let mut features = vec![Feature::Other("host".to_string())];
        match backend {
            Backend::Cpu => {}
            Backend::Cuda => features.push(Feature::Cuda),
            Backend::Metal => features.push(Feature::Metal),
        }
        Self { backend, features }
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        if feature.backend().is_none() && !self.features.contains(&feature) {
            self.features.push(feature);
        }
        self
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn has_feature(&self, feature: &Feature) -> bool {
        self.features.contains(feature)
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::new(Backend::Cpu)
    }
}

impl FromStr for Target {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CoreError::EmptyTarget);
        }

        let mut backend = Backend::Cpu;
        let mut features: Vec<Feature> = Vec::new();
        for token in s.split('-').filter(|t| !t.is_empty()) {
            let feature = Feature::parse_token(token);
            if let Some(requested) = feature.backend() {
                if backend.is_gpu() && backend != requested {
                    return Err(CoreError::ConflictingBackends {
                        first: backend.to_string(),
                        second: requested.to_string(),
                    });
                }
                backend = requested;
            }
            if !features.contains(&feature) {
                features.push(feature);
            }
        }

        Ok(Self { backend, features })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, feature) in self.features.iter().enumerate() {
            if index > 0 {
                f.write_str("-")?;
            }
            write!(f, "{feature}")?;
        }
        Ok(())
    }
}
