//! Backend tag selecting the code-emission branch and the bridge variant

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Accelerator family a wrapper is generated for.
///
/// Exactly one backend is active per generation run; the enum replaces the
/// `is_cuda` / `is_metal` flag pairs so that "both" cannot be expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Cpu,
    Cuda,
    Metal,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::Cpu, Backend::Cuda, Backend::Metal];

    /// Lowercase name, matching the target-string token.
    pub fn name(self) -> &'static str {
        match self {
            Backend::Cpu => "cpu",
            Backend::Cuda => "cuda",
            Backend::Metal => "metal",
        }
    }

    /// True for backends whose kernels run on a device owned by the host framework.
    pub fn is_gpu(self) -> bool {
        !matches!(self, Backend::Cpu)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" | "host" => Ok(Backend::Cpu),
            "cuda" => Ok(Backend::Cuda),
            "metal" | "mps" => Ok(Backend::Metal),
            other => Err(CoreError::UnknownBackend(other.to_string())),
        }
    }
}
