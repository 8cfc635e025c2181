//! Bridge configuration.

use std::env;

/// What to do when the kernel runtime asks for a device other than the one
/// bound to the host stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeviceMismatchPolicy {
    /// Log an error and continue on the host's device.
    #[default]
    Report,
    /// Log an error and abort the process.
    Abort,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    pub mismatch_policy: DeviceMismatchPolicy,
}

impl BridgeConfig {
    pub fn strict() -> Self {
        Self {
            mismatch_policy: DeviceMismatchPolicy::Abort,
        }
    }

    /// Defaults, made strict by `TORCHBRIDGE_STRICT_DEVICE_MATCH=1` (or `true`).
    pub fn from_env() -> Self {
        let strict = env::var("TORCHBRIDGE_STRICT_DEVICE_MATCH")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        if strict {
            Self::strict()
        } else {
            Self::default()
        }
    }
}
