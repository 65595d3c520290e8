// SPDX-License-Identifier: AGPL-3.0-only

//! Typed errors for GPU setup, configuration, and the simulation loop.
//!
//! Public APIs return this enum instead of `Result<_, String>` so callers
//! can pattern-match on failure modes (no adapter, bad configuration,
//! numerical blow-up) rather than parsing opaque strings.

use std::fmt;

/// Errors arising from GPU initialization, configuration, data loading,
/// or the stepping loop.
#[derive(Debug)]
pub enum EchoError {
    /// No compatible GPU adapter was found by wgpu.
    NoAdapter,

    /// GPU device creation failed (wraps the underlying wgpu error message).
    DeviceCreation(String),

    /// A GPU dispatch or buffer operation failed mid-run.
    GpuCompute(String),

    /// Invalid simulation configuration, detected before the step loop starts.
    Config(String),

    /// Data file loading failed (path, underlying IO or parse error).
    DataLoad(String),

    /// Field energy became NaN or exceeded the configured bound.
    Unstable { step: u32, energy: f32 },

    /// The run was cancelled between steps via a
    /// [`crate::solver::dispatch::CancelToken`].
    Cancelled { step: u32 },

    /// A per-step readback did not complete within its deadline.
    ReadbackTimeout { step: u32 },
}

impl fmt::Display for EchoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAdapter => write!(f, "No GPU adapter found"),
            Self::DeviceCreation(e) => write!(f, "Failed to create GPU device: {e}"),
            Self::GpuCompute(e) => write!(f, "GPU compute failed: {e}"),
            Self::Config(msg) => write!(f, "Invalid configuration: {msg}"),
            Self::DataLoad(msg) => write!(f, "Data loading failed: {msg}"),
            Self::Unstable { step, energy } => {
                write!(f, "Simulation unstable at step {step}: field energy {energy:e}")
            }
            Self::Cancelled { step } => write!(f, "Simulation cancelled at step {step}"),
            Self::ReadbackTimeout { step } => {
                write!(f, "GPU readback timed out at step {step}")
            }
        }
    }
}

impl std::error::Error for EchoError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_no_adapter() {
        let err = EchoError::NoAdapter;
        assert_eq!(err.to_string(), "No GPU adapter found");
    }

    #[test]
    fn display_device_creation() {
        let err = EchoError::DeviceCreation("wgpu error".into());
        assert_eq!(err.to_string(), "Failed to create GPU device: wgpu error");
    }

    #[test]
    fn display_unstable_names_step_and_energy() {
        let err = EchoError::Unstable { step: 412, energy: 3.2e12 };
        let msg = err.to_string();
        assert!(msg.contains("412"));
        assert!(msg.contains("unstable"));
    }

    #[test]
    fn display_cancelled() {
        let err = EchoError::Cancelled { step: 7 };
        assert_eq!(err.to_string(), "Simulation cancelled at step 7");
    }

    #[test]
    fn error_trait_works() {
        let err = EchoError::NoAdapter;
        let dyn_err: &dyn std::error::Error = &err;
        assert_eq!(dyn_err.to_string(), "No GPU adapter found");
    }
}
