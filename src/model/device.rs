//! Compute device selection for ONNX Runtime sessions.

use std::fmt;
use std::str::FromStr;

use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use ort::session::builder::SessionBuilder;

use crate::error::{Error, Result};

/// Where inference runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    /// CUDA when available, CPU otherwise.
    #[default]
    Auto,
    /// CPU only.
    Cpu,
    /// CUDA, falling back to CPU with a warning when it is not available.
    Cuda,
}

impl Device {
    /// Register the execution provider for this device on `builder`.
    pub(crate) fn configure(self, builder: SessionBuilder, name: &str) -> Result<SessionBuilder> {
        if self == Self::Cpu {
            tracing::debug!("Using CPU for {name}");
            return Ok(builder);
        }

        let cuda = CUDAExecutionProvider::default();
        if !cuda.is_available().unwrap_or(false) {
            if self == Self::Cuda {
                tracing::warn!("CUDA requested for {name} but not available, falling back to CPU");
            } else {
                tracing::debug!("CUDA not available, using CPU for {name}");
            }
            return Ok(builder);
        }

        tracing::info!("Using CUDA for {name}");
        builder
            .with_execution_providers([cuda.build()])
            .map_err(|source| Error::ModelLoad {
                name: name.to_string(),
                source,
            })
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        })
    }
}

impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            _ => Err(Error::invalid_parameter(
                "device",
                "must be one of auto, cpu, cuda",
            )),
        }
    }
}
