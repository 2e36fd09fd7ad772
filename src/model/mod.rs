//! Model files, downloads and ONNX Runtime sessions.

mod device;
mod loader;

use std::path::PathBuf;

pub use device::Device;
pub use loader::{ModelCache, ModelDir, SegmentationModel};

/// How and where models are loaded.
#[derive(Debug, Clone, Default)]
pub struct ModelOptions {
    /// Compute device for inference.
    pub device: Device,
    /// Override for the download cache directory.
    pub cache_dir: Option<PathBuf>,
}
