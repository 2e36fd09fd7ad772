//! Custom error types for snapscape.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::pipeline::Stage;

/// Main error type for the snapscape library.
#[derive(Error, Debug)]
pub enum Error {
    /// The source image is missing, unreadable or does not decode to a raster image.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// An image with zero area reached a stage that needs pixels.
    #[error("degenerate image {width}x{height}")]
    DegenerateImage { width: u32, height: u32 },

    /// The per-run output directory could not be created.
    #[error("failed to create output directory {path}: {source}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A generative capability failed to load or is no longer usable.
    #[error("failed to initialize pipeline {name}: {reason}")]
    PipelineInit { name: String, reason: String },

    /// The inpainting capability failed.
    #[error("scene generation failed: {message}")]
    SceneGeneration { message: String },

    /// The video capability or the frame encoder failed.
    #[error("video generation failed: {message}")]
    VideoGeneration { message: String },

    /// A pipeline stage failed during a run.
    #[error("stage {stage} failed in run {run_id} at {at}: {source}")]
    Stage {
        stage: Stage,
        run_id: String,
        at: DateTime<Utc>,
        #[source]
        source: Box<Error>,
    },

    /// Failed to load an image file.
    #[error("failed to load image from {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to save an image file.
    #[error("failed to save image to {path}: {source}")]
    ImageSave {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to download a model.
    #[error("failed to download model {name}: {source}")]
    ModelDownload {
        name: String,
        #[source]
        source: reqwest::Error,
    },

    /// Failed to load an ONNX model.
    #[error("failed to load ONNX model {name}: {source}")]
    ModelLoad {
        name: String,
        #[source]
        source: ort::Error,
    },

    /// Model inference failed.
    #[error("model inference failed: {source}")]
    Inference {
        #[source]
        source: ort::Error,
    },

    /// Failed to create cache directory.
    #[error("failed to create cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A capability call did not return in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Shape mismatch in tensor or image operations.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
}

impl Error {
    /// The pipeline stage a [`Error::Stage`] failure came from.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The innermost error, skipping any stage wrapper.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub(crate) fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_parameter(name: &str, reason: &str) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for snapscape operations.
pub type Result<T> = std::result::Result<T, Error>;
