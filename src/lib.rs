//! # `snapscape`
//!
//! Turns a single product photograph and a text prompt into a generated scene image,
//! and optionally a short video clip.
//!
//! The pipeline removes the photo's background, centers the product on a white canvas
//! twice its size, derives an inpainting mask that preserves the product and marks the
//! surroundings for generation, and hands (canvas, mask, prompt) to an inpainting model.
//! Models sit behind the traits in [`capability`]; ONNX Runtime implementations live in
//! [`backend`].
//!
//! ## Example
//!
//! ```no_run
//! use snapscape::backend::OnnxSegmenter;
//! use snapscape::capability::Shared;
//! use snapscape::model::{ModelOptions, SegmentationModel};
//! use snapscape::pipeline::{build_inpainting_pipeline, Capabilities, Config, Orchestrator};
//!
//! # fn main() -> snapscape::Result<()> {
//! let options = ModelOptions::default();
//! let capabilities = Capabilities {
//!     segmenter: Shared::segmenter(OnnxSegmenter::new(SegmentationModel::U2Net, &options)?),
//!     scene: build_inpainting_pipeline("models/sd2-inpainting", &options)?,
//!     video: None,
//! };
//! let config = Config::default();
//!
//! let mut orchestrator = Orchestrator::new(&config, &capabilities)?;
//! let artifacts = orchestrator.run("shoe.jpg", "studio backdrop")?;
//! println!("{}", artifacts.scene.display());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod capability;
pub mod error;
pub mod image;
pub mod model;
pub mod pipeline;

pub use error::{Error, Result};
pub use pipeline::{Config, Orchestrator};
