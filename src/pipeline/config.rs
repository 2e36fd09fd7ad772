//! Run configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::image::MaskOptions;

use super::scene::SceneOptions;
use super::video::VideoOptions;

/// Configuration for a pipeline run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Parent of the per-run output directories.
    pub results_dir: PathBuf,

    /// Number of inpainting denoising steps.
    pub num_steps: u32,

    /// Classifier-free guidance scale. Values of 1.0 or less disable guidance.
    pub guidance_scale: f32,

    /// What the scene should not contain.
    pub negative_prompt: String,

    /// Output JPEG quality (1-100).
    pub output_quality: u8,

    /// Random seed for reproducibility. None for random.
    pub seed: Option<u64>,

    /// Foreground map clean-up before inversion.
    pub mask: MaskOptions,

    /// Whether to animate the scene into `video.mp4`.
    pub generate_video: bool,

    /// Whether to also write `canvas.png` and `mask.png`.
    pub keep_intermediates: bool,

    /// Upper bound on each generative capability call. None waits forever.
    pub capability_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("Results"),
            num_steps: 200,
            guidance_scale: 7.5,
            negative_prompt: String::new(),
            output_quality: 95,
            seed: None,
            mask: MaskOptions::default(),
            generate_video: false,
            keep_intermediates: false,
            capability_timeout: None,
        }
    }
}

impl Config {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if !(1..=1000).contains(&self.num_steps) {
            return Err(Error::invalid_parameter(
                "num_steps",
                "must be between 1 and 1000",
            ));
        }

        if !self.guidance_scale.is_finite() || self.guidance_scale < 0.0 {
            return Err(Error::invalid_parameter(
                "guidance_scale",
                "must be a finite, non-negative number",
            ));
        }

        if !(1..=100).contains(&self.output_quality) {
            return Err(Error::invalid_parameter(
                "output_quality",
                "must be between 1 and 100",
            ));
        }

        if self.capability_timeout == Some(Duration::ZERO) {
            return Err(Error::invalid_parameter(
                "capability_timeout",
                "must be greater than 0",
            ));
        }

        if self.results_dir.as_os_str().is_empty() {
            return Err(Error::invalid_parameter("results_dir", "must not be empty"));
        }

        Ok(())
    }

    /// Options for the scene generation stage.
    #[must_use]
    pub fn scene_options(&self) -> SceneOptions {
        SceneOptions {
            negative_prompt: self.negative_prompt.clone(),
            guidance_scale: self.guidance_scale,
            seed: self.seed,
            quality: self.output_quality,
            timeout: self.capability_timeout,
        }
    }

    /// Options for the video generation stage.
    #[must_use]
    pub const fn video_options(&self) -> VideoOptions {
        VideoOptions {
            timeout: self.capability_timeout,
        }
    }
}
