//! Optional video stage: animate the finished scene.

use std::path::{Path, PathBuf};
use std::time::Duration;

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::backend::OnnxVideoModel;
use crate::capability::{FrameSink, Shared, VideoModel};
use crate::error::{Error, Result};
use crate::model::ModelOptions;

use super::scene::pipeline_init;

/// Video file name inside the run directory.
pub const VIDEO_FILE: &str = "video.mp4";

/// Frame size of the generated clip.
pub const FRAME_WIDTH: u32 = 854;
pub const FRAME_HEIGHT: u32 = 480;

pub const VIDEO_FPS: u32 = 8;

/// Fixed seed so identical scenes animate identically.
pub const VIDEO_SEED: u64 = 42;

/// Frames decoded per VAE call.
pub const DECODE_CHUNK_SIZE: usize = 8;

/// Video stage settings.
#[derive(Debug, Clone, Default)]
pub struct VideoOptions {
    /// Upper bound on the video model call.
    pub timeout: Option<Duration>,
}

/// Clip length and denoising effort of the video model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoModelSettings {
    pub frames: usize,
    pub steps: usize,
}

impl Default for VideoModelSettings {
    fn default() -> Self {
        Self {
            frames: 25,
            steps: 25,
        }
    }
}

impl VideoModelSettings {
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if either count is zero or `steps` exceeds 1000.
    pub fn validate(&self) -> Result<()> {
        if self.frames == 0 {
            return Err(Error::invalid_parameter("video_frames", "must be greater than 0"));
        }
        if self.steps == 0 || self.steps > 1000 {
            return Err(Error::invalid_parameter(
                "video_steps",
                "must be between 1 and 1000",
            ));
        }
        Ok(())
    }
}

/// Load the video model at `model_dir` once and wrap it in a shared handle.
///
/// # Errors
///
/// Returns [`Error::PipelineInit`] for any loading failure.
pub fn build_video_pipeline<P: AsRef<Path>>(
    model_dir: P,
    options: &ModelOptions,
) -> Result<Shared<dyn VideoModel>> {
    build_video_pipeline_with(model_dir, options, VideoModelSettings::default())
}

/// [`build_video_pipeline`] with explicit frame and step counts.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] for bad `settings`, checked before anything is
/// loaded, or [`Error::PipelineInit`] for any loading failure.
pub fn build_video_pipeline_with<P: AsRef<Path>>(
    model_dir: P,
    options: &ModelOptions,
    settings: VideoModelSettings,
) -> Result<Shared<dyn VideoModel>> {
    settings.validate()?;
    let model_dir = model_dir.as_ref();
    tracing::info!(
        "Building video pipeline on {} ({} frames, {} steps)",
        options.device,
        settings.frames,
        settings.steps
    );

    OnnxVideoModel::load(model_dir, options)
        .map(|model| {
            Shared::video(
                model
                    .with_frames(settings.frames)
                    .with_steps(settings.steps),
            )
        })
        .map_err(|err| pipeline_init(model_dir, err))
}

/// Resize `scene` to the clip size and run the video model on it.
///
/// # Errors
///
/// Returns [`Error::VideoGeneration`] if the model fails, times out or returns
/// frames of the wrong size, or [`Error::PipelineInit`] if the handle is unusable.
pub fn render_frames(
    handle: &Shared<dyn VideoModel>,
    scene: &RgbImage,
    options: &VideoOptions,
) -> Result<Vec<RgbImage>> {
    if scene.width() == 0 || scene.height() == 0 {
        return Err(Error::DegenerateImage {
            width: scene.width(),
            height: scene.height(),
        });
    }

    let input = imageops::resize(scene, FRAME_WIDTH, FRAME_HEIGHT, FilterType::CatmullRom);
    let frames = handle
        .call("video generation", options.timeout, move |model| {
            model.frames(&input, DECODE_CHUNK_SIZE, VIDEO_SEED)
        })
        .map_err(|err| match err {
            Error::PipelineInit { .. } | Error::VideoGeneration { .. } => err,
            other => video_error(other.to_string()),
        })?;

    if frames.is_empty() {
        return Err(video_error("model returned no frames"));
    }
    if let Some(frame) = frames
        .iter()
        .find(|f| f.dimensions() != (FRAME_WIDTH, FRAME_HEIGHT))
    {
        return Err(video_error(format!(
            "model returned a {}x{} frame, expected {FRAME_WIDTH}x{FRAME_HEIGHT}",
            frame.width(),
            frame.height()
        )));
    }

    Ok(frames)
}

/// Animate `scene` and encode the clip to `<output_dir>/video.mp4` through `sink`.
///
/// # Errors
///
/// Returns [`Error::VideoGeneration`] if rendering or encoding fails.
pub fn generate_video(
    handle: &Shared<dyn VideoModel>,
    scene: &RgbImage,
    output_dir: &Path,
    sink: &mut dyn FrameSink,
    options: &VideoOptions,
) -> Result<PathBuf> {
    let frames = render_frames(handle, scene, options)?;
    let path = output_dir.join(VIDEO_FILE);

    tracing::info!("Encoding {} frames to {}", frames.len(), path.display());
    encode(sink, &path, &frames).map_err(|err| match err {
        Error::VideoGeneration { .. } => err,
        other => video_error(other.to_string()),
    })?;

    Ok(path)
}

/// The sink is aborted on any failure so it stays usable for the next run.
fn encode(sink: &mut dyn FrameSink, path: &Path, frames: &[RgbImage]) -> Result<()> {
    let result = write_frames(sink, path, frames);
    if result.is_err() {
        sink.abort();
    }
    result
}

fn write_frames(sink: &mut dyn FrameSink, path: &Path, frames: &[RgbImage]) -> Result<()> {
    sink.begin(path, FRAME_WIDTH, FRAME_HEIGHT, VIDEO_FPS)?;
    for frame in frames {
        sink.push(frame)?;
    }
    sink.finish()
}

fn video_error(message: impl Into<String>) -> Error {
    Error::VideoGeneration {
        message: message.into(),
    }
}
