//! Run sequencing: one source photo in, a directory of artifacts out.

use std::fmt;
use std::fs;
use std::path::Path;

use chrono::Utc;
use image::DynamicImage;

use crate::backend::FfmpegEncoder;
use crate::capability::{FrameSink, InpaintingModel, Segmenter, Shared, VideoModel};
use crate::error::{Error, Result};
use crate::image::{compose_canvas, derive_mask, save_image};

use super::background::remove_background;
use super::config::Config;
use super::run::{init_run_dir, RunArtifacts, RunId, CANVAS_FILE, MASK_FILE};
use super::scene::{generate_scene, SceneRequest, SCENE_FILE};
use super::video::generate_video;

/// States of a run.
///
/// A run moves `Init → BackgroundRemoved → CanvasReady → MaskReady → PipelineReady →
/// SceneGenerated → [VideoGenerated] → Done`, or to `Failed` from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Init,
    BackgroundRemoved,
    CanvasReady,
    MaskReady,
    PipelineReady,
    SceneGenerated,
    VideoGenerated,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "run initialization",
            Self::BackgroundRemoved => "background removal",
            Self::CanvasReady => "canvas composition",
            Self::MaskReady => "mask derivation",
            Self::PipelineReady => "pipeline check",
            Self::SceneGenerated => "scene generation",
            Self::VideoGenerated => "video generation",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The loaded models a run needs. Built once per process.
#[derive(Debug, Clone)]
pub struct Capabilities {
    /// Used for background removal and mask derivation.
    pub segmenter: Shared<dyn Segmenter>,
    pub scene: Shared<dyn InpaintingModel>,
    /// Required only when [`Config::generate_video`] is set.
    pub video: Option<Shared<dyn VideoModel>>,
}

/// Drives one run at a time through the stages.
pub struct Orchestrator<'a> {
    config: &'a Config,
    capabilities: &'a Capabilities,
    sink: Box<dyn FrameSink>,
    history: Vec<Stage>,
}

impl<'a> Orchestrator<'a> {
    /// Create an orchestrator that encodes video with `ffmpeg`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `config` is invalid.
    pub fn new(config: &'a Config, capabilities: &'a Capabilities) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            capabilities,
            sink: Box::new(FfmpegEncoder::new()),
            history: Vec::new(),
        })
    }

    /// Replace the video frame sink.
    #[must_use]
    pub fn with_sink(mut self, sink: impl FrameSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// States visited by the last run, ending in `Done` or `Failed`.
    #[must_use]
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    /// Turn the photo at `source` into a scene described by `prompt`.
    ///
    /// Creates `<results_dir>/<stem>_<timestamp>/` and writes `<stem>_no_bg.png`,
    /// `scene.jpg` and, depending on the configuration, `canvas.png`, `mask.png` and
    /// `video.mp4` into it. The first failing stage ends the run; files written
    /// before it are left in place.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Stage`] wrapping the failing stage's error.
    pub fn run<P: AsRef<Path>>(&mut self, source: P, prompt: &str) -> Result<RunArtifacts> {
        let source = source.as_ref();
        let config = self.config;
        let capabilities = self.capabilities;
        let timeout = config.capability_timeout;
        let started = Utc::now();

        self.history.clear();
        let mut run = Transitions {
            run_id: source.display().to_string(),
            history: &mut self.history,
        };

        let (run_id, dir) = run.advance(Stage::Init, || {
            let run_id = RunId::derive(source, started)?;
            let dir = init_run_dir(&config.results_dir, &run_id)?;
            Ok((run_id, dir))
        })?;
        run.run_id = run_id.to_string();
        tracing::info!("[{run_id}] Processing {} into {}", source.display(), dir.display());

        let no_background = dir.join(run_id.no_background_file());
        let cutout = run.advance(Stage::BackgroundRemoved, || {
            let bytes = fs::read(source).map_err(|err| {
                Error::invalid_input(format!("cannot read {}: {err}", source.display()))
            })?;
            let cutout = capabilities
                .segmenter
                .call("background removal", timeout, move |segmenter| {
                    remove_background(segmenter, &bytes)
                })?;
            save_image(
                &DynamicImage::ImageRgba8(cutout.clone()),
                &no_background,
                config.output_quality,
            )?;
            Ok(cutout)
        })?;

        let keep = config.keep_intermediates;
        let canvas_path = keep.then(|| dir.join(CANVAS_FILE));
        let canvas = run.advance(Stage::CanvasReady, || {
            let canvas = compose_canvas(&cutout)?;
            if let Some(path) = &canvas_path {
                save_image(&DynamicImage::ImageRgba8(canvas.clone()), path, config.output_quality)?;
            }
            Ok(canvas)
        })?;

        let mask_path = keep.then(|| dir.join(MASK_FILE));
        let mask = run.advance(Stage::MaskReady, || {
            let input = canvas.clone();
            let options = config.mask;
            let mask = capabilities
                .segmenter
                .call("mask derivation", timeout, move |segmenter| {
                    derive_mask(segmenter, &input, &options)
                })?;
            if let Some(path) = &mask_path {
                save_image(&DynamicImage::ImageLuma8(mask.clone()), path, config.output_quality)?;
            }
            Ok(mask)
        })?;

        let video = run.advance(Stage::PipelineReady, || {
            if !capabilities.scene.is_usable() {
                return Err(unusable("inpainting"));
            }
            if !config.generate_video {
                return Ok(None);
            }
            match &capabilities.video {
                Some(handle) if handle.is_usable() => Ok(Some(handle)),
                Some(_) => Err(unusable("video")),
                None => Err(Error::PipelineInit {
                    name: "video".to_string(),
                    reason: "video generation requested but no video model was provided"
                        .to_string(),
                }),
            }
        })?;

        let scene_path = dir.join(SCENE_FILE);
        let scene = run.advance(Stage::SceneGenerated, || {
            let request = SceneRequest::new(prompt, canvas, mask, &dir, config.num_steps)?;
            generate_scene(&capabilities.scene, &request, &config.scene_options())
        })?;

        let video_path = match video {
            Some(handle) => {
                let sink = self.sink.as_mut();
                Some(run.advance(Stage::VideoGenerated, || {
                    generate_video(handle, &scene, &dir, sink, &config.video_options())
                })?)
            }
            None => None,
        };

        run.advance(Stage::Done, || Ok(()))?;

        Ok(RunArtifacts {
            run_id,
            dir,
            no_background,
            canvas: canvas_path,
            mask: mask_path,
            scene: scene_path,
            video: video_path,
        })
    }
}

/// Records visited stages and attaches stage context to failures.
struct Transitions<'h> {
    run_id: String,
    history: &'h mut Vec<Stage>,
}

impl Transitions<'_> {
    fn advance<T>(&mut self, stage: Stage, f: impl FnOnce() -> Result<T>) -> Result<T> {
        tracing::debug!("[{}] Entering {stage}", self.run_id);

        match f() {
            Ok(value) => {
                self.history.push(stage);
                tracing::info!("[{}] {stage} complete", self.run_id);
                Ok(value)
            }
            Err(source) => {
                self.history.push(Stage::Failed);
                tracing::error!("[{}] {stage} failed: {source}", self.run_id);
                Err(Error::Stage {
                    stage,
                    run_id: self.run_id.clone(),
                    at: Utc::now(),
                    source: Box::new(source),
                })
            }
        }
    }
}

fn unusable(name: &str) -> Error {
    Error::PipelineInit {
        name: name.to_string(),
        reason: "model handle is unusable after a panic in an earlier call".to_string(),
    }
}
