//! `snapscape` CLI - Place a product photo into a generated scene.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use snapscape::backend::OnnxSegmenter;
use snapscape::capability::Shared;
use snapscape::image::MaskOptions;
use snapscape::model::{Device, ModelOptions, SegmentationModel};
use snapscape::pipeline::{
    build_inpainting_pipeline, build_video_pipeline_with, Capabilities, VideoModelSettings,
};
use snapscape::{Config, Orchestrator};

/// Remove a product photo's background and inpaint a scene around it.
#[derive(Parser, Debug)]
#[command(name = "snapscape")]
#[command(version, about, long_about = None)]
struct Args {
    /// Input image path.
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Description of the scene to generate.
    #[arg(short, long, value_name = "TEXT")]
    prompt: String,

    /// What the scene should not contain.
    #[arg(long, default_value = "", value_name = "TEXT")]
    negative_prompt: String,

    /// Directory holding the ONNX export of the inpainting model.
    #[arg(long, value_name = "DIR")]
    inpaint_model: PathBuf,

    /// Directory holding the ONNX export of the image-to-video model.
    #[arg(long, value_name = "DIR", requires = "video")]
    video_model: Option<PathBuf>,

    /// Also animate the scene into video.mp4.
    #[arg(long, requires = "video_model")]
    video: bool,

    /// Number of frames in the generated clip.
    #[arg(long, default_value = "25", value_name = "INT")]
    video_frames: usize,

    /// Number of denoising steps for the video model.
    #[arg(long, default_value = "25", value_name = "INT")]
    video_steps: usize,

    /// Parent directory of the per-run output directories.
    #[arg(short, long, default_value = "Results", value_name = "DIR")]
    results: PathBuf,

    /// Number of denoising steps. More steps = better quality but slower.
    #[arg(long, default_value = "200", value_name = "INT")]
    steps: u32,

    /// Classifier-free guidance scale.
    #[arg(long, default_value = "7.5", value_name = "FLOAT")]
    guidance: f32,

    /// Background segmentation model (u2net, isnet).
    #[arg(long, default_value = "u2net", value_name = "MODEL")]
    segmentation: SegmentationModel,

    /// Inference device (auto, cpu, cuda).
    #[arg(long, default_value = "auto", value_name = "DEVICE")]
    device: Device,

    /// Override for the segmentation model cache directory.
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Output JPEG quality (1-100).
    #[arg(short, long, default_value = "95", value_name = "INT")]
    quality: u8,

    /// Random seed for reproducibility.
    #[arg(long, value_name = "INT")]
    seed: Option<u64>,

    /// Give up on a model call after this many seconds.
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Also write canvas.png and mask.png.
    #[arg(long)]
    keep_intermediates: bool,

    /// Binarize the foreground map at this value (0-255).
    #[arg(long, value_name = "INT")]
    mask_threshold: Option<u8>,

    /// Smooth the mask edge.
    #[arg(long)]
    post_process_mask: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("snapscape={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(err) = run(&args) {
        tracing::error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(args: &Args) -> Result<()> {
    if !args.input.exists() {
        anyhow::bail!("Input file does not exist: {}", args.input.display());
    }

    let config = Config {
        results_dir: args.results.clone(),
        num_steps: args.steps,
        guidance_scale: args.guidance,
        negative_prompt: args.negative_prompt.clone(),
        output_quality: args.quality,
        seed: args.seed,
        mask: MaskOptions {
            threshold: args.mask_threshold,
            post_process: args.post_process_mask,
        },
        generate_video: args.video,
        keep_intermediates: args.keep_intermediates,
        capability_timeout: args.timeout_secs.map(Duration::from_secs),
    };
    config.validate().context("Invalid configuration")?;

    let options = ModelOptions {
        device: args.device,
        cache_dir: args.cache_dir.clone(),
    };

    // Models are loaded once and shared by every stage.
    let segmenter = OnnxSegmenter::new(args.segmentation, &options)
        .context("Failed to load segmentation model")?;
    let scene = build_inpainting_pipeline(&args.inpaint_model, &options)
        .context("Failed to initialize inpainting pipeline")?;
    let video_settings = VideoModelSettings {
        frames: args.video_frames,
        steps: args.video_steps,
    };
    let video = args
        .video_model
        .as_ref()
        .map(|dir| build_video_pipeline_with(dir, &options, video_settings))
        .transpose()
        .context("Failed to initialize video pipeline")?;

    let capabilities = Capabilities {
        segmenter: Shared::segmenter(segmenter),
        scene,
        video,
    };

    let mut orchestrator = Orchestrator::new(&config, &capabilities)?;
    let artifacts = orchestrator
        .run(&args.input, &args.prompt)
        .context("Failed to process image")?;

    println!("Run {} -> {}", artifacts.run_id, artifacts.dir.display());
    println!("  cut-out: {}", artifacts.no_background.display());
    if let Some(canvas) = &artifacts.canvas {
        println!("  canvas:  {}", canvas.display());
    }
    if let Some(mask) = &artifacts.mask {
        println!("  mask:    {}", mask.display());
    }
    println!("  scene:   {}", artifacts.scene.display());
    if let Some(video) = &artifacts.video {
        println!("  video:   {}", video.display());
    }

    Ok(())
}
