//! End-to-end runs of the orchestrator with mock capabilities.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use image::{GenericImageView, Rgb, RgbImage};
use snapscape::backend::mock::{MemorySink, MockInpainter, MockSegmenter, MockVideoModel};
use snapscape::capability::Shared;
use snapscape::image::{load_image, MASK_GENERATE, MASK_PRESERVE};
use snapscape::pipeline::{Capabilities, Stage, FRAME_HEIGHT, FRAME_WIDTH};
use snapscape::{Config, Error, Orchestrator};

/// A dark product on an opaque white background, saved as PNG.
fn write_photo(dir: &Path, width: u32, height: u32) -> PathBuf {
    let photo = RgbImage::from_fn(width, height, |x, y| {
        let inside = x >= width / 4 && x < width * 3 / 4 && y >= height / 4 && y < height * 3 / 4;
        if inside {
            Rgb([40, 70, 110])
        } else {
            Rgb([255, 255, 255])
        }
    });
    let path = dir.join("product.png");
    photo.save(&path).unwrap();
    path
}

fn config(dir: &Path) -> Config {
    Config {
        results_dir: dir.join("Results"),
        num_steps: 4,
        ..Config::default()
    }
}

fn capabilities(segmenter: &MockSegmenter, inpainter: &MockInpainter) -> Capabilities {
    Capabilities {
        segmenter: Shared::segmenter(segmenter.clone()),
        scene: Shared::inpainter(inpainter.clone()),
        video: None,
    }
}

#[test]
fn test_end_to_end_scene() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_photo(dir.path(), 397, 601);
    let config = Config {
        keep_intermediates: true,
        ..config(dir.path())
    };
    let (segmenter, inpainter) = (MockSegmenter::new(), MockInpainter::new());
    let capabilities = capabilities(&segmenter, &inpainter);

    let mut orchestrator = Orchestrator::new(&config, &capabilities).unwrap();
    let artifacts = orchestrator.run(&source, "studio backdrop").unwrap();

    assert!(artifacts.run_id.as_str().starts_with("product_"));
    assert!(artifacts.dir.starts_with(dir.path().join("Results")));
    assert_eq!(
        artifacts.no_background,
        artifacts.dir.join("product_no_bg.png")
    );
    assert!(artifacts.no_background.is_file());
    assert!(artifacts.video.is_none());

    let cutout = load_image(&artifacts.no_background).unwrap();
    assert_eq!(cutout.dimensions(), (397, 601));
    assert_eq!(cutout.get_pixel(0, 0)[3], 0);

    let canvas = load_image(artifacts.canvas.as_ref().unwrap()).unwrap();
    assert_eq!(canvas.dimensions(), (794, 1202));

    let mask = load_image(artifacts.mask.as_ref().unwrap()).unwrap().to_luma8();
    assert_eq!(mask.dimensions(), (794, 1202));
    assert_eq!(mask.get_pixel(397, 601)[0], MASK_PRESERVE);
    assert_eq!(mask.get_pixel(5, 5)[0], MASK_GENERATE);

    let requests = inpainter.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!((requests[0].width, requests[0].height), (792, 1200));
    assert_eq!(requests[0].prompt, "studio backdrop");
    assert_eq!(requests[0].steps, 4);

    let scene = load_image(&artifacts.scene).unwrap();
    assert_eq!(scene.dimensions(), (792, 1200));
    assert_eq!(artifacts.scene, artifacts.dir.join("scene.jpg"));

    assert_eq!(
        orchestrator.history(),
        &[
            Stage::Init,
            Stage::BackgroundRemoved,
            Stage::CanvasReady,
            Stage::MaskReady,
            Stage::PipelineReady,
            Stage::SceneGenerated,
            Stage::Done,
        ]
    );
    // Once for the cut-out, once for the mask.
    assert_eq!(segmenter.calls().load(Ordering::SeqCst), 2);
}

#[test]
fn test_even_source_needs_no_truncation() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_photo(dir.path(), 200, 300);
    let config = config(dir.path());
    let (segmenter, inpainter) = (MockSegmenter::new(), MockInpainter::new());
    let capabilities = capabilities(&segmenter, &inpainter);

    let artifacts = Orchestrator::new(&config, &capabilities)
        .unwrap()
        .run(&source, "marble countertop")
        .unwrap();

    let requests = inpainter.requests();
    assert_eq!((requests[0].width, requests[0].height), (400, 600));
    assert!(artifacts.canvas.is_none());
    assert!(artifacts.mask.is_none());
}

#[test]
fn test_background_failure_short_circuits() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_photo(dir.path(), 64, 48);
    let config = config(dir.path());
    let (segmenter, inpainter) = (MockSegmenter::failing(), MockInpainter::new());
    let capabilities = capabilities(&segmenter, &inpainter);

    let mut orchestrator = Orchestrator::new(&config, &capabilities).unwrap();
    let err = orchestrator.run(&source, "studio backdrop").unwrap_err();

    assert_eq!(err.stage(), Some(Stage::BackgroundRemoved));
    assert!(matches!(err.root(), Error::InvalidInput { .. }));
    assert_eq!(orchestrator.history(), &[Stage::Init, Stage::Failed]);

    // No mask derivation, no inpainting.
    assert_eq!(segmenter.calls().load(Ordering::SeqCst), 1);
    assert!(inpainter.requests().is_empty());
}

#[test]
fn test_missing_source_is_invalid_input() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let (segmenter, inpainter) = (MockSegmenter::new(), MockInpainter::new());
    let capabilities = capabilities(&segmenter, &inpainter);

    let err = Orchestrator::new(&config, &capabilities)
        .unwrap()
        .run(dir.path().join("missing.jpg"), "studio backdrop")
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::BackgroundRemoved));
    assert!(matches!(err.root(), Error::InvalidInput { .. }));
    assert_eq!(segmenter.calls().load(Ordering::SeqCst), 0);
}

#[test]
fn test_unwritable_results_dir_fails_at_init() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_photo(dir.path(), 64, 48);
    std::fs::write(dir.path().join("Results"), b"a file, not a directory").unwrap();
    let config = config(dir.path());
    let (segmenter, inpainter) = (MockSegmenter::new(), MockInpainter::new());
    let capabilities = capabilities(&segmenter, &inpainter);

    let mut orchestrator = Orchestrator::new(&config, &capabilities).unwrap();
    let err = orchestrator.run(&source, "studio backdrop").unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Init));
    assert!(matches!(err.root(), Error::DirectoryCreation { .. }));
    assert_eq!(orchestrator.history(), &[Stage::Failed]);
    assert_eq!(segmenter.calls().load(Ordering::SeqCst), 0);
}

#[test]
fn test_scene_failure_is_reported_with_stage() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_photo(dir.path(), 64, 48);
    let config = Config {
        keep_intermediates: true,
        ..config(dir.path())
    };
    let (segmenter, inpainter) = (MockSegmenter::new(), MockInpainter::failing());
    let capabilities = capabilities(&segmenter, &inpainter);

    let mut orchestrator = Orchestrator::new(&config, &capabilities).unwrap();
    let err = orchestrator.run(&source, "studio backdrop").unwrap_err();

    assert_eq!(err.stage(), Some(Stage::SceneGenerated));
    assert!(matches!(err.root(), Error::SceneGeneration { .. }));
    assert_eq!(orchestrator.history().last(), Some(&Stage::Failed));

    // Files from the stages that succeeded stay on disk.
    let runs: Vec<PathBuf> = std::fs::read_dir(dir.path().join("Results"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(runs.len(), 1);
    let run_dir = &runs[0];
    assert!(run_dir.join("product_no_bg.png").is_file());
    assert!(run_dir.join("canvas.png").is_file());
    assert!(run_dir.join("mask.png").is_file());
    assert!(!run_dir.join("scene.jpg").exists());
}

#[test]
fn test_video_run() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_photo(dir.path(), 64, 48);
    let config = Config {
        generate_video: true,
        ..config(dir.path())
    };
    let (segmenter, inpainter) = (MockSegmenter::new(), MockInpainter::new());
    let capabilities = Capabilities {
        video: Some(Shared::video(MockVideoModel::new(4))),
        ..capabilities(&segmenter, &inpainter)
    };
    let sink = MemorySink::new();

    let mut orchestrator = Orchestrator::new(&config, &capabilities)
        .unwrap()
        .with_sink(sink.clone());
    let artifacts = orchestrator.run(&source, "beach at sunset").unwrap();

    let video = artifacts.video.unwrap();
    assert_eq!(video, artifacts.dir.join("video.mp4"));
    assert!(video.is_file());

    let frames = sink.frames();
    assert_eq!(frames.len(), 4);
    assert!(frames
        .iter()
        .all(|f| f.dimensions() == (FRAME_WIDTH, FRAME_HEIGHT)));
    assert!(orchestrator.history().contains(&Stage::VideoGenerated));
    assert_eq!(orchestrator.history().last(), Some(&Stage::Done));
}

#[test]
fn test_video_without_model_fails_before_inpainting() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_photo(dir.path(), 64, 48);
    let config = Config {
        generate_video: true,
        ..config(dir.path())
    };
    let (segmenter, inpainter) = (MockSegmenter::new(), MockInpainter::new());
    let capabilities = capabilities(&segmenter, &inpainter);

    let err = Orchestrator::new(&config, &capabilities)
        .unwrap()
        .run(&source, "studio backdrop")
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::PipelineReady));
    assert!(matches!(err.root(), Error::PipelineInit { .. }));
    assert!(inpainter.requests().is_empty());
}

#[test]
fn test_poisoned_inpainting_handle_is_unusable() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_photo(dir.path(), 64, 48);
    let config = config(dir.path());
    let (segmenter, inpainter) = (MockSegmenter::new(), MockInpainter::new());
    let capabilities = capabilities(&segmenter, &inpainter);

    let panicked = panic::catch_unwind(AssertUnwindSafe(|| {
        let _ = capabilities
            .scene
            .call("scene generation", None, |_| -> snapscape::Result<()> {
                panic!("model crashed")
            });
    }));
    assert!(panicked.is_err());
    assert!(!capabilities.scene.is_usable());

    let err = Orchestrator::new(&config, &capabilities)
        .unwrap()
        .run(&source, "studio backdrop")
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::PipelineReady));
    assert!(matches!(err.root(), Error::PipelineInit { .. }));
}

#[test]
fn test_invalid_config_is_rejected_up_front() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        num_steps: 0,
        ..config(dir.path())
    };
    let (segmenter, inpainter) = (MockSegmenter::new(), MockInpainter::new());
    let capabilities = capabilities(&segmenter, &inpainter);

    let err = Orchestrator::new(&config, &capabilities).err().unwrap();
    assert!(matches!(err, Error::InvalidParameter { .. }));
}
