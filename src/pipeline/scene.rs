//! Scene generation stage: inpaint the canvas around the subject.

use std::path::{Path, PathBuf};
use std::time::Duration;

use image::{imageops, DynamicImage, GrayImage, RgbImage, RgbaImage};

use crate::backend::OnnxInpainter;
use crate::capability::{InpaintRequest, InpaintingModel, Shared};
use crate::error::{Error, Result};
use crate::image::save_image;
use crate::model::ModelOptions;

/// Scene file name inside the run directory.
pub const SCENE_FILE: &str = "scene.jpg";

/// Inputs of one scene generation. Immutable once built.
#[derive(Debug, Clone)]
pub struct SceneRequest {
    prompt: String,
    canvas: RgbaImage,
    mask: GrayImage,
    output_dir: PathBuf,
    steps: u32,
}

impl SceneRequest {
    /// Build a request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if canvas and mask sizes differ, or
    /// [`Error::InvalidParameter`] if `steps` is zero.
    pub fn new(
        prompt: impl Into<String>,
        canvas: RgbaImage,
        mask: GrayImage,
        output_dir: impl Into<PathBuf>,
        steps: u32,
    ) -> Result<Self> {
        if canvas.dimensions() != mask.dimensions() {
            return Err(Error::ShapeMismatch {
                expected: format!("mask of {}x{}", canvas.width(), canvas.height()),
                actual: format!("{}x{}", mask.width(), mask.height()),
            });
        }
        if steps == 0 {
            return Err(Error::invalid_parameter("num_steps", "must be greater than 0"));
        }

        Ok(Self {
            prompt: prompt.into(),
            canvas,
            mask,
            output_dir: output_dir.into(),
            steps,
        })
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    #[must_use]
    pub fn mask(&self) -> &GrayImage {
        &self.mask
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    #[must_use]
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Where the scene is written.
    #[must_use]
    pub fn scene_path(&self) -> PathBuf {
        self.output_dir.join(SCENE_FILE)
    }
}

/// Generation settings that are not part of the request itself.
#[derive(Debug, Clone)]
pub struct SceneOptions {
    pub negative_prompt: String,
    pub guidance_scale: f32,
    pub seed: Option<u64>,
    /// JPEG quality of `scene.jpg`.
    pub quality: u8,
    /// Upper bound on the inpainting call.
    pub timeout: Option<Duration>,
}

impl Default for SceneOptions {
    fn default() -> Self {
        Self {
            negative_prompt: String::new(),
            guidance_scale: 7.5,
            seed: None,
            quality: 95,
            timeout: None,
        }
    }
}

/// Round both dimensions down to a multiple of 8.
#[must_use]
pub const fn truncated_dimensions(width: u32, height: u32) -> (u32, u32) {
    (width - width % 8, height - height % 8)
}

/// Load the inpainting model at `model_dir` once and wrap it in a shared handle.
///
/// # Errors
///
/// Returns [`Error::PipelineInit`] for any loading failure.
pub fn build_inpainting_pipeline<P: AsRef<Path>>(
    model_dir: P,
    options: &ModelOptions,
) -> Result<Shared<dyn InpaintingModel>> {
    let model_dir = model_dir.as_ref();
    tracing::info!("Building inpainting pipeline on {}", options.device);

    OnnxInpainter::load(model_dir, options)
        .map(Shared::inpainter)
        .map_err(|err| pipeline_init(model_dir, err))
}

pub(crate) fn pipeline_init(model_dir: &Path, err: Error) -> Error {
    match err {
        Error::PipelineInit { .. } => err,
        other => Error::PipelineInit {
            name: model_dir.display().to_string(),
            reason: other.to_string(),
        },
    }
}

/// Inpaint the generate region of the request's canvas and write `scene.jpg`.
///
/// Canvas and mask are both cropped from the top-left to dimensions divisible by 8
/// before submission; the right and bottom remainder strips are dropped. An existing
/// `scene.jpg` is overwritten.
///
/// # Errors
///
/// Returns [`Error::DegenerateImage`] if truncation leaves no pixels,
/// [`Error::SceneGeneration`] if the capability fails or times out,
/// [`Error::PipelineInit`] if the handle is unusable, or a save error.
pub fn generate_scene(
    handle: &Shared<dyn InpaintingModel>,
    request: &SceneRequest,
    options: &SceneOptions,
) -> Result<RgbImage> {
    let (width, height) = request.canvas.dimensions();
    let (target_width, target_height) = truncated_dimensions(width, height);
    if target_width == 0 || target_height == 0 {
        return Err(Error::DegenerateImage { width, height });
    }

    let image = imageops::crop_imm(&request.canvas, 0, 0, target_width, target_height).to_image();
    let mask = imageops::crop_imm(&request.mask, 0, 0, target_width, target_height).to_image();

    tracing::info!(
        "Generating {target_width}x{target_height} scene from {width}x{height} canvas, {} steps",
        request.steps
    );

    let inpaint = InpaintRequest {
        prompt: request.prompt.clone(),
        negative_prompt: options.negative_prompt.clone(),
        image: DynamicImage::ImageRgba8(image).to_rgb8(),
        mask,
        steps: request.steps,
        width: target_width,
        height: target_height,
        guidance_scale: options.guidance_scale,
        seed: options.seed,
    };

    let scene = handle
        .call("scene generation", options.timeout, move |model| {
            model.inpaint(&inpaint)
        })
        .map_err(|err| match err {
            Error::PipelineInit { .. } => err,
            other => Error::SceneGeneration {
                message: other.to_string(),
            },
        })?;

    if scene.dimensions() != (target_width, target_height) {
        return Err(Error::SceneGeneration {
            message: format!(
                "model returned {}x{}, expected {target_width}x{target_height}",
                scene.width(),
                scene.height()
            ),
        });
    }

    let path = request.scene_path();
    save_image(&DynamicImage::ImageRgb8(scene.clone()), &path, options.quality)?;
    tracing::info!("Saved scene to {}", path.display());

    Ok(scene)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use image::{Luma, Rgba};

    use super::*;
    use crate::backend::mock::MockInpainter;

    fn canvas_and_mask(width: u32, height: u32) -> (RgbaImage, GrayImage) {
        let canvas = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 7, 255])
        });
        let mask = GrayImage::from_fn(width, height, |x, _| {
            Luma([if x < width / 2 { 0 } else { 255 }])
        });
        (canvas, mask)
    }

    #[test]
    fn test_missing_model_dir_is_pipeline_init() {
        let tmp = tempfile::tempdir().unwrap();
        let err = build_inpainting_pipeline(tmp.path().join("absent"), &ModelOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::PipelineInit { .. }));

        // Present but empty.
        let err = build_inpainting_pipeline(tmp.path(), &ModelOptions::default()).unwrap_err();
        assert!(matches!(err, Error::PipelineInit { .. }));
    }

    #[test]
    fn test_truncated_dimensions() {
        assert_eq!(truncated_dimensions(397, 601), (392, 600));
        assert_eq!(truncated_dimensions(794, 1202), (792, 1200));
        assert_eq!(truncated_dimensions(400, 600), (400, 600));
        assert_eq!(truncated_dimensions(7, 9), (0, 8));
    }

    #[test]
    fn test_canvas_and_mask_are_truncated_identically() {
        let dir = tempfile::tempdir().unwrap();
        let (canvas, mask) = canvas_and_mask(397, 601);
        let request =
            SceneRequest::new("studio backdrop", canvas.clone(), mask.clone(), dir.path(), 4)
                .unwrap();
        let model = MockInpainter::new();
        let handle = Shared::inpainter(model.clone());

        let scene = generate_scene(&handle, &request, &SceneOptions::default()).unwrap();

        assert_eq!(scene.dimensions(), (392, 600));
        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        let submitted = &requests[0];
        assert_eq!((submitted.width, submitted.height), (392, 600));
        assert_eq!(submitted.image.dimensions(), (392, 600));
        assert_eq!(submitted.mask.dimensions(), (392, 600));
        assert_eq!(submitted.prompt, "studio backdrop");

        for (x, y) in [(0, 0), (391, 599), (200, 300)] {
            let source = canvas.get_pixel(x, y);
            assert_eq!(submitted.image.get_pixel(x, y).0, [source[0], source[1], source[2]]);
            assert_eq!(submitted.mask.get_pixel(x, y), mask.get_pixel(x, y));
        }

        // Left half preserved, right half generated.
        assert_eq!(scene.get_pixel(10, 10).0, [10, 10, 7]);
        assert_eq!(*scene.get_pixel(391, 599), model.fill());

        assert!(request.scene_path().is_file());
    }

    #[test]
    fn test_scene_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SCENE_FILE), b"stale").unwrap();
        let (canvas, mask) = canvas_and_mask(16, 16);
        let request = SceneRequest::new("p", canvas, mask, dir.path(), 1).unwrap();

        generate_scene(
            &Shared::inpainter(MockInpainter::new()),
            &request,
            &SceneOptions::default(),
        )
        .unwrap();

        let written = crate::image::load_image(request.scene_path()).unwrap();
        assert_eq!((written.width(), written.height()), (16, 16));
    }

    #[test]
    fn test_request_validation() {
        let (canvas, _) = canvas_and_mask(16, 16);
        let err = SceneRequest::new("p", canvas.clone(), GrayImage::new(8, 16), ".", 1).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));

        let err = SceneRequest::new("p", canvas, GrayImage::new(16, 16), ".", 0).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }

    #[test]
    fn test_truncation_to_zero_is_degenerate() {
        let (canvas, mask) = canvas_and_mask(7, 20);
        let request = SceneRequest::new("p", canvas, mask, ".", 1).unwrap();
        let model = MockInpainter::new();

        let err = generate_scene(
            &Shared::inpainter(model.clone()),
            &request,
            &SceneOptions::default(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::DegenerateImage { width: 7, height: 20 }));
        assert!(model.requests().is_empty());
    }

    #[test]
    fn test_capability_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (canvas, mask) = canvas_and_mask(16, 16);
        let request = SceneRequest::new("p", canvas, mask, dir.path(), 1).unwrap();

        let err = generate_scene(
            &Shared::inpainter(MockInpainter::failing()),
            &request,
            &SceneOptions::default(),
        )
        .unwrap_err();

        match err {
            Error::SceneGeneration { message } => assert!(message.contains("mock inpainter")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!request.scene_path().exists());
    }

    #[test]
    fn test_slow_capability_times_out() {
        struct Slow;
        impl InpaintingModel for Slow {
            fn inpaint(&mut self, request: &InpaintRequest) -> Result<RgbImage> {
                thread::sleep(Duration::from_millis(500));
                Ok(RgbImage::new(request.width, request.height))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let (canvas, mask) = canvas_and_mask(16, 16);
        let request = SceneRequest::new("p", canvas, mask, dir.path(), 1).unwrap();
        let options = SceneOptions {
            timeout: Some(Duration::from_millis(20)),
            ..SceneOptions::default()
        };

        let err = generate_scene(&Shared::inpainter(Slow), &request, &options).unwrap_err();
        assert!(matches!(err, Error::SceneGeneration { .. }));
    }
}
