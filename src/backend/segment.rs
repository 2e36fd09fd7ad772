//! Salient-object segmentation with U²-Net style ONNX models.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use ort::session::Session;
use ort::value::Tensor;

use crate::capability::Segmenter;
use crate::error::{Error, Result};
use crate::model::{ModelCache, ModelOptions, SegmentationModel};

use super::tensor::{missing_output, normalized_tensor};

/// Segmenter backed by a downloaded rembg model.
pub struct OnnxSegmenter {
    model: SegmentationModel,
    session: Session,
}

impl OnnxSegmenter {
    /// Load `model`, downloading it into the cache on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be downloaded or loaded.
    pub fn new(model: SegmentationModel, options: &ModelOptions) -> Result<Self> {
        let cache = ModelCache::new(options.cache_dir.clone())?;

        tracing::info!("Loading segmentation model {}...", model.filename());
        let session = cache.load_session(model, options.device)?;

        Ok(Self { model, session })
    }
}

impl Segmenter for OnnxSegmenter {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_lossless
    )]
    fn foreground_mask(&mut self, image: &DynamicImage) -> Result<GrayImage> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::DegenerateImage { width, height });
        }

        let size = self.model.input_size();
        let rgb = image.resize_exact(size, size, FilterType::Lanczos3).to_rgb8();
        let input = normalized_tensor(&rgb, self.model.mean(), self.model.std());
        let input_value = Tensor::from_array(input).map_err(|source| Error::Inference { source })?;

        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|source| Error::Inference { source })?;

        // The first output is the finest prediction.
        let output = outputs
            .values()
            .next()
            .ok_or_else(|| missing_output("segmentation"))?;

        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|source| Error::Inference { source })?;

        let pixels = (size * size) as usize;
        let Some(prediction) = data.get(..pixels) else {
            return Err(Error::ShapeMismatch {
                expected: format!("at least {pixels} values"),
                actual: data.len().to_string(),
            });
        };

        // Stretch to the full 0..=255 range.
        let (min, max) = prediction
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = (max - min).max(f32::EPSILON);

        let map = GrayImage::from_fn(size, size, |x, y| {
            let v = prediction[(y * size + x) as usize];
            Luma([(((v - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8])
        });

        Ok(imageops::resize(&map, width, height, FilterType::Lanczos3))
    }
}
