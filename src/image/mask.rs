//! Inpainting mask derivation.
//!
//! The inpainting model repaints light mask pixels and keeps dark ones. Segmentation
//! reports the subject as light, so the map is inverted before use: subject pixels end
//! up at [`MASK_PRESERVE`](super::MASK_PRESERVE) and the surroundings at
//! [`MASK_GENERATE`](super::MASK_GENERATE). Getting this
//! backwards makes the model paint over the product and keep the empty canvas.

use image::{imageops, DynamicImage, GrayImage, RgbaImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::open;

use crate::capability::{ensure_same_size, Segmenter};
use crate::error::Result;

/// Optional clean-up of the foreground map before it is inverted.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MaskOptions {
    /// Binarize the foreground map: values at or above the threshold become subject.
    pub threshold: Option<u8>,
    /// Smooth the matte edge with a morphological opening and a Gaussian blur.
    pub post_process: bool,
}

/// Radius of the opening used when post-processing.
const OPEN_RADIUS: u8 = 1;

/// Gaussian sigma used when post-processing.
const BLUR_SIGMA: f32 = 2.0;

/// Derive the inpainting mask for `canvas`.
///
/// Runs `segmenter` over the canvas and inverts the resulting foreground map so that the
/// subject is dark (preserve) and the background light (generate). The mask has exactly
/// the canvas dimensions.
///
/// # Errors
///
/// Returns an error if segmentation fails or returns a map of the wrong size.
pub fn derive_mask<S: Segmenter + ?Sized>(
    segmenter: &mut S,
    canvas: &RgbaImage,
    options: &MaskOptions,
) -> Result<GrayImage> {
    let mut foreground = segmenter.foreground_mask(&DynamicImage::ImageRgba8(canvas.clone()))?;
    ensure_same_size(canvas.dimensions(), foreground.dimensions())?;

    if let Some(threshold) = options.threshold {
        binarize(&mut foreground, threshold);
    }

    if options.post_process {
        foreground = smooth(&foreground);
    }

    imageops::invert(&mut foreground);

    tracing::debug!(
        "Derived {}x{} mask",
        foreground.width(),
        foreground.height()
    );
    Ok(foreground)
}

fn binarize(map: &mut GrayImage, threshold: u8) {
    for pixel in map.pixels_mut() {
        pixel[0] = if pixel[0] >= threshold { 255 } else { 0 };
    }
}

/// Opening removes specks, the blur rounds the outline, re-binarizing keeps it hard.
fn smooth(map: &GrayImage) -> GrayImage {
    let opened = open(map, Norm::LInf, OPEN_RADIUS);
    let mut blurred: GrayImage = gaussian_blur_f32(&opened, BLUR_SIGMA);
    binarize(&mut blurred, 128);
    blurred
}
