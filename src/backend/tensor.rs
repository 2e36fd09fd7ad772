//! Conversions between images and NCHW tensors.

use image::{GrayImage, ImageBuffer, Rgb, RgbImage};
use ndarray::{Array, Array4, ArrayD, Dimension, IxDyn};

use crate::error::{Error, Result};

/// Image tensor in NCHW format (batch, channels, height, width).
pub type ImageTensor = Array4<f32>;

/// Convert an RGB image to a (1, 3, H, W) tensor normalized to [-1, 1].
#[allow(clippy::cast_possible_truncation)]
pub fn rgb_to_tensor(img: &RgbImage) -> ImageTensor {
    let (width, height) = (img.width() as usize, img.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, height, width));

    for (x, y, pixel) in img.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            // Normalize from [0, 255] to [-1, 1]
            tensor[[0, c, y, x]] = (f32::from(pixel[c]) / 127.5) - 1.0;
        }
    }

    tensor
}

/// Convert an RGB image to a (1, 3, H, W) tensor with per-channel mean/std normalization.
#[allow(clippy::cast_possible_truncation)]
pub fn normalized_tensor(img: &RgbImage, mean: [f32; 3], std: [f32; 3]) -> ImageTensor {
    let (width, height) = (img.width() as usize, img.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, height, width));

    for (x, y, pixel) in img.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            tensor[[0, c, y, x]] = (f32::from(pixel[c]) / 255.0 - mean[c]) / std[c];
        }
    }

    tensor
}

/// Convert a mask to a (1, 1, H, W) tensor: 1.0 where the mask is light, 0.0 elsewhere.
#[allow(clippy::cast_possible_truncation)]
pub fn mask_to_tensor(mask: &GrayImage) -> ImageTensor {
    let (width, height) = (mask.width() as usize, mask.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 1, height, width));

    for (x, y, pixel) in mask.enumerate_pixels() {
        if pixel[0] >= 128 {
            tensor[[0, 0, y as usize, x as usize]] = 1.0;
        }
    }

    tensor
}

/// Convert image `index` of a normalized NCHW tensor back to an RGB image.
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] if the tensor is not a batch of 3-channel images
/// or `index` is out of range.
#[allow(clippy::cast_possible_truncation)]
pub fn tensor_to_rgb(tensor: &ImageTensor, index: usize) -> Result<RgbImage> {
    let (batch, channels, height, width) = tensor.dim();
    if channels != 3 || index >= batch {
        return Err(Error::ShapeMismatch {
            expected: format!("image {index} of a (N, 3, H, W) tensor"),
            actual: format!("{:?}", tensor.shape()),
        });
    }

    let width_px = u32::try_from(width).map_err(|_| too_large(width))?;
    let height_px = u32::try_from(height).map_err(|_| too_large(height))?;

    Ok(ImageBuffer::from_fn(width_px, height_px, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([
            denormalize(tensor[[index, 0, y, x]]),
            denormalize(tensor[[index, 1, y, x]]),
            denormalize(tensor[[index, 2, y, x]]),
        ])
    }))
}

fn too_large(size: usize) -> Error {
    Error::ShapeMismatch {
        expected: "image dimension within u32".to_string(),
        actual: size.to_string(),
    }
}

/// Denormalize a value from [-1, 1] to [0, 255] with clamping.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn denormalize(value: f32) -> u8 {
    // Safe: clamped to [0, 255] range before casting
    let scaled = (value + 1.0) * 127.5;
    scaled.clamp(0.0, 255.0) as u8
}

/// Extract an f32 array of dimensionality `D` from an ONNX value.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
pub fn extract<D: Dimension>(value: &ort::value::DynValue) -> Result<Array<f32, D>> {
    let (shape_info, data) = value
        .try_extract_tensor::<f32>()
        .map_err(|source| Error::Inference { source })?;

    // Safe: tensor dimensions are always non-negative and within bounds
    let dims: Vec<usize> = shape_info.iter().map(|&x| x as usize).collect();

    let array = ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec()).map_err(|_| {
        Error::ShapeMismatch {
            expected: format!("{dims:?}"),
            actual: "reshape failed".to_string(),
        }
    })?;

    array
        .into_dimensionality::<D>()
        .map_err(|_| Error::ShapeMismatch {
            expected: format!("{}D tensor", D::NDIM.unwrap_or(0)),
            actual: format!("{}D tensor", dims.len()),
        })
}

pub fn missing_output(what: &str) -> Error {
    Error::ShapeMismatch {
        expected: format!("{what} output"),
        actual: "no output".to_string(),
    }
}

pub fn shape_error(err: &ndarray::ShapeError) -> Error {
    Error::ShapeMismatch {
        expected: "compatible tensor shapes".to_string(),
        actual: err.to_string(),
    }
}
