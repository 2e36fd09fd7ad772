//! Variational Autoencoder operations for encoding/decoding images.

use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;

use crate::error::{Error, Result};

use super::tensor::{extract, missing_output, ImageTensor};

/// Latent tensor type, (N, 4, H/8, W/8).
pub type LatentTensor = Array4<f32>;

/// VAE scaling factor (from Stable Diffusion).
pub const VAE_SCALE: f32 = 0.18215;

/// Encode an image to latent space without applying [`VAE_SCALE`].
///
/// # Errors
///
/// Returns an error if inference fails.
pub fn encode_raw(encoder: &mut Session, image: &ImageTensor) -> Result<LatentTensor> {
    let input_value =
        Tensor::from_array(image.clone()).map_err(|source| Error::Inference { source })?;

    let outputs = encoder
        .run(ort::inputs![input_value])
        .map_err(|source| Error::Inference { source })?;

    // Get first output
    let output = outputs
        .values()
        .next()
        .ok_or_else(|| missing_output("latent_sample"))?;

    extract(&output)
}

/// Encode an image to latent space using the VAE encoder.
///
/// # Arguments
///
/// * `encoder` - ONNX session for the VAE encoder
/// * `image` - Image tensor in NCHW format with values in [-1, 1]
///
/// # Returns
///
/// Latent tensor in NCHW format, scaled for the `UNet`.
///
/// # Errors
///
/// Returns an error if inference fails.
pub fn encode(encoder: &mut Session, image: &ImageTensor) -> Result<LatentTensor> {
    // Scale latents as per SD convention
    Ok(encode_raw(encoder, image)? * VAE_SCALE)
}

/// Decode latents back to image space using the VAE decoder.
///
/// # Arguments
///
/// * `decoder` - ONNX session for the VAE decoder
/// * `latent` - Latent tensor in NCHW format
///
/// # Returns
///
/// Image tensor in NCHW format with values in [-1, 1].
///
/// # Errors
///
/// Returns an error if inference fails.
pub fn decode(decoder: &mut Session, latent: &LatentTensor) -> Result<ImageTensor> {
    // Unscale latents
    let unscaled = latent / VAE_SCALE;

    let input_value =
        Tensor::from_array(unscaled).map_err(|source| Error::Inference { source })?;

    let outputs = decoder
        .run(ort::inputs![input_value])
        .map_err(|source| Error::Inference { source })?;

    // Get first output
    let output = outputs
        .values()
        .next()
        .ok_or_else(|| missing_output("sample"))?;

    extract(&output)
}
