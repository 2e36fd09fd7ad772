//! Image-to-video with a Stable Video Diffusion ONNX export.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{concatenate, Array1, Array2, Array3, Array5, Axis, Ix2, Ix5};
use ort::session::Session;
use ort::value::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::capability::VideoModel;
use crate::error::{Error, Result};
use crate::model::{ModelDir, ModelOptions};

use super::scheduler::{randn, EulerScheduler};
use super::tensor::{
    extract, missing_output, normalized_tensor, rgb_to_tensor, shape_error, tensor_to_rgb,
};
use super::vae;

/// Resolution the model was trained at.
const MODEL_WIDTH: u32 = 1024;
const MODEL_HEIGHT: u32 = 576;

/// Input size of the CLIP image encoder.
const CLIP_SIZE: u32 = 224;
const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_1];

const LATENT_CHANNELS: usize = 4;

/// Micro-conditioning passed to the `UNet` as `added_time_ids`.
const CONDITIONING_FPS: f32 = 7.0;
const MOTION_BUCKET_ID: f32 = 127.0;
const NOISE_AUG_STRENGTH: f32 = 0.02;

/// Guidance ramps linearly from the first frame to the last.
const MIN_GUIDANCE: f32 = 1.0;
const MAX_GUIDANCE: f32 = 3.0;

/// Stable Video Diffusion pipeline loaded from an ONNX export directory.
///
/// Expects `model.onnx` files under `image_encoder/`, `vae_encoder/`, `unet/` and
/// `vae_decoder/`.
pub struct OnnxVideoModel {
    image_encoder: Session,
    vae_encoder: Session,
    unet: Session,
    vae_decoder: Session,
    num_frames: usize,
    num_steps: usize,
}

impl OnnxVideoModel {
    /// Load all sessions from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PipelineInit`] if a part is missing or cannot be loaded.
    pub fn load<P: AsRef<Path>>(path: P, options: &ModelOptions) -> Result<Self> {
        let dir = ModelDir::open(path)?;
        tracing::info!("Loading video pipeline from {}", dir.root().display());

        Ok(Self {
            image_encoder: dir.session("image_encoder/model.onnx", options.device)?,
            vae_encoder: dir.session("vae_encoder/model.onnx", options.device)?,
            unet: dir.session("unet/model.onnx", options.device)?,
            vae_decoder: dir.session("vae_decoder/model.onnx", options.device)?,
            num_frames: 25,
            num_steps: 25,
        })
    }

    /// Set the number of generated frames.
    #[must_use]
    pub const fn with_frames(mut self, frames: usize) -> Self {
        self.num_frames = frames;
        self
    }

    /// Set the number of denoising steps.
    #[must_use]
    pub const fn with_steps(mut self, steps: usize) -> Self {
        self.num_steps = steps;
        self
    }

    /// CLIP embedding of the conditioning image, shape (1, 1, D).
    fn image_embedding(&mut self, image: &RgbImage) -> Result<Array3<f32>> {
        let resized = imageops::resize(image, CLIP_SIZE, CLIP_SIZE, FilterType::CatmullRom);
        let input = normalized_tensor(&resized, CLIP_MEAN, CLIP_STD);
        let input_value = Tensor::from_array(input).map_err(|source| Error::Inference { source })?;

        let outputs = self
            .image_encoder
            .run(ort::inputs![input_value])
            .map_err(|source| Error::Inference { source })?;
        let output = outputs
            .values()
            .next()
            .ok_or_else(|| missing_output("image_embeds"))?;

        let embeds = extract::<Ix2>(&output)?;
        Ok(embeds.insert_axis(Axis(1)))
    }

    fn predict(
        &mut self,
        sample: &Array5<f32>,
        timestep: f32,
        embedding: &Array3<f32>,
        added_time_ids: &Array2<f32>,
    ) -> Result<Array5<f32>> {
        let sample_value =
            Tensor::from_array(sample.clone()).map_err(|source| Error::Inference { source })?;
        let timestep_value = Tensor::from_array(Array1::from_vec(vec![timestep]))
            .map_err(|source| Error::Inference { source })?;
        let hidden_value =
            Tensor::from_array(embedding.clone()).map_err(|source| Error::Inference { source })?;
        let time_ids_value = Tensor::from_array(added_time_ids.clone())
            .map_err(|source| Error::Inference { source })?;

        let outputs = self
            .unet
            .run(ort::inputs![
                "sample" => sample_value,
                "timestep" => timestep_value,
                "encoder_hidden_states" => hidden_value,
                "added_time_ids" => time_ids_value,
            ])
            .map_err(|source| Error::Inference { source })?;

        let output = outputs
            .values()
            .next()
            .ok_or_else(|| missing_output("noise prediction"))?;
        extract::<Ix5>(&output)
    }
}

impl VideoModel for OnnxVideoModel {
    #[allow(clippy::too_many_lines)]
    fn frames(
        &mut self,
        image: &RgbImage,
        decode_chunk_size: usize,
        seed: u64,
    ) -> Result<Vec<RgbImage>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::DegenerateImage { width, height });
        }
        if decode_chunk_size == 0 || self.num_frames == 0 {
            return Err(Error::invalid_parameter(
                "decode_chunk_size",
                "frames and chunk size must be greater than 0",
            ));
        }

        let scheduler = EulerScheduler::new(self.num_steps)?;
        let mut rng = StdRng::seed_from_u64(seed);
        let frames = self.num_frames;
        let (latent_h, latent_w) = ((MODEL_HEIGHT / 8) as usize, (MODEL_WIDTH / 8) as usize);

        let cond_embedding = self.image_embedding(image)?;
        let embeddings = concatenate(
            Axis(0),
            &[Array3::zeros(cond_embedding.raw_dim()).view(), cond_embedding.view()],
        )
        .map_err(|err| shape_error(&err))?;

        // Noise-augmented conditioning latents, repeated for every frame.
        let resized = imageops::resize(image, MODEL_WIDTH, MODEL_HEIGHT, FilterType::Lanczos3);
        let pixels = rgb_to_tensor(&resized);
        let noise: ndarray::Array4<f32> = randn(pixels.raw_dim(), &mut rng);
        let augmented = pixels + noise * NOISE_AUG_STRENGTH;
        let image_latents = vae::encode_raw(&mut self.vae_encoder, &augmented)?;
        let image_latents = image_latents
            .insert_axis(Axis(1))
            .broadcast((1, frames, LATENT_CHANNELS, latent_h, latent_w))
            .ok_or_else(|| Error::ShapeMismatch {
                expected: format!("(1, {LATENT_CHANNELS}, {latent_h}, {latent_w}) image latents"),
                actual: "incompatible encoder output".to_string(),
            })?
            .to_owned();
        let conditioning = concatenate(
            Axis(0),
            &[Array5::zeros(image_latents.raw_dim()).view(), image_latents.view()],
        )
        .map_err(|err| shape_error(&err))?;

        let time_ids = Array2::from_shape_vec(
            (2, 3),
            [CONDITIONING_FPS, MOTION_BUCKET_ID, NOISE_AUG_STRENGTH].repeat(2),
        )
        .map_err(|err| shape_error(&err))?;

        let guidance = frame_guidance(frames);
        let noise: Array5<f32> = randn((1, frames, LATENT_CHANNELS, latent_h, latent_w), &mut rng);
        let mut latents = noise * scheduler.init_noise_sigma();

        let pb = super::denoise_progress(scheduler.len(), "Animating");
        for index in 0..scheduler.len() {
            let sigma = scheduler.sigma(index);
            let scaled = scheduler.scale_input(&latents, sigma);
            let doubled = concatenate(Axis(0), &[scaled.view(), scaled.view()])
                .map_err(|err| shape_error(&err))?;
            let sample = concatenate(Axis(2), &[doubled.view(), conditioning.view()])
                .map_err(|err| shape_error(&err))?;

            let prediction = self.predict(&sample, scheduler.timestep(sigma), &embeddings, &time_ids)?;
            let uncond = prediction.index_axis(Axis(0), 0);
            let cond = prediction.index_axis(Axis(0), 1);

            let mut guided = uncond.to_owned();
            for (f, mut frame) in guided.axis_iter_mut(Axis(0)).enumerate() {
                let u = uncond.index_axis(Axis(0), f);
                let c = cond.index_axis(Axis(0), f);
                frame.assign(&(&u + &((&c - &u) * guidance[f])));
            }

            latents = scheduler.step(&guided.insert_axis(Axis(0)), index, &latents);
            pb.inc(1);
        }
        pb.finish_with_message("Animation complete");

        let latents = latents.index_axis_move(Axis(0), 0);
        let mut output = Vec::with_capacity(frames);
        for start in (0..frames).step_by(decode_chunk_size) {
            let end = (start + decode_chunk_size).min(frames);
            let chunk = latents.slice(ndarray::s![start..end, .., .., ..]).to_owned();
            let decoded = vae::decode(&mut self.vae_decoder, &chunk)?;

            for i in 0..(end - start) {
                let frame = tensor_to_rgb(&decoded, i)?;
                output.push(imageops::resize(&frame, width, height, FilterType::CatmullRom));
            }
        }

        tracing::debug!("Generated {} frames", output.len());
        Ok(output)
    }
}

/// Guidance scale for each of `frames` frames.
#[allow(clippy::cast_precision_loss)]
fn frame_guidance(frames: usize) -> Vec<f32> {
    let last = frames.saturating_sub(1).max(1) as f32;
    (0..frames)
        .map(|f| (MAX_GUIDANCE - MIN_GUIDANCE).mul_add(f as f32 / last, MIN_GUIDANCE))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guidance_ramps_across_frames() {
        let guidance = frame_guidance(25);

        assert_eq!(guidance.len(), 25);
        assert!((guidance[0] - MIN_GUIDANCE).abs() < 1e-6);
        assert!((guidance[24] - MAX_GUIDANCE).abs() < 1e-6);
        assert!(guidance.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_single_frame_guidance() {
        assert_eq!(frame_guidance(1), vec![MIN_GUIDANCE]);
        assert!(frame_guidance(0).is_empty());
    }
}
