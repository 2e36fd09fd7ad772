//! Stable Diffusion inpainting on ONNX Runtime.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{concatenate, Array1, Array3, Axis};
use ort::session::Session;
use ort::value::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::capability::{ensure_same_size, InpaintRequest, InpaintingModel};
use crate::error::{Error, Result};
use crate::model::{ModelDir, ModelOptions};

use super::scheduler::{randn, DdimScheduler};
use super::tensor::{
    extract, mask_to_tensor, missing_output, rgb_to_tensor, shape_error, tensor_to_rgb,
};
use super::text::TextEncoder;
use super::vae::{self, LatentTensor};

/// Latent channels of the Stable Diffusion VAE.
const LATENT_CHANNELS: usize = 4;

/// Inpainting pipeline loaded from an ONNX export directory.
///
/// The directory holds `tokenizer.json` and `model.onnx` files under `text_encoder/`,
/// `vae_encoder/`, `unet/` and `vae_decoder/`. The `UNet` takes 9 input channels:
/// noisy latents, the latent mask and the masked-image latents.
pub struct OnnxInpainter {
    text: TextEncoder,
    vae_encoder: Session,
    unet: Session,
    vae_decoder: Session,
}

impl OnnxInpainter {
    /// Load all sessions from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PipelineInit`] if a part is missing, or a model load error.
    pub fn load<P: AsRef<Path>>(path: P, options: &ModelOptions) -> Result<Self> {
        let dir = ModelDir::open(path)?;
        tracing::info!("Loading inpainting pipeline from {}", dir.root().display());

        let text = TextEncoder::load(&dir, options.device)?;
        let vae_encoder = dir.session("vae_encoder/model.onnx", options.device)?;
        let unet = dir.session("unet/model.onnx", options.device)?;
        let vae_decoder = dir.session("vae_decoder/model.onnx", options.device)?;

        Ok(Self {
            text,
            vae_encoder,
            unet,
            vae_decoder,
        })
    }

    /// Prompt embeddings, stacked `[negative, prompt]` when guidance is on.
    fn embeddings(&mut self, request: &InpaintRequest, guided: bool) -> Result<Array3<f32>> {
        let cond = self.text.encode(&request.prompt)?;
        if !guided {
            return Ok(cond);
        }

        let uncond = self.text.encode(&request.negative_prompt)?;
        concatenate(Axis(0), &[uncond.view(), cond.view()]).map_err(|err| shape_error(&err))
    }

    fn predict_noise(
        &mut self,
        latents: &LatentTensor,
        conditioning: &LatentTensor,
        timestep: usize,
        embeddings: &Array3<f32>,
        guidance_scale: Option<f32>,
    ) -> Result<LatentTensor> {
        let sample = concatenate(Axis(1), &[latents.view(), conditioning.view()])
            .map_err(|err| shape_error(&err))?;
        let sample = if guidance_scale.is_some() {
            concatenate(Axis(0), &[sample.view(), sample.view()]).map_err(|err| shape_error(&err))?
        } else {
            sample
        };

        let timestep = i64::try_from(timestep)
            .map_err(|_| Error::invalid_parameter("timestep", "out of range"))?;

        let sample_value = Tensor::from_array(sample).map_err(|source| Error::Inference { source })?;
        let timestep_value = Tensor::from_array(Array1::from_vec(vec![timestep]))
            .map_err(|source| Error::Inference { source })?;
        let hidden_value =
            Tensor::from_array(embeddings.clone()).map_err(|source| Error::Inference { source })?;

        let outputs = self
            .unet
            .run(ort::inputs![
                "sample" => sample_value,
                "timestep" => timestep_value,
                "encoder_hidden_states" => hidden_value,
            ])
            .map_err(|source| Error::Inference { source })?;

        let output = outputs
            .values()
            .next()
            .ok_or_else(|| missing_output("noise prediction"))?;
        let noise: LatentTensor = extract(&output)?;

        let Some(scale) = guidance_scale else {
            return Ok(noise);
        };

        let uncond = noise.index_axis(Axis(0), 0);
        let cond = noise.index_axis(Axis(0), 1);
        let guided = &uncond + &((&cond - &uncond) * scale);
        Ok(guided.insert_axis(Axis(0)))
    }
}

impl InpaintingModel for OnnxInpainter {
    fn inpaint(&mut self, request: &InpaintRequest) -> Result<RgbImage> {
        let (width, height) = (request.width, request.height);
        if width == 0 || height == 0 || width % 8 != 0 || height % 8 != 0 {
            return Err(Error::invalid_parameter(
                "size",
                "width and height must be positive multiples of 8",
            ));
        }
        ensure_same_size((width, height), request.image.dimensions())?;
        ensure_same_size((width, height), request.mask.dimensions())?;

        let steps = usize::try_from(request.steps)
            .map_err(|_| Error::invalid_parameter("num_steps", "out of range"))?;
        let scheduler = DdimScheduler::new(steps)?;

        let mut rng = request
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);

        let guidance_scale = (request.guidance_scale > 1.0).then_some(request.guidance_scale);
        let embeddings = self.embeddings(request, guidance_scale.is_some())?;

        // Generated regions are zeroed before encoding.
        let image = rgb_to_tensor(&request.image);
        let keep = mask_to_tensor(&request.mask).mapv(|m| 1.0 - m);
        let masked_image = &image * &keep;
        let masked_latents = vae::encode(&mut self.vae_encoder, &masked_image)?;

        let latent_mask = imageops::resize(&request.mask, width / 8, height / 8, FilterType::Nearest);
        let latent_mask = mask_to_tensor(&latent_mask);
        let conditioning = concatenate(Axis(1), &[latent_mask.view(), masked_latents.view()])
            .map_err(|err| shape_error(&err))?;

        let latent_shape = (
            1,
            LATENT_CHANNELS,
            (height / 8) as usize,
            (width / 8) as usize,
        );
        let mut latents: LatentTensor = randn(latent_shape, &mut rng) * scheduler.init_noise_sigma();

        tracing::debug!(
            "Inpainting {width}x{height} with {steps} steps, guidance {:?}",
            guidance_scale
        );

        let pb = super::denoise_progress(steps, "Denoising");
        for &timestep in scheduler.timesteps() {
            let noise = self.predict_noise(
                &latents,
                &conditioning,
                timestep,
                &embeddings,
                guidance_scale,
            )?;
            latents = scheduler.step(&noise, timestep, &latents);
            pb.inc(1);
        }
        pb.finish_with_message("Denoising complete");

        let decoded = vae::decode(&mut self.vae_decoder, &latents)?;
        let output = tensor_to_rgb(&decoded, 0)?;
        ensure_same_size((width, height), output.dimensions())?;

        Ok(output)
    }
}
