//! Noise schedules for the denoising loops.

use ndarray::{Array, Dimension, ShapeBuilder};
use rand::Rng;

use crate::error::{Error, Result};

/// Number of diffusion steps the models were trained with.
const TRAIN_TIMESTEPS: usize = 1000;

/// Scaled-linear beta schedule used by Stable Diffusion.
const BETA_START: f32 = 0.00085;
const BETA_END: f32 = 0.012;

/// Timestep offset used by the Stable Diffusion inpainting checkpoints.
const STEPS_OFFSET: usize = 1;

/// Deterministic DDIM sampler (eta = 0).
#[derive(Debug, Clone)]
pub struct DdimScheduler {
    alphas_cumprod: Vec<f32>,
    timesteps: Vec<usize>,
    step_ratio: usize,
}

impl DdimScheduler {
    /// Build a schedule with `steps` inference steps.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] unless `1 <= steps <= 1000`.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(steps: usize) -> Result<Self> {
        if steps == 0 || steps > TRAIN_TIMESTEPS {
            return Err(Error::invalid_parameter(
                "num_steps",
                "must be between 1 and 1000",
            ));
        }

        let (start, end) = (BETA_START.sqrt(), BETA_END.sqrt());
        let last = (TRAIN_TIMESTEPS - 1) as f32;
        let mut product = 1.0_f32;
        let alphas_cumprod = (0..TRAIN_TIMESTEPS)
            .map(|i| {
                let beta = (end - start).mul_add(i as f32 / last, start).powi(2);
                product *= 1.0 - beta;
                product
            })
            .collect();

        let step_ratio = TRAIN_TIMESTEPS / steps;
        // The offset only applies while the noisiest timestep stays in range.
        let offset = if (steps - 1) * step_ratio + STEPS_OFFSET < TRAIN_TIMESTEPS {
            STEPS_OFFSET
        } else {
            0
        };
        let timesteps = (0..steps).rev().map(|i| i * step_ratio + offset).collect();

        Ok(Self {
            alphas_cumprod,
            timesteps,
            step_ratio,
        })
    }

    /// Timesteps to visit, from noisiest to cleanest.
    #[must_use]
    pub fn timesteps(&self) -> &[usize] {
        &self.timesteps
    }

    /// Standard deviation of the initial noise.
    #[must_use]
    pub const fn init_noise_sigma(&self) -> f32 {
        1.0
    }

    fn alpha_cumprod(&self, timestep: usize) -> f32 {
        self.alphas_cumprod[timestep.min(TRAIN_TIMESTEPS - 1)]
    }

    /// Move `sample` from `timestep` to the previous timestep given predicted noise.
    #[must_use]
    pub fn step<D: Dimension>(
        &self,
        noise_pred: &Array<f32, D>,
        timestep: usize,
        sample: &Array<f32, D>,
    ) -> Array<f32, D> {
        let alpha_t = self.alpha_cumprod(timestep);
        let alpha_prev = timestep
            .checked_sub(self.step_ratio)
            .map_or(self.alphas_cumprod[0], |prev| self.alpha_cumprod(prev));

        let pred_original = (sample - &(noise_pred * (1.0 - alpha_t).sqrt())) / alpha_t.sqrt();
        pred_original * alpha_prev.sqrt() + noise_pred * (1.0 - alpha_prev).sqrt()
    }
}

/// Euler sampler over Karras sigmas for v-prediction models.
#[derive(Debug, Clone)]
pub struct EulerScheduler {
    sigmas: Vec<f32>,
}

impl EulerScheduler {
    const SIGMA_MIN: f32 = 0.002;
    const SIGMA_MAX: f32 = 700.0;
    const RHO: f32 = 7.0;

    /// Build a schedule with `steps` inference steps.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `steps` is zero.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(steps: usize) -> Result<Self> {
        if steps == 0 {
            return Err(Error::invalid_parameter("steps", "must be greater than 0"));
        }

        let max_inv = Self::SIGMA_MAX.powf(1.0 / Self::RHO);
        let min_inv = Self::SIGMA_MIN.powf(1.0 / Self::RHO);
        let denominator = (steps.max(2) - 1) as f32;

        let mut sigmas: Vec<f32> = (0..steps)
            .map(|i| (min_inv - max_inv).mul_add(i as f32 / denominator, max_inv).powf(Self::RHO))
            .collect();
        sigmas.push(0.0);

        Ok(Self { sigmas })
    }

    /// Number of denoising steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sigmas.len() - 1
    }

    /// `true` if the schedule has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Noise level at step `index`.
    #[must_use]
    pub fn sigma(&self, index: usize) -> f32 {
        self.sigmas[index]
    }

    /// Standard deviation of the initial noise.
    #[must_use]
    pub fn init_noise_sigma(&self) -> f32 {
        Self::SIGMA_MAX.mul_add(Self::SIGMA_MAX, 1.0).sqrt()
    }

    /// Scale the model input for noise level `sigma`.
    #[must_use]
    pub fn scale_input<D: Dimension>(&self, sample: &Array<f32, D>, sigma: f32) -> Array<f32, D> {
        sample / sigma.mul_add(sigma, 1.0).sqrt()
    }

    /// Timestep conditioning value for noise level `sigma`.
    #[must_use]
    pub fn timestep(&self, sigma: f32) -> f32 {
        0.25 * sigma.ln()
    }

    /// Advance `sample` from step `index` to `index + 1` given a v-prediction.
    #[must_use]
    pub fn step<D: Dimension>(
        &self,
        model_output: &Array<f32, D>,
        index: usize,
        sample: &Array<f32, D>,
    ) -> Array<f32, D> {
        let sigma = self.sigmas[index];
        let sigma_next = self.sigmas[index + 1];
        let variance = sigma.mul_add(sigma, 1.0);

        let denoised = model_output * (-sigma / variance.sqrt()) + sample / variance;
        let derivative = (sample - &denoised) / sigma;
        sample + &(derivative * (sigma_next - sigma))
    }
}

/// Standard-normal noise of the given shape.
pub fn randn<Sh, D, R>(shape: Sh, rng: &mut R) -> Array<f32, D>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
    R: Rng + ?Sized,
{
    Array::from_shape_simple_fn(shape, || gaussian(&mut *rng))
}

/// Box-Muller transform.
fn gaussian<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    let u1 = rng.random::<f32>().max(f32::MIN_POSITIVE);
    let u2 = rng.random::<f32>();
    (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
}

#[cfg(test)]
mod tests {
    use ndarray::{arr1, Array4};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_ddim_timesteps_descend() {
        let scheduler = DdimScheduler::new(50).unwrap();
        let steps = scheduler.timesteps();

        assert_eq!(steps.len(), 50);
        assert!(steps.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(steps[0], 981);
        assert_eq!(steps[49], 1);
    }

    #[test]
    fn test_ddim_bounds() {
        assert!(DdimScheduler::new(0).is_err());
        assert!(DdimScheduler::new(1001).is_err());

        for steps in [500, 501, 999, 1000] {
            let scheduler = DdimScheduler::new(steps).unwrap();
            let timesteps = scheduler.timesteps();
            assert_eq!(timesteps.len(), steps);
            assert!(timesteps.iter().all(|&t| t < TRAIN_TIMESTEPS));
            assert!(timesteps.windows(2).all(|w| w[0] > w[1]), "{steps} steps");
        }

        let full = DdimScheduler::new(1000).unwrap();
        assert_eq!(full.timesteps()[0], TRAIN_TIMESTEPS - 1);
        assert_eq!(full.timesteps()[999], 0);
    }

    #[test]
    fn test_ddim_step_with_true_noise_lands_on_previous_marginal() {
        let scheduler = DdimScheduler::new(10).unwrap();
        let t = scheduler.timesteps()[3];
        let prev = t - scheduler.step_ratio;

        let x0 = arr1(&[0.3_f32, -0.7, 1.2]);
        let eps = arr1(&[1.0_f32, -0.5, 0.25]);
        let a_t = scheduler.alpha_cumprod(t);
        let a_prev = scheduler.alpha_cumprod(prev);

        let sample = &x0 * a_t.sqrt() + &eps * (1.0 - a_t).sqrt();
        let expected = &x0 * a_prev.sqrt() + &eps * (1.0 - a_prev).sqrt();
        let stepped = scheduler.step(&eps, t, &sample);

        for (a, b) in stepped.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_euler_sigmas() {
        let scheduler = EulerScheduler::new(25).unwrap();

        assert_eq!(scheduler.len(), 25);
        assert!((scheduler.sigma(0) - 700.0).abs() < 0.5);
        assert!((scheduler.sigma(24) - 0.002).abs() < 1e-4);
        assert!(EulerScheduler::new(0).is_err());
        assert_eq!(EulerScheduler::new(1).unwrap().len(), 1);
    }

    #[test]
    fn test_euler_last_step_returns_denoised() {
        let scheduler = EulerScheduler::new(3).unwrap();
        let sample = arr1(&[1.0_f32, 2.0]);
        let output = arr1(&[0.0_f32, 0.0]);

        // With a zero v-prediction the denoised estimate is sample / (sigma^2 + 1).
        let sigma = scheduler.sigma(2);
        let stepped = scheduler.step(&output, 2, &sample);
        let expected = &sample / sigma.mul_add(sigma, 1.0);

        for (a, b) in stepped.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_randn_is_seeded() {
        let a: Array4<f32> = randn((1, 4, 8, 8), &mut StdRng::seed_from_u64(42));
        let b: Array4<f32> = randn((1, 4, 8, 8), &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);

        #[allow(clippy::cast_precision_loss)]
        let mean = a.sum() / a.len() as f32;
        assert!(mean.abs() < 0.3);
    }
}
