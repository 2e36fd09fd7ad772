//! Model capabilities the pipeline is built on, and the shared handle that owns them.
//!
//! A capability is an expensive, stateful model (a segmentation network, an inpainting
//! diffusion model, an image-to-video model). Each one is loaded once per process,
//! wrapped in a [`Shared`] handle and passed by reference to whoever needs it. The
//! handle admits at most one in-flight call at a time and can bound how long the caller
//! waits for that call.

use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use image::{DynamicImage, GenericImageView, GrayImage, RgbImage, RgbaImage};

use crate::error::{Error, Result};

/// Foreground segmentation.
pub trait Segmenter: Send {
    /// Predict a foreground-probability map for `image`.
    ///
    /// The map has the same dimensions as the input; higher values mean "subject".
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying model fails.
    fn foreground_mask(&mut self, image: &DynamicImage) -> Result<GrayImage>;

    /// Cut the subject out of `image`, returning RGBA with a transparent background.
    ///
    /// Existing transparency is kept: the output alpha is the smaller of the source
    /// alpha and the predicted foreground probability.
    ///
    /// # Errors
    ///
    /// Returns an error if segmentation fails or yields a map of the wrong size.
    fn remove_background(&mut self, image: &DynamicImage) -> Result<RgbaImage> {
        let mask = self.foreground_mask(image)?;
        ensure_same_size(image.dimensions(), mask.dimensions())?;

        let mut cutout = image.to_rgba8();
        for (pixel, alpha) in cutout.pixels_mut().zip(mask.pixels()) {
            pixel[3] = pixel[3].min(alpha[0]);
        }
        Ok(cutout)
    }
}

/// Everything an inpainting model needs for one generation.
#[derive(Debug, Clone)]
pub struct InpaintRequest {
    /// Text describing the scene to paint.
    pub prompt: String,
    /// Text describing what to steer away from. Empty for none.
    pub negative_prompt: String,
    /// The canvas, `width` x `height`.
    pub image: RgbImage,
    /// Dark = preserve, light = generate. Same size as `image`.
    pub mask: GrayImage,
    /// Number of denoising steps.
    pub steps: u32,
    /// Output width, divisible by 8.
    pub width: u32,
    /// Output height, divisible by 8.
    pub height: u32,
    /// Classifier-free guidance scale.
    pub guidance_scale: f32,
    /// Noise seed. `None` draws one from the OS.
    pub seed: Option<u64>,
}

/// Text-conditioned inpainting.
pub trait InpaintingModel: Send {
    /// Repaint the light regions of `request.mask`, returning a `width` x `height` image.
    ///
    /// # Errors
    ///
    /// Returns an error if generation fails.
    fn inpaint(&mut self, request: &InpaintRequest) -> Result<RgbImage>;
}

/// Image-to-video generation.
pub trait VideoModel: Send {
    /// Animate `image` into a sequence of frames the same size as `image`.
    ///
    /// Identical inputs and seed on the same model and device produce identical frames.
    ///
    /// # Errors
    ///
    /// Returns an error if generation fails.
    fn frames(
        &mut self,
        image: &RgbImage,
        decode_chunk_size: usize,
        seed: u64,
    ) -> Result<Vec<RgbImage>>;
}

/// Destination for encoded video frames.
pub trait FrameSink {
    /// Start a new video at `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot be opened.
    fn begin(&mut self, path: &Path, width: u32, height: u32, fps: u32) -> Result<()>;

    /// Append one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame has the wrong size or cannot be written.
    fn push(&mut self, frame: &RgbImage) -> Result<()>;

    /// Flush and close the current video.
    ///
    /// # Errors
    ///
    /// Returns an error if finalizing the output fails.
    fn finish(&mut self) -> Result<()>;

    /// Drop the current video, if any, so the sink can `begin` again.
    fn abort(&mut self) {}
}

/// A process-wide capability handle.
///
/// Cloning the handle is cheap and shares the same model. Calls through the handle are
/// mutually exclusive.
pub struct Shared<T: ?Sized> {
    inner: Arc<Mutex<T>>,
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("usable", &self.is_usable())
            .finish_non_exhaustive()
    }
}

impl Shared<dyn Segmenter> {
    /// Wrap a segmenter.
    pub fn segmenter(model: impl Segmenter + 'static) -> Self {
        Self::from_arc(Arc::new(Mutex::new(model)))
    }
}

impl Shared<dyn InpaintingModel> {
    /// Wrap an inpainting model.
    pub fn inpainter(model: impl InpaintingModel + 'static) -> Self {
        Self::from_arc(Arc::new(Mutex::new(model)))
    }
}

impl Shared<dyn VideoModel> {
    /// Wrap a video model.
    pub fn video(model: impl VideoModel + 'static) -> Self {
        Self::from_arc(Arc::new(Mutex::new(model)))
    }
}

impl<T> Shared<T> {
    /// Wrap any value.
    pub fn new(value: T) -> Self {
        Self::from_arc(Arc::new(Mutex::new(value)))
    }
}

impl<T: ?Sized> Shared<T> {
    /// Wrap an existing shared mutex.
    pub fn from_arc(inner: Arc<Mutex<T>>) -> Self {
        Self { inner }
    }

    /// `false` once a call has panicked while holding the model.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.inner.is_poisoned()
    }

    fn lock(&self, operation: &str) -> Result<MutexGuard<'_, T>> {
        self.inner.lock().map_err(|_| poisoned(operation))
    }
}

impl<T: ?Sized + Send + 'static> Shared<T> {
    /// Run `f` against the capability.
    ///
    /// Without a timeout `f` runs on the calling thread. With one, it runs on a worker
    /// thread while the caller waits at most `timeout`; on expiry the caller receives
    /// [`Error::Timeout`] and the worker keeps the model locked until it returns.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, [`Error::Timeout`] on expiry, or
    /// [`Error::PipelineInit`] if the model was poisoned by an earlier panic.
    pub fn call<R, F>(&self, operation: &str, timeout: Option<Duration>, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut T) -> Result<R> + Send + 'static,
    {
        let Some(after) = timeout else {
            let mut guard = self.lock(operation)?;
            return f(&mut *guard);
        };

        let inner = Arc::clone(&self.inner);
        let name = operation.to_string();
        let (tx, rx) = mpsc::channel();

        thread::Builder::new()
            .name(format!("snapscape-{operation}"))
            .spawn(move || {
                let result = match inner.lock() {
                    Ok(mut guard) => f(&mut *guard),
                    Err(_) => Err(poisoned(&name)),
                };
                // The caller may have stopped waiting.
                let _ = tx.send(result);
            })?;

        match rx.recv_timeout(after) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("{operation} did not finish within {after:?}");
                Err(Error::Timeout {
                    operation: operation.to_string(),
                    after,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(poisoned(operation)),
        }
    }
}

fn poisoned(operation: &str) -> Error {
    Error::PipelineInit {
        name: operation.to_string(),
        reason: "model handle is unusable after a panic in an earlier call".to_string(),
    }
}

pub(crate) fn ensure_same_size(expected: (u32, u32), actual: (u32, u32)) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::ShapeMismatch {
            expected: format!("{}x{}", expected.0, expected.1),
            actual: format!("{}x{}", actual.0, actual.1),
        })
    }
}

#[cfg(test)]
mod tests {
    use image::{Luma, Rgba};

    use super::*;

    struct HalfMask;

    impl Segmenter for HalfMask {
        fn foreground_mask(&mut self, image: &DynamicImage) -> Result<GrayImage> {
            let (w, h) = image.dimensions();
            Ok(GrayImage::from_fn(w, h, |x, _| {
                Luma([if x < w / 2 { 255 } else { 0 }])
            }))
        }
    }

    #[test]
    fn test_remove_background_applies_alpha() {
        let src = DynamicImage::new_rgb8(8, 2);
        let cutout = HalfMask.remove_background(&src).unwrap();

        assert_eq!(cutout.dimensions(), (8, 2));
        assert_eq!(cutout.get_pixel(0, 0)[3], 255);
        assert_eq!(cutout.get_pixel(7, 1)[3], 0);
    }

    #[test]
    fn test_remove_background_keeps_existing_transparency() {
        let src = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 1, Rgba([5, 5, 5, 40])));
        let cutout = HalfMask.remove_background(&src).unwrap();

        assert_eq!(cutout.get_pixel(0, 0)[3], 40);
        assert_eq!(cutout.get_pixel(3, 0)[3], 0);
    }

    #[test]
    fn test_call_without_timeout() {
        let handle = Shared::new(41u32);
        let value = handle
            .call("increment", None, |n| {
                *n += 1;
                Ok(*n)
            })
            .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_call_times_out() {
        let handle = Shared::new(());
        let err = handle
            .call("slow", Some(Duration::from_millis(20)), |()| {
                thread::sleep(Duration::from_millis(500));
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[test]
    fn test_call_within_timeout() {
        let handle = Shared::new(String::from("ok"));
        let value = handle
            .call("fast", Some(Duration::from_secs(5)), |s| Ok(s.clone()))
            .unwrap();
        assert_eq!(value, "ok");
    }

    #[test]
    fn test_panic_poisons_handle() {
        let handle = Shared::new(0u8);
        let err = handle
            .call("boom", Some(Duration::from_secs(5)), |_| -> Result<()> {
                panic!("model crashed")
            })
            .unwrap_err();

        assert!(matches!(err, Error::PipelineInit { .. }));
        assert!(!handle.is_usable());
        assert!(matches!(
            handle.call("again", None, |_| Ok(())).unwrap_err(),
            Error::PipelineInit { .. }
        ));
    }
}
