//! Mock capabilities for testing and debugging without model files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::capability::{
    ensure_same_size, FrameSink, InpaintRequest, InpaintingModel, Segmenter, VideoModel,
};
use crate::error::{Error, Result};

use super::ffmpeg::validate_output;

/// Segmenter that treats every visible, non-white pixel as subject.
#[derive(Debug, Clone, Default)]
pub struct MockSegmenter {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl MockSegmenter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A segmenter whose every call fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Shared counter of `foreground_mask` calls, valid across clones.
    #[must_use]
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Segmenter for MockSegmenter {
    fn foreground_mask(&mut self, image: &DynamicImage) -> Result<GrayImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::invalid_input("mock segmenter failure"));
        }

        let rgba = image.to_rgba8();
        Ok(GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
            let pixel = rgba.get_pixel(x, y);
            let near_white = pixel[0] >= 250 && pixel[1] >= 250 && pixel[2] >= 250;
            Luma([if pixel[3] > 0 && !near_white { 255 } else { 0 }])
        }))
    }
}

/// Inpainter that paints the generate region a flat color and records each request.
#[derive(Debug, Clone)]
pub struct MockInpainter {
    fill: Rgb<u8>,
    requests: Arc<Mutex<Vec<InpaintRequest>>>,
    fail: bool,
}

impl Default for MockInpainter {
    fn default() -> Self {
        Self {
            fill: Rgb([90, 140, 200]),
            requests: Arc::default(),
            fail: false,
        }
    }
}

impl MockInpainter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An inpainter whose every call fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Color painted into the generate region.
    #[must_use]
    pub const fn fill(&self) -> Rgb<u8> {
        self.fill
    }

    /// Requests received so far, valid across clones.
    #[must_use]
    pub fn requests(&self) -> Vec<InpaintRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl InpaintingModel for MockInpainter {
    fn inpaint(&mut self, request: &InpaintRequest) -> Result<RgbImage> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        if self.fail {
            return Err(Error::invalid_input("mock inpainter failure"));
        }

        ensure_same_size((request.width, request.height), request.image.dimensions())?;
        ensure_same_size((request.width, request.height), request.mask.dimensions())?;

        let fill = self.fill;
        Ok(RgbImage::from_fn(request.width, request.height, |x, y| {
            if request.mask.get_pixel(x, y)[0] >= 128 {
                fill
            } else {
                *request.image.get_pixel(x, y)
            }
        }))
    }
}

/// Video model that returns seeded brightness jitter of the input image.
#[derive(Debug, Clone)]
pub struct MockVideoModel {
    frames: usize,
}

impl Default for MockVideoModel {
    fn default() -> Self {
        Self { frames: 6 }
    }
}

impl MockVideoModel {
    #[must_use]
    pub fn new(frames: usize) -> Self {
        Self { frames }
    }
}

impl VideoModel for MockVideoModel {
    fn frames(
        &mut self,
        image: &RgbImage,
        decode_chunk_size: usize,
        seed: u64,
    ) -> Result<Vec<RgbImage>> {
        if decode_chunk_size == 0 {
            return Err(Error::invalid_parameter(
                "decode_chunk_size",
                "must be greater than 0",
            ));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        Ok((0..self.frames)
            .map(|_| {
                let shift: i16 = rng.random_range(-8..=8);
                let mut frame = image.clone();
                for pixel in frame.pixels_mut() {
                    for c in pixel.0.iter_mut() {
                        *c = u8::try_from((i16::from(*c) + shift).clamp(0, 255)).unwrap_or(u8::MAX);
                    }
                }
                frame
            })
            .collect())
    }
}

/// [`FrameSink`] that keeps frames in memory and writes their raw bytes on finish.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    frames: Arc<Mutex<Vec<RgbImage>>>,
    current: Option<(PathBuf, u32, u32)>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames received so far, valid across clones.
    #[must_use]
    pub fn frames(&self) -> Vec<RgbImage> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl FrameSink for MemorySink {
    fn begin(&mut self, path: &Path, width: u32, height: u32, fps: u32) -> Result<()> {
        validate_output(width, height, fps)?;
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.current = Some((path.to_path_buf(), width, height));
        Ok(())
    }

    fn push(&mut self, frame: &RgbImage) -> Result<()> {
        let Some((_, width, height)) = self.current else {
            return Err(Error::VideoGeneration {
                message: "no encode in progress".to_string(),
            });
        };
        ensure_same_size((width, height), frame.dimensions())?;
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let Some((path, _, _)) = self.current.take() else {
            return Err(Error::VideoGeneration {
                message: "no encode in progress".to_string(),
            });
        };
        let bytes: Vec<u8> = self
            .frames()
            .iter()
            .flat_map(|frame| frame.as_raw().iter().copied())
            .collect();
        fs::write(&path, bytes)?;
        Ok(())
    }

    fn abort(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;

    #[test]
    fn test_mock_segmenter_ignores_white_and_transparent() {
        let image = RgbaImage::from_fn(3, 1, |x, _| match x {
            0 => Rgba([255, 255, 255, 255]),
            1 => Rgba([10, 10, 10, 0]),
            _ => Rgba([10, 10, 10, 255]),
        });
        let mut segmenter = MockSegmenter::new();
        let calls = segmenter.calls();

        let map = segmenter
            .foreground_mask(&DynamicImage::ImageRgba8(image))
            .unwrap();

        assert_eq!(map.dimensions(), (3, 1));
        assert_eq!(map.get_pixel(0, 0)[0], 0);
        assert_eq!(map.get_pixel(1, 0)[0], 0);
        assert_eq!(map.get_pixel(2, 0)[0], 255);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mock_video_is_deterministic() {
        let image = RgbImage::from_pixel(4, 4, Rgb([100, 100, 100]));
        let mut model = MockVideoModel::default();

        let a = model.frames(&image, 8, 42).unwrap();
        let b = model.frames(&image, 8, 42).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 6);
        assert!(a.iter().all(|frame| frame.dimensions() == (4, 4)));
    }

    #[test]
    fn test_memory_sink_requires_begin() {
        let mut sink = MemorySink::new();
        assert!(sink.push(&RgbImage::new(2, 2)).is_err());
        assert!(sink.finish().is_err());
    }
}
