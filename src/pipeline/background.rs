//! Background removal stage.

use image::RgbaImage;

use crate::capability::Segmenter;
use crate::error::{Error, Result};
use crate::image::decode_image;

/// Decode `bytes` and cut the subject out, leaving the background transparent.
///
/// The output has the source's width and height. Nothing is written to disk.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `bytes` is not a raster image, or the
/// segmenter's error.
pub fn remove_background<S: Segmenter + ?Sized>(
    segmenter: &mut S,
    bytes: &[u8],
) -> Result<RgbaImage> {
    let image = decode_image(bytes)?;
    let cutout = segmenter.remove_background(&image)?;

    if cutout.dimensions() != (image.width(), image.height()) {
        return Err(Error::ShapeMismatch {
            expected: format!("{}x{}", image.width(), image.height()),
            actual: format!("{}x{}", cutout.width(), cutout.height()),
        });
    }

    tracing::debug!("Removed background from {}x{} image", image.width(), image.height());
    Ok(cutout)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    use super::*;
    use crate::backend::mock::MockSegmenter;

    fn png(image: &RgbImage) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image.clone())
            .write_to(&mut bytes, ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_background_becomes_transparent() {
        let photo = RgbImage::from_fn(12, 8, |x, _| {
            if (4..8).contains(&x) {
                Rgb([200, 30, 30])
            } else {
                Rgb([255, 255, 255])
            }
        });

        let cutout = remove_background(&mut MockSegmenter::new(), &png(&photo)).unwrap();

        assert_eq!(cutout.dimensions(), (12, 8));
        assert_eq!(cutout.get_pixel(0, 0)[3], 0);
        assert_eq!(cutout.get_pixel(5, 3).0, [200, 30, 30, 255]);
    }

    #[test]
    fn test_undecodable_bytes() {
        let mut segmenter = MockSegmenter::new();
        let calls = segmenter.calls();

        let err = remove_background(&mut segmenter, b"definitely not an image").unwrap_err();

        assert!(matches!(err, Error::InvalidInput { .. }));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
