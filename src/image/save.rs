//! Image saving utilities.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::DynamicImage;

use crate::error::{Error, Result};

/// Save an image, picking the format from the file extension.
///
/// JPEG output is flattened to RGB and written with the given quality; every other
/// extension goes through the `image` crate's default encoder for that format.
/// An existing file at `path` is overwritten.
///
/// # Arguments
///
/// * `img` - Image to write
/// * `path` - Output file path
/// * `quality` - JPEG quality (1-100), ignored for other formats
///
/// # Errors
///
/// Returns an error if the image cannot be saved.
pub fn save_image<P: AsRef<Path>>(img: &DynamicImage, path: P, quality: u8) -> Result<()> {
    let path = path.as_ref();

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png")
        .to_lowercase();

    match extension.as_str() {
        "jpg" | "jpeg" => {
            let output = BufWriter::new(File::create(path)?);
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(output, quality);
            // JPEG has no alpha channel
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_with_encoder(encoder)
                .map_err(|source| Error::ImageSave {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        _ => {
            img.save(path).map_err(|source| Error::ImageSave {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }

    tracing::debug!("Saved {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use image::{GenericImageView, Rgba, RgbaImage};

    use super::*;

    #[test]
    fn test_png_keeps_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cutout.png");
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 0])));

        save_image(&img, &path, 95).unwrap();

        let back = image::open(&path).unwrap().to_rgba8();
        assert_eq!(back.get_pixel(0, 0), &Rgba([1, 2, 3, 0]));
    }

    #[test]
    fn test_jpeg_from_rgba_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.jpg");
        std::fs::write(&path, b"stale").unwrap();

        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 8, Rgba([200, 10, 10, 255])));
        save_image(&img, &path, 90).unwrap();

        let back = image::open(&path).unwrap();
        assert_eq!(back.dimensions(), (16, 8));
    }

    #[test]
    fn test_missing_directory_fails() {
        let img = DynamicImage::new_rgb8(2, 2);
        assert!(save_image(&img, "/nonexistent/snapscape/scene.jpg", 95).is_err());
    }
}
