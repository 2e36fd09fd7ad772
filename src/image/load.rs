//! Image loading utilities.

use std::path::Path;

use image::{DynamicImage, GenericImageView};

use crate::error::{Error, Result};

/// Load an image from disk.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or decoded.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
    let path = path.as_ref();

    image::open(path).map_err(|source| Error::ImageLoad {
        path: path.to_path_buf(),
        source,
    })
}

/// Decode an encoded image (PNG, JPEG, ...) from memory.
///
/// The format is guessed from the content, not from any file name.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the bytes are empty or are not a raster image
/// the decoder understands.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(Error::invalid_input("source image is empty"));
    }

    let img = image::load_from_memory(bytes)
        .map_err(|err| Error::invalid_input(format!("could not decode source image: {err}")))?;

    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::DegenerateImage { width, height });
    }

    tracing::debug!("Decoded {width}x{height} {:?} image", img.color());
    Ok(img)
}
