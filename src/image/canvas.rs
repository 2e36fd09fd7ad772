//! Placement of a cut-out subject on an enlarged canvas.

use image::{imageops, Rgba, RgbaImage};

use crate::error::{Error, Result};

/// Opaque white, the flat color the canvas starts from.
pub const CANVAS_FILL: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Center `subject` on a white canvas twice its width and height.
///
/// The subject is alpha-composited "over" the canvas using its own alpha channel:
/// opaque pixels replace the white, fully transparent pixels leave it untouched and
/// partially transparent pixels blend proportionally. The offset is
/// `((2w - w) / 2, (2h - h) / 2)` with floor division. The input is not modified.
///
/// # Errors
///
/// Returns [`Error::DegenerateImage`] if the subject has zero width or height, or if
/// the doubled size does not fit in `u32`.
pub fn compose_canvas(subject: &RgbaImage) -> Result<RgbaImage> {
    let (width, height) = subject.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::DegenerateImage { width, height });
    }

    let (Some(canvas_width), Some(canvas_height)) = (width.checked_mul(2), height.checked_mul(2))
    else {
        return Err(Error::DegenerateImage { width, height });
    };

    let x_offset = (canvas_width - width) / 2;
    let y_offset = (canvas_height - height) / 2;

    let mut canvas = RgbaImage::from_pixel(canvas_width, canvas_height, CANVAS_FILL);
    imageops::overlay(
        &mut canvas,
        subject,
        i64::from(x_offset),
        i64::from(y_offset),
    );

    tracing::debug!(
        "Composed {canvas_width}x{canvas_height} canvas, subject at ({x_offset}, {y_offset})"
    );
    Ok(canvas)
}
