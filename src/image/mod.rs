//! Image decoding, saving, canvas composition and mask derivation.

mod canvas;
mod load;
mod mask;
mod save;

pub use canvas::{compose_canvas, CANVAS_FILL};
pub use load::{decode_image, load_image};
pub use mask::{derive_mask, MaskOptions};
pub use save::save_image;

/// Mask value for pixels the inpainting model must keep.
pub const MASK_PRESERVE: u8 = 0;

/// Mask value for pixels the inpainting model may repaint.
pub const MASK_GENERATE: u8 = 255;
