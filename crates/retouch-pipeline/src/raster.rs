//! Conversion between encoded images, `image::RgbaImage`, and
//! [`PixelBuffer`].
//!
//! 8-bit channels map to `[0, 1]` by dividing by 255. The reverse
//! direction clamps and rounds to the nearest level.

use image::{Rgba, RgbaImage};

use crate::buffer::PixelBuffer;
use crate::color::Color;
use crate::types::PipelineError;

const MAX_LEVEL: f64 = 255.0;

/// Decode an encoded image (PNG, JPEG, BMP, WebP) into a buffer.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] for empty input and
/// [`PipelineError::ImageDecode`] if the bytes cannot be decoded.
pub fn decode(bytes: &[u8]) -> Result<PixelBuffer, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    let image = image::load_from_memory(bytes)?.to_rgba8();
    Ok(PixelBuffer::from(&image))
}

impl From<&RgbaImage> for PixelBuffer {
    fn from(image: &RgbaImage) -> Self {
        Self::from_fn(image.width(), image.height(), |x, y| {
            let Rgba([r, g, b, a]) = *image.get_pixel(x, y);
            Color::new(level(r), level(g), level(b), level(a))
        })
    }
}

impl PixelBuffer {
    /// Quantize to an 8-bit RGBA image.
    #[must_use]
    pub fn to_rgba8(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width(), self.height(), |x, y| {
            let c = self.get(i64::from(x), i64::from(y));
            Rgba([
                to_u8(c.red),
                to_u8(c.green),
                to_u8(c.blue),
                to_u8(c.alpha),
            ])
        })
    }
}

fn level(value: u8) -> f64 {
    f64::from(value) / MAX_LEVEL
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u8(value: f64) -> u8 {
    // NaN casts to 0.
    (value * MAX_LEVEL).round().clamp(0.0, MAX_LEVEL) as u8
}
