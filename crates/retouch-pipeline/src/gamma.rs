//! Gamma correction through a 256-entry lookup table.
//!
//! The table holds `(i / 255)^(1 / gamma)` for every 8-bit level. Each
//! red, green and blue channel is quantized to the nearest level (clamped
//! to `[0, 255]`) and replaced by the table entry. Alpha passes through.
//!
//! Gamma values above 1 brighten midtones, values below 1 darken them,
//! and 1 is the identity up to quantization. The pipeline skips the
//! stage entirely when [`GammaCorrector::is_identity`] holds.

use crate::buffer::PixelBuffer;
use crate::cancel::{CancellationToken, Cancelled};
use crate::color::Color;
use crate::types::PipelineError;

/// Number of quantization levels in the lookup table.
pub const LUT_SIZE: usize = 256;

const MAX_LEVEL: f64 = 255.0;

/// Precomputed gamma lookup table.
#[derive(Debug, Clone, PartialEq)]
pub struct GammaCorrector {
    gamma: f64,
    lut: [f64; LUT_SIZE],
}

impl GammaCorrector {
    /// Build the lookup table for `gamma`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] if `gamma` is zero,
    /// negative, infinite or NaN.
    pub fn new(gamma: f64) -> Result<Self, PipelineError> {
        if !(gamma.is_finite() && gamma > 0.0) {
            return Err(PipelineError::InvalidParameter(format!(
                "gamma must be positive and finite, got {gamma}"
            )));
        }

        let inverse = gamma.recip();
        let lut = std::array::from_fn(|i| {
            #[allow(clippy::cast_precision_loss)]
            let level = i as f64 / MAX_LEVEL;
            level.powf(inverse)
        });
        Ok(Self { gamma, lut })
    }

    /// The gamma exponent this table was built for.
    #[must_use]
    pub const fn gamma(&self) -> f64 {
        self.gamma
    }

    /// The raw lookup table.
    #[must_use]
    pub const fn lut(&self) -> &[f64; LUT_SIZE] {
        &self.lut
    }

    /// Whether correction would leave the image unchanged (gamma == 1).
    #[must_use]
    pub fn is_identity(&self) -> bool {
        (self.gamma - 1.0).abs() < f64::EPSILON
    }

    /// Map one channel value through the table.
    #[must_use]
    pub fn map_channel(&self, value: f64) -> f64 {
        self.lut[quantize(value)]
    }

    /// Map the color channels of one sample; alpha is unchanged.
    #[must_use]
    pub fn map_color(&self, color: Color) -> Color {
        color.map_rgb(|v| self.map_channel(v))
    }

    /// Correct every pixel of `image` into a new buffer.
    #[must_use = "returns the corrected image"]
    pub fn correct(&self, image: &PixelBuffer) -> PixelBuffer {
        self.correct_cancellable(image, &CancellationToken::new())
            .unwrap_or_else(|Cancelled| image.clone())
    }

    /// [`correct`](Self::correct) that polls `token` before each row.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if the token is cancelled mid-way.
    pub fn correct_cancellable(
        &self,
        image: &PixelBuffer,
        token: &CancellationToken,
    ) -> Result<PixelBuffer, Cancelled> {
        image.try_map(token, |c| self.map_color(c))
    }
}

/// Build a corrector for `gamma` and apply it once.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] for a non-positive gamma.
pub fn correct(image: &PixelBuffer, gamma: f64) -> Result<PixelBuffer, PipelineError> {
    Ok(GammaCorrector::new(gamma)?.correct(image))
}

/// Nearest table index for a channel value, clamped to the table.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn quantize(value: f64) -> usize {
    // NaN casts to 0.
    (value * MAX_LEVEL).round().clamp(0.0, MAX_LEVEL) as usize
}
