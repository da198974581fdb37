//! Row-major grid of [`Color`] samples shared by every pipeline stage.
//!
//! Reads never fail: [`PixelBuffer::get`] returns [`Color::BLACK`] for
//! any coordinate outside the grid. Resampling and convolution rely on
//! this instead of branching on borders at every call site.
//!
//! Stages build their output with [`PixelBuffer::try_from_rows`], which
//! fills destination rows in parallel and polls a
//! [`CancellationToken`] before each row.

use rayon::prelude::*;

use crate::cancel::{CancellationToken, Cancelled};
use crate::color::Color;
use crate::types::{Dimensions, PipelineError};

/// An owned, immutable-by-convention image of `f64` RGBA samples.
///
/// Invariant: `pixels.len() == width * height`. Zero-sized buffers are
/// allowed and represent degenerate resample output.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    dimensions: Dimensions,
    pixels: Vec<Color>,
}

impl PixelBuffer {
    /// Create a buffer filled with opaque black.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self::from_pixel(width, height, Color::BLACK)
    }

    /// Create a buffer where every sample is `color`.
    #[must_use]
    pub fn from_pixel(width: u32, height: u32, color: Color) -> Self {
        let dimensions = Dimensions { width, height };
        Self {
            dimensions,
            pixels: vec![color; dimensions.pixel_count()],
        }
    }

    /// Create a buffer by evaluating `f(x, y)` for every coordinate.
    #[must_use]
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> Color) -> Self {
        let dimensions = Dimensions { width, height };
        let mut pixels = Vec::with_capacity(dimensions.pixel_count());
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self { dimensions, pixels }
    }

    /// Wrap an existing row-major sample vector.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::BufferSize`] if `pixels.len()` does not
    /// equal `width * height`.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<Color>) -> Result<Self, PipelineError> {
        let dimensions = Dimensions { width, height };
        let expected = dimensions.pixel_count();
        if pixels.len() != expected {
            return Err(PipelineError::BufferSize {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self { dimensions, pixels })
    }

    /// Build a buffer row by row, in parallel.
    ///
    /// `fill_row(y, row)` receives a destination row initialised to
    /// black and must write all `width` samples. Rows are disjoint, so no
    /// locking is involved. The token is polled before each row; once it
    /// is cancelled no further rows are started.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if the token was cancelled before every row
    /// was filled.
    pub fn try_from_rows<F>(
        width: u32,
        height: u32,
        token: &CancellationToken,
        fill_row: F,
    ) -> Result<Self, Cancelled>
    where
        F: Fn(u32, &mut [Color]) + Sync,
    {
        token.check()?;
        let dimensions = Dimensions { width, height };
        let mut pixels = vec![Color::BLACK; dimensions.pixel_count()];
        if !pixels.is_empty() {
            pixels
                .par_chunks_exact_mut(width as usize)
                .enumerate()
                .try_for_each(|(y, row)| {
                    token.check()?;
                    #[allow(clippy::cast_possible_truncation)]
                    fill_row(y as u32, row);
                    Ok(())
                })?;
        }
        Ok(Self { dimensions, pixels })
    }

    /// Apply `f` to every sample, producing a new buffer of the same size.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if the token was cancelled mid-way.
    pub fn try_map<F>(&self, token: &CancellationToken, f: F) -> Result<Self, Cancelled>
    where
        F: Fn(Color) -> Color + Sync,
    {
        Self::try_from_rows(self.width(), self.height(), token, |y, row| {
            for (dst, src) in row.iter_mut().zip(self.row(y)) {
                *dst = f(*src);
            }
        })
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.dimensions.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.dimensions.height
    }

    /// Width and height together.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Whether the buffer holds no samples (either dimension is zero).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// All samples in row-major order.
    #[must_use]
    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }

    /// Consume the buffer and return the row-major samples.
    #[must_use]
    pub fn into_pixels(self) -> Vec<Color> {
        self.pixels
    }

    /// One row of samples. Returns an empty slice for `y >= height`.
    #[must_use]
    pub fn row(&self, y: u32) -> &[Color] {
        if y >= self.height() {
            return &[];
        }
        let width = self.width() as usize;
        let start = y as usize * width;
        &self.pixels[start..start + width]
    }

    /// Sample at `(x, y)`, or [`Color::BLACK`] when out of range.
    ///
    /// Signed coordinates let filters address neighbours to the left of
    /// or above the grid without special-casing.
    #[must_use]
    pub fn get(&self, x: i64, y: i64) -> Color {
        self.index(x, y)
            .and_then(|i| self.pixels.get(i))
            .copied()
            .unwrap_or(Color::BLACK)
    }

    /// Sample at `(x, y)` with both coordinates clamped into the grid.
    ///
    /// Only an empty buffer falls back to [`Color::BLACK`].
    #[must_use]
    pub fn get_clamped(&self, x: i64, y: i64) -> Color {
        if self.is_empty() {
            return Color::BLACK;
        }
        let x = x.clamp(0, i64::from(self.width()) - 1);
        let y = y.clamp(0, i64::from(self.height()) - 1);
        self.get(x, y)
    }

    /// Mean of [`Color::intensity`] over all samples, `0.0` when empty.
    #[must_use]
    pub fn mean_intensity(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.pixels.par_iter().map(|c| c.intensity()).sum();
        #[allow(clippy::cast_precision_loss)]
        let count = self.pixels.len() as f64;
        sum / count
    }

    fn index(&self, x: i64, y: i64) -> Option<usize> {
        let x = u32::try_from(x).ok().filter(|&x| x < self.width())?;
        let y = u32::try_from(y).ok().filter(|&y| y < self.height())?;
        Some(y as usize * self.width() as usize + x as usize)
    }
}
