//! Resizing by inverse mapping.
//!
//! Each destination pixel `(x, y)` maps back to the source position
//! `(x / scale, y / scale)` with `scale = new_width / source_width`. The
//! same factor applies to both axes, so the vertical mapping follows the
//! horizontal one even when flooring made the two axes' size ratios
//! differ. The [`InterpolationMethod`] decides how a color is read at
//! that fractional position.
//!
//! Both methods replicate the nearest edge pixel when a sample position
//! or one of its bilinear neighbours falls past the last row or column,
//! so a uniform image stays uniform at any scale. Destination rows are
//! computed in parallel.

use crate::buffer::PixelBuffer;
use crate::cancel::{CancellationToken, Cancelled};
use crate::color::Color;
use crate::types::{Dimensions, InterpolationMethod};

impl InterpolationMethod {
    /// Read a color from `source` at the fractional position `(sx, sy)`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn sample(self, source: &PixelBuffer, sx: f64, sy: f64) -> Color {
        match self {
            Self::NearestNeighbor => source.get_clamped(sx.round() as i64, sy.round() as i64),
            Self::Bilinear => {
                let (x0, y0) = (sx.floor(), sy.floor());
                let (dx, dy) = (sx - x0, sy - y0);
                let (x0, y0) = (x0 as i64, y0 as i64);

                let top = source
                    .get_clamped(x0, y0)
                    .lerp(source.get_clamped(x0 + 1, y0), dx);
                let bottom = source
                    .get_clamped(x0, y0 + 1)
                    .lerp(source.get_clamped(x0 + 1, y0 + 1), dx);
                top.lerp(bottom, dy)
            }
        }
    }
}

/// Resize `source` to `new_width` x `new_height` using `method`.
///
/// A zero width or height yields an empty buffer. The source is never
/// modified.
#[must_use = "returns the resampled image"]
pub fn resample(
    source: &PixelBuffer,
    method: InterpolationMethod,
    new_width: u32,
    new_height: u32,
) -> PixelBuffer {
    let target = Dimensions {
        width: new_width,
        height: new_height,
    };
    resample_cancellable(source, method, target, &CancellationToken::new())
        .unwrap_or_else(|Cancelled| PixelBuffer::new(new_width, new_height))
}

/// [`resample`] that polls `token` before each destination row.
///
/// # Errors
///
/// Returns [`Cancelled`] if the token is cancelled before the last row
/// is started.
pub fn resample_cancellable(
    source: &PixelBuffer,
    method: InterpolationMethod,
    target: Dimensions,
    token: &CancellationToken,
) -> Result<PixelBuffer, Cancelled> {
    // One factor for both axes, taken from the widths. An empty source
    // gives an infinite scale, mapping every pixel to 0.
    let scale = f64::from(target.width) / f64::from(source.width());

    PixelBuffer::try_from_rows(target.width, target.height, token, |y, row| {
        let sy = f64::from(y) / scale;
        for (x, px) in (0u32..).zip(row.iter_mut()) {
            let sx = f64::from(x) / scale;
            *px = method.sample(source, sx, sy);
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn checker(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Color::WHITE
            } else {
                Color::opaque(0.2, 0.4, 0.6)
            }
        })
    }

    fn gradient(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::from_fn(width, height, |x, y| {
            Color::new(
                f64::from(x) / f64::from(width),
                f64::from(y) / f64::from(height),
                0.5,
                1.0,
            )
        })
    }

    #[test]
    fn nearest_scale_one_is_identity() {
        for source in [checker(7, 5), gradient(9, 4), checker(1, 1)] {
            let out = resample(
                &source,
                InterpolationMethod::NearestNeighbor,
                source.width(),
                source.height(),
            );
            assert_eq!(out, source);
        }
    }

    #[test]
    fn bilinear_scale_one_is_identity() {
        let source = gradient(6, 6);
        let out = resample(&source, InterpolationMethod::Bilinear, 6, 6);
        assert_eq!(out, source);
    }

    #[test]
    fn bilinear_integer_aligned_samples_are_exact() {
        // At 2x, every even destination coordinate maps to an integer
        // source coordinate and must reproduce that source pixel exactly.
        let source = gradient(5, 4);
        let out = resample(&source, InterpolationMethod::Bilinear, 10, 8);
        for y in (0..8).step_by(2) {
            for x in (0..10).step_by(2) {
                assert_eq!(
                    out.get(i64::from(x), i64::from(y)),
                    source.get(i64::from(x / 2), i64::from(y / 2)),
                    "destination ({x}, {y})",
                );
            }
        }
    }

    #[test]
    fn bilinear_uniform_gray_upscale_stays_uniform() {
        let gray = Color::new(0.5, 0.5, 0.5, 1.0);
        let source = PixelBuffer::from_pixel(4, 4, gray);
        let out = resample(&source, InterpolationMethod::Bilinear, 8, 8);
        assert_eq!(out.dimensions(), Dimensions { width: 8, height: 8 });
        assert!(out.pixels().iter().all(|&c| c == gray));
    }

    #[test]
    fn bilinear_midpoint_blends_neighbours() {
        let source = PixelBuffer::from_fn(2, 1, |x, _| {
            if x == 0 { Color::BLACK } else { Color::WHITE }
        });
        let out = resample(&source, InterpolationMethod::Bilinear, 4, 1);
        // Destination x=1 maps to source x=0.5.
        let mid = out.get(1, 0);
        assert!((mid.red - 0.5).abs() < 1e-12);
        assert!((mid.alpha - 1.0).abs() < 1e-12);
    }

    #[test]
    fn single_pixel_source_fills_any_size() {
        let color = Color::opaque(0.3, 0.7, 0.1);
        let source = PixelBuffer::from_pixel(1, 1, color);
        for (w, h) in [(1, 1), (5, 5), (3, 9)] {
            let out = resample(&source, InterpolationMethod::NearestNeighbor, w, h);
            assert!(out.pixels().iter().all(|&c| c == color), "{w}x{h}");
        }
    }

    #[test]
    fn nearest_rounds_to_closest_source_pixel() {
        let source = PixelBuffer::from_fn(3, 1, |x, _| Color::gray(f64::from(x) / 2.0));
        let out = resample(&source, InterpolationMethod::NearestNeighbor, 2, 1);
        // Destination x=1 maps to source x=1.5, which rounds to 2.
        assert_eq!(out.get(1, 0), source.get(2, 0));
    }

    #[test]
    fn fractional_scale_uses_one_factor_for_both_axes() {
        // 10x3 at 1.5 floors to 15x4, so the height ratio is 4/3 rather
        // than 1.5. Rows must still map back through 1.5.
        let source = PixelBuffer::from_fn(10, 3, |_, y| Color::gray(f64::from(y) / 2.0));
        let out = resample(&source, InterpolationMethod::Bilinear, 15, 4);
        for y in 0..4_u32 {
            let expected = (f64::from(y) / 1.5).min(2.0) / 2.0;
            let got = out.get(7, i64::from(y)).red;
            assert!((got - expected).abs() < 1e-12, "row {y}: {got} vs {expected}");
        }
        assert!((out.get(0, 1).red - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn downscale_dimensions() {
        let out = resample(&checker(10, 6), InterpolationMethod::Bilinear, 5, 3);
        assert_eq!(out.dimensions(), Dimensions { width: 5, height: 3 });
    }

    #[test]
    fn zero_target_is_empty() {
        let out = resample(&checker(4, 4), InterpolationMethod::Bilinear, 0, 0);
        assert!(out.is_empty());
        let out = resample(&checker(4, 4), InterpolationMethod::NearestNeighbor, 3, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn empty_source_resamples_to_black() {
        let out = resample(&PixelBuffer::new(0, 0), InterpolationMethod::Bilinear, 2, 2);
        assert!(out.pixels().iter().all(|&c| c == Color::BLACK));
    }

    #[test]
    fn cancelled_token_aborts() {
        let token = CancellationToken::new();
        token.cancel();
        let result = resample_cancellable(
            &checker(8, 8),
            InterpolationMethod::Bilinear,
            Dimensions { width: 16, height: 16 },
            &token,
        );
        assert_eq!(result, Err(Cancelled));
    }
}
