//! Floating-point RGBA color samples.
//!
//! Every pipeline stage works on [`Color`] values with channels
//! conceptually in `[0, 1]`. Stages never clamp on input; only the edge
//! filter clamps its output, and only the raster conversion quantizes.

use serde::{Deserialize, Serialize};

/// A single RGBA sample with `f64` channels.
///
/// Channels are nominally in `[0, 1]`. Values outside that range are
/// carried through unchanged until a stage explicitly clamps them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    /// Red channel.
    pub red: f64,
    /// Green channel.
    pub green: f64,
    /// Blue channel.
    pub blue: f64,
    /// Opacity. Carried through resampling and gamma correction.
    pub alpha: f64,
}

impl Color {
    /// Opaque black, the fallback for every out-of-range read.
    pub const BLACK: Self = Self::opaque(0.0, 0.0, 0.0);

    /// Opaque white.
    pub const WHITE: Self = Self::opaque(1.0, 1.0, 1.0);

    /// Create a color from all four channels.
    #[must_use]
    pub const fn new(red: f64, green: f64, blue: f64, alpha: f64) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    /// Create a fully opaque color.
    #[must_use]
    pub const fn opaque(red: f64, green: f64, blue: f64) -> Self {
        Self::new(red, green, blue, 1.0)
    }

    /// Uniform gray with the given intensity, fully opaque.
    #[must_use]
    pub const fn gray(level: f64) -> Self {
        Self::opaque(level, level, level)
    }

    /// Linearly interpolate every channel (alpha included) towards `other`.
    ///
    /// `t = 0` returns `self` exactly and `t = 1` returns `other`.
    #[must_use]
    pub fn lerp(self, other: Self, t: f64) -> Self {
        Self {
            red: lerp(self.red, other.red, t),
            green: lerp(self.green, other.green, t),
            blue: lerp(self.blue, other.blue, t),
            alpha: lerp(self.alpha, other.alpha, t),
        }
    }

    /// Apply `f` to the red, green and blue channels, leaving alpha alone.
    #[must_use]
    pub fn map_rgb(self, mut f: impl FnMut(f64) -> f64) -> Self {
        Self {
            red: f(self.red),
            green: f(self.green),
            blue: f(self.blue),
            alpha: self.alpha,
        }
    }

    /// Replace the alpha channel.
    #[must_use]
    pub const fn with_alpha(self, alpha: f64) -> Self {
        Self { alpha, ..self }
    }

    /// Red, green and blue as an array, in that order.
    #[must_use]
    pub const fn rgb(self) -> [f64; 3] {
        [self.red, self.green, self.blue]
    }

    /// Unweighted mean of the red, green and blue channels.
    #[must_use]
    pub fn intensity(self) -> f64 {
        (self.red + self.green + self.blue) / 3.0
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

/// `a + t * (b - a)`.
#[must_use]
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    t.mul_add(b - a, a)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-12, "expected {b}, got {a}");
    }

    #[test]
    fn black_is_opaque() {
        assert_eq!(Color::BLACK, Color::new(0.0, 0.0, 0.0, 1.0));
        assert_eq!(Color::default(), Color::BLACK);
    }

    #[test]
    fn lerp_endpoints() {
        assert_close(lerp(0.2, 0.8, 0.0), 0.2);
        assert_close(lerp(0.2, 0.8, 1.0), 0.8);
        assert_close(lerp(0.2, 0.8, 0.5), 0.5);
    }

    #[test]
    fn lerp_identical_values_is_exact() {
        for t in [0.0, 0.25, 0.5, 0.75, 1.0] {
            assert_eq!(lerp(0.5, 0.5, t).to_bits(), 0.5_f64.to_bits());
        }
    }

    #[test]
    fn color_lerp_blends_alpha() {
        let a = Color::new(0.0, 0.0, 0.0, 0.0);
        let b = Color::new(1.0, 1.0, 1.0, 1.0);
        let mid = a.lerp(b, 0.5);
        assert_close(mid.red, 0.5);
        assert_close(mid.alpha, 0.5);
    }

    #[test]
    fn map_rgb_leaves_alpha() {
        let c = Color::new(0.1, 0.2, 0.3, 0.4).map_rgb(|v| v * 2.0);
        assert_close(c.red, 0.2);
        assert_close(c.green, 0.4);
        assert_close(c.blue, 0.6);
        assert_close(c.alpha, 0.4);
    }

    #[test]
    fn intensity_is_channel_mean() {
        assert_close(Color::opaque(0.3, 0.6, 0.9).intensity(), 0.6);
    }
}
