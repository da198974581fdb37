//! Fixed 5x5 edge-emphasis convolution.
//!
//! For every destination pixel and every color channel the filter sums
//! `KERNEL[ky][kx] * source(x - 2 + kx, y - 2 + ky)` over the 5x5
//! neighbourhood, then maps the raw sum into `[0, 1]` with
//! `clamp((sum + 4) / 8, 0, 1)`. Alpha is forced to 1.
//!
//! Taps that fall outside the image read as black through
//! [`PixelBuffer::get`], contributing 0 to the sum. Pixels within two
//! rows or columns of the border are therefore darker than they would be
//! with edge replication.
//!
//! The kernel coefficients sum to zero, so flat regions map to 0.5.

use crate::buffer::PixelBuffer;
use crate::cancel::{CancellationToken, Cancelled};
use crate::color::Color;

/// Kernel weights, indexed `[ky][kx]`.
pub const KERNEL: [[i32; KERNEL_SIZE]; KERNEL_SIZE] = [
    [-4, -1, 0, -1, -4],
    [-1, 2, 3, 2, -1],
    [0, 3, 4, 3, 0],
    [-1, 2, 3, 2, -1],
    [-4, -1, 0, -1, -4],
];

/// Side length of [`KERNEL`].
pub const KERNEL_SIZE: usize = 5;

/// Offset added to the raw sum before scaling.
const NORMALIZE_OFFSET: f64 = 4.0;

/// Divisor applied after the offset.
const NORMALIZE_SCALE: f64 = 8.0;

const RADIUS: i64 = 2;

/// Apply the edge filter to `image`, producing a new buffer.
#[must_use = "returns the filtered image"]
pub fn apply(image: &PixelBuffer) -> PixelBuffer {
    apply_cancellable(image, &CancellationToken::new())
        .unwrap_or_else(|Cancelled| image.clone())
}

/// [`apply`] that polls `token` before each destination row.
///
/// # Errors
///
/// Returns [`Cancelled`] if the token is cancelled mid-way.
pub fn apply_cancellable(
    image: &PixelBuffer,
    token: &CancellationToken,
) -> Result<PixelBuffer, Cancelled> {
    PixelBuffer::try_from_rows(image.width(), image.height(), token, |y, row| {
        for (x, px) in (0u32..).zip(row.iter_mut()) {
            *px = convolve_at(image, i64::from(x), i64::from(y));
        }
    })
}

/// Convolve the neighbourhood centred on `(x, y)`.
fn convolve_at(image: &PixelBuffer, x: i64, y: i64) -> Color {
    let mut sums = [0.0_f64; 3];
    for (ky, weights) in (-RADIUS..=RADIUS).zip(KERNEL.iter()) {
        for (kx, &weight) in (-RADIUS..=RADIUS).zip(weights.iter()) {
            if weight == 0 {
                continue;
            }
            let tap = image.get(x + kx, y + ky).rgb();
            let weight = f64::from(weight);
            for (sum, channel) in sums.iter_mut().zip(tap) {
                *sum = channel.mul_add(weight, *sum);
            }
        }
    }
    let [red, green, blue] = sums.map(normalize);
    Color::opaque(red, green, blue)
}

/// Map a raw kernel sum into `[0, 1]`. NaN maps to 0.
fn normalize(sum: f64) -> f64 {
    let value = (sum + NORMALIZE_OFFSET) / NORMALIZE_SCALE;
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}
