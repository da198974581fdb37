//! Shared types for the retouch pipeline.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total number of pixels (`width * height`).
    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Dimensions after scaling both axes by `scale`, floored.
    ///
    /// Any scale is accepted. Non-positive or NaN scales, and scales small
    /// enough to floor to zero, produce a zero-sized result.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn scaled(self, scale: f64) -> Self {
        // `as` saturates: NaN and negatives become 0, overflow becomes u32::MAX.
        let axis = |len: u32| (f64::from(len) * scale).floor() as u32;
        Self {
            width: axis(self.width),
            height: axis(self.height),
        }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Resampling strategy used when resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InterpolationMethod {
    /// Round to the nearest source pixel. Blocky, exact colors.
    NearestNeighbor,
    /// Blend the four surrounding source pixels.
    #[default]
    Bilinear,
}

impl InterpolationMethod {
    /// Every method, in the order a UI should list them.
    pub const ALL: [Self; 2] = [Self::NearestNeighbor, Self::Bilinear];
}

impl fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NearestNeighbor => f.write_str("Nearest Neighbor"),
            Self::Bilinear => f.write_str("Bilinear"),
        }
    }
}

/// Optional filter applied after gamma correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterKind {
    /// No filtering.
    #[default]
    None,
    /// Fixed 5x5 edge-emphasis convolution (see [`crate::edge`]).
    Edge,
}

impl FilterKind {
    /// Every filter choice, in the order a UI should list them.
    pub const ALL: [Self; 2] = [Self::None, Self::Edge];

    /// Whether a filter stage runs at all.
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::Edge)
    }
}

impl From<bool> for FilterKind {
    fn from(enabled: bool) -> Self {
        if enabled { Self::Edge } else { Self::None }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Edge => f.write_str("Edge"),
        }
    }
}

/// Immutable capture of every user-tunable parameter at one instant.
///
/// Capturing a new snapshot is what triggers a new job. Only gamma is
/// validated, and only when the gamma stage is constructed; the scale is
/// taken as-is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSnapshot {
    /// Resize factor applied to both axes.
    pub scale: f64,
    /// Gamma exponent. Output is `input^(1/gamma)`; must be positive.
    pub gamma: f64,
    /// How destination pixels are sampled from the source.
    pub interpolation: InterpolationMethod,
    /// Optional post-gamma filter.
    pub filter: FilterKind,
}

impl ParameterSnapshot {
    /// Default resize factor.
    pub const DEFAULT_SCALE: f64 = 1.0;

    /// Default gamma exponent (identity).
    pub const DEFAULT_GAMMA: f64 = 1.0;

    /// Range a UI should offer for [`scale`](Self::scale). Not enforced.
    pub const SCALE_RANGE: RangeInclusive<f64> = 0.1..=5.0;

    /// Range a UI should offer for [`gamma`](Self::gamma). Not enforced.
    pub const GAMMA_RANGE: RangeInclusive<f64> = 0.1..=5.0;

    /// Whether the edge filter stage runs.
    #[must_use]
    pub const fn filter_enabled(&self) -> bool {
        self.filter.is_enabled()
    }

    /// Output dimensions for a source of the given size.
    #[must_use]
    pub fn target_dimensions(&self, source: Dimensions) -> Dimensions {
        source.scaled(self.scale)
    }
}

impl Default for ParameterSnapshot {
    fn default() -> Self {
        Self {
            scale: Self::DEFAULT_SCALE,
            gamma: Self::DEFAULT_GAMMA,
            interpolation: InterpolationMethod::default(),
            filter: FilterKind::default(),
        }
    }
}

/// Errors surfaced by the pipeline.
///
/// Cancellation is deliberately absent: it is a normal outcome, modelled
/// by [`crate::Cancelled`] and [`crate::RunOutcome::Cancelled`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A parameter failed validation (gamma must be positive and finite).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A raw sample vector did not match the declared dimensions.
    #[error("pixel buffer holds {actual} samples but dimensions require {expected}")]
    BufferSize {
        /// `width * height`.
        expected: usize,
        /// Length of the supplied vector.
        actual: usize,
    },

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The background worker thread could not be started.
    #[error("failed to spawn pipeline worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    /// A job was submitted after the scheduler shut down.
    #[error("scheduler has shut down")]
    SchedulerClosed,

    /// A scheduled job panicked; the worker recovered and carried on.
    #[error("pipeline job panicked: {0}")]
    JobPanicked(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn dims(width: u32, height: u32) -> Dimensions {
        Dimensions { width, height }
    }

    #[test]
    fn scaled_floors_each_axis() {
        assert_eq!(dims(4, 4).scaled(2.0), dims(8, 8));
        assert_eq!(dims(5, 3).scaled(1.5), dims(7, 4));
        assert_eq!(dims(10, 10).scaled(0.25), dims(2, 2));
    }

    #[test]
    fn degenerate_scales_produce_empty_dimensions() {
        assert_eq!(dims(4, 4).scaled(0.1), dims(0, 0));
        assert_eq!(dims(4, 4).scaled(0.0), dims(0, 0));
        assert_eq!(dims(4, 4).scaled(-2.0), dims(0, 0));
        assert_eq!(dims(4, 4).scaled(f64::NAN), dims(0, 0));
    }

    #[test]
    fn pixel_count() {
        assert_eq!(dims(7, 3).pixel_count(), 21);
        assert_eq!(dims(0, 3).pixel_count(), 0);
    }

    #[test]
    fn dimensions_display() {
        assert_eq!(dims(640, 480).to_string(), "640x480");
    }

    #[test]
    fn default_snapshot_is_identity() {
        let snapshot = ParameterSnapshot::default();
        assert!((snapshot.scale - 1.0).abs() < f64::EPSILON);
        assert!((snapshot.gamma - 1.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.interpolation, InterpolationMethod::Bilinear);
        assert!(!snapshot.filter_enabled());
    }

    #[test]
    fn filter_kind_from_bool() {
        assert_eq!(FilterKind::from(true), FilterKind::Edge);
        assert_eq!(FilterKind::from(false), FilterKind::None);
    }

    #[test]
    fn display_names() {
        assert_eq!(InterpolationMethod::NearestNeighbor.to_string(), "Nearest Neighbor");
        assert_eq!(InterpolationMethod::Bilinear.to_string(), "Bilinear");
        assert_eq!(FilterKind::Edge.to_string(), "Edge");
    }

    #[test]
    fn snapshot_serde_round_trip() {
        let snapshot = ParameterSnapshot {
            scale: 0.5,
            gamma: 2.2,
            interpolation: InterpolationMethod::NearestNeighbor,
            filter: FilterKind::Edge,
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: ParameterSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, back);
    }

    #[test]
    fn partial_snapshot_json_uses_defaults() {
        let snapshot: ParameterSnapshot = serde_json::from_str(r#"{"gamma": 2.0}"#).unwrap();
        assert!((snapshot.gamma - 2.0).abs() < f64::EPSILON);
        assert!((snapshot.scale - 1.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.filter, FilterKind::None);
    }

    #[test]
    fn error_messages() {
        let err = PipelineError::InvalidParameter("gamma must be positive".into());
        assert_eq!(err.to_string(), "invalid parameter: gamma must be positive");
        let err = PipelineError::BufferSize {
            expected: 4,
            actual: 3,
        };
        assert!(err.to_string().contains("3 samples"));
    }
}
