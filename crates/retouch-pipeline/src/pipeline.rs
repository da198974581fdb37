//! Incremental pipeline: resample, then gamma, then the optional filter.
//!
//! [`run`] executes every stage in one call. [`Pending`] lets the
//! caller drive execution one stage at a time and inspect each
//! intermediate buffer:
//!
//! ```rust
//! # use retouch_pipeline::{CancellationToken, Color, ParameterSnapshot, PixelBuffer};
//! # use retouch_pipeline::pipeline::Pending;
//! # fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let source = PixelBuffer::from_pixel(4, 4, Color::gray(0.5));
//! let snapshot = ParameterSnapshot { scale: 2.0, ..ParameterSnapshot::default() };
//! let token = CancellationToken::new();
//!
//! let resampled = Pending::new(&source, snapshot)?.resample(&token)?;
//! assert_eq!(resampled.image().width(), 8);
//! let output = resampled.correct_gamma(&token)?.filter(&token)?.into_image();
//! # let _ = output;
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self`, checks the cancellation token
//! before starting, and allocates its own output. No stage mutates its
//! input, so the source can be shared read-only across concurrent jobs.

use crate::buffer::PixelBuffer;
use crate::cancel::{CancellationToken, Cancelled};
use crate::gamma::GammaCorrector;
use crate::types::{Dimensions, ParameterSnapshot, PipelineError};

/// Result of a pipeline run that was not rejected up front.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum RunOutcome<T = PixelBuffer> {
    /// Every stage ran to completion.
    Completed(T),
    /// The token was cancelled; partial work was discarded.
    Cancelled,
}

impl<T> RunOutcome<T> {
    /// Whether the run was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The completed value, if any.
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Cancelled => None,
        }
    }

    /// Transform the completed value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RunOutcome<U> {
        match self {
            Self::Completed(value) => RunOutcome::Completed(f(value)),
            Self::Cancelled => RunOutcome::Cancelled,
        }
    }
}

impl<T> From<Result<T, Cancelled>> for RunOutcome<T> {
    fn from(result: Result<T, Cancelled>) -> Self {
        result.map_or(Self::Cancelled, Self::Completed)
    }
}

/// Run the full pipeline on `source` with the given parameters.
///
/// Stages, in order:
///
/// 1. Resample to `floor(width * scale)` x `floor(height * scale)`
/// 2. Gamma correction (skipped when gamma is 1)
/// 3. Edge filter (only when the snapshot enables it)
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] if the gamma is not
/// positive. This is checked before any pixel work starts.
pub fn run(
    source: &PixelBuffer,
    snapshot: &ParameterSnapshot,
    token: &CancellationToken,
) -> Result<RunOutcome, PipelineError> {
    let pending = Pending::new(source, *snapshot)?;
    let outcome = pending
        .resample(token)
        .and_then(|stage| stage.correct_gamma(token))
        .and_then(|stage| stage.filter(token))
        .map(Filtered::into_image);
    Ok(outcome.into())
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any pixel work.
///
/// Construction builds the gamma table, so an invalid gamma is rejected
/// here rather than after an expensive resample.
#[must_use = "pipeline stages are consumed by advancing; call .resample() to continue"]
pub struct Pending<'a> {
    source: &'a PixelBuffer,
    snapshot: ParameterSnapshot,
    gamma: GammaCorrector,
}

impl<'a> Pending<'a> {
    /// Capture the source and snapshot and validate the gamma.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] for a non-positive gamma.
    pub fn new(source: &'a PixelBuffer, snapshot: ParameterSnapshot) -> Result<Self, PipelineError> {
        let gamma = GammaCorrector::new(snapshot.gamma)?;
        Ok(Self {
            source,
            snapshot,
            gamma,
        })
    }

    /// The snapshot this run was built from.
    #[must_use]
    pub const fn snapshot(&self) -> &ParameterSnapshot {
        &self.snapshot
    }

    /// Output dimensions of the resample stage.
    #[must_use]
    pub fn target_dimensions(&self) -> Dimensions {
        self.snapshot.target_dimensions(self.source.dimensions())
    }

    /// Resample the source and advance to [`Resampled`].
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if the token is observed cancelled.
    pub fn resample(self, token: &CancellationToken) -> Result<Resampled, Cancelled> {
        token.check()?;
        let image = crate::resample::resample_cancellable(
            self.source,
            self.snapshot.interpolation,
            self.target_dimensions(),
            token,
        )?;
        Ok(Resampled {
            snapshot: self.snapshot,
            gamma: self.gamma,
            image,
        })
    }
}

// ───────────────────────── Stage 1: Resampled ────────────────────────

/// Pipeline state after resizing.
#[must_use = "pipeline stages are consumed by advancing; call .correct_gamma() to continue"]
pub struct Resampled {
    snapshot: ParameterSnapshot,
    gamma: GammaCorrector,
    image: PixelBuffer,
}

impl Resampled {
    /// The resized image.
    #[must_use]
    pub const fn image(&self) -> &PixelBuffer {
        &self.image
    }

    /// Apply gamma correction and advance to [`GammaCorrected`].
    ///
    /// An identity gamma passes the buffer through untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if the token is observed cancelled.
    pub fn correct_gamma(self, token: &CancellationToken) -> Result<GammaCorrected, Cancelled> {
        token.check()?;
        if self.gamma.is_identity() {
            return Ok(GammaCorrected {
                snapshot: self.snapshot,
                image: self.image,
                applied: false,
            });
        }
        let image = self.gamma.correct_cancellable(&self.image, token)?;
        Ok(GammaCorrected {
            snapshot: self.snapshot,
            image,
            applied: true,
        })
    }
}

// ───────────────────────── Stage 2: GammaCorrected ───────────────────

/// Pipeline state after gamma correction.
#[must_use = "pipeline stages are consumed by advancing; call .filter() to continue"]
pub struct GammaCorrected {
    snapshot: ParameterSnapshot,
    image: PixelBuffer,
    applied: bool,
}

impl GammaCorrected {
    /// The gamma-corrected image.
    #[must_use]
    pub const fn image(&self) -> &PixelBuffer {
        &self.image
    }

    /// Whether the gamma table was actually applied.
    #[must_use]
    pub const fn applied(&self) -> bool {
        self.applied
    }

    /// Apply the snapshot's filter, if any, and advance to [`Filtered`].
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if the token is observed cancelled.
    pub fn filter(self, token: &CancellationToken) -> Result<Filtered, Cancelled> {
        token.check()?;
        if !self.snapshot.filter_enabled() {
            return Ok(Filtered {
                image: self.image,
                applied: false,
            });
        }
        let image = crate::edge::apply_cancellable(&self.image, token)?;
        Ok(Filtered {
            image,
            applied: true,
        })
    }
}

// ───────────────────────── Stage 3: Filtered ─────────────────────────

/// Final pipeline state.
#[must_use = "call .into_image() to take the output"]
pub struct Filtered {
    image: PixelBuffer,
    applied: bool,
}

impl Filtered {
    /// The finished image.
    #[must_use]
    pub const fn image(&self) -> &PixelBuffer {
        &self.image
    }

    /// Whether the edge filter ran.
    #[must_use]
    pub const fn applied(&self) -> bool {
        self.applied
    }

    /// Take the finished image.
    #[must_use]
    pub fn into_image(self) -> PixelBuffer {
        self.image
    }
}
