//! Pipeline diagnostics: timing and per-stage metrics.
//!
//! [`run_with_diagnostics`] drives the staged pipeline and records how
//! long each stage took and what it produced. Time is read through the
//! [`Clock`] trait so callers (and tests) choose the time source;
//! [`SystemClock`] uses the `web-time` crate, which maps to
//! `performance.now()` on WASM and `std::time::Instant` on native.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::PixelBuffer;
use crate::cancel::CancellationToken;
use crate::pipeline::{Pending, RunOutcome};
use crate::types::{Dimensions, InterpolationMethod, ParameterSnapshot, PipelineError};

/// Serde support for `std::time::Duration` as fractional seconds.
pub mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// A monotonic time source.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] backed by [`web_time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    type Instant = web_time::Instant;

    fn now(&self) -> Self::Instant {
        web_time::Instant::now()
    }

    fn elapsed(&self, since: &Self::Instant) -> Duration {
        since.elapsed()
    }
}

/// Diagnostics collected from one completed pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 1: resampling.
    pub resample: StageDiagnostics,
    /// Stage 2: gamma correction (`None` when gamma is 1 and the stage is skipped).
    pub gamma: Option<StageDiagnostics>,
    /// Stage 3: edge filter (`None` when the filter is disabled).
    pub edge_filter: Option<StageDiagnostics>,
    /// Wall-clock duration of the whole run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary of the input and output.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Resampling metrics.
    Resample {
        /// Interpolation method used.
        method: InterpolationMethod,
        /// Source dimensions.
        source: Dimensions,
        /// Output dimensions.
        output: Dimensions,
    },
    /// Gamma correction metrics.
    Gamma {
        /// Gamma exponent.
        gamma: f64,
    },
    /// Edge filter metrics.
    EdgeFilter {
        /// Output pixels with at least one channel pinned at 0 or 1.
        saturated_pixels: usize,
    },
}

/// High-level summary of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// The parameters the run used.
    pub snapshot: ParameterSnapshot,
    /// Source dimensions.
    pub source: Dimensions,
    /// Output dimensions.
    pub output: Dimensions,
    /// Mean RGB intensity of the output.
    pub mean_intensity: f64,
}

/// Run the pipeline, timing each stage.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidParameter`] for a non-positive gamma.
pub fn run_with_diagnostics<C: Clock>(
    source: &PixelBuffer,
    snapshot: &ParameterSnapshot,
    token: &CancellationToken,
    clock: &C,
) -> Result<RunOutcome<(PixelBuffer, PipelineDiagnostics)>, PipelineError> {
    let total_start = clock.now();
    let pending = Pending::new(source, *snapshot)?;

    let start = clock.now();
    let Ok(resampled) = pending.resample(token) else {
        return Ok(RunOutcome::Cancelled);
    };
    let resample = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Resample {
            method: snapshot.interpolation,
            source: source.dimensions(),
            output: resampled.image().dimensions(),
        },
    };
    tracing::trace!(duration = ?resample.duration, "resample stage finished");

    let start = clock.now();
    let Ok(corrected) = resampled.correct_gamma(token) else {
        return Ok(RunOutcome::Cancelled);
    };
    let gamma = corrected.applied().then(|| StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Gamma {
            gamma: snapshot.gamma,
        },
    });

    let start = clock.now();
    let Ok(filtered) = corrected.filter(token) else {
        return Ok(RunOutcome::Cancelled);
    };
    let edge_filter = filtered.applied().then(|| StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::EdgeFilter {
            saturated_pixels: count_saturated(filtered.image()),
        },
    });

    let image = filtered.into_image();
    let diagnostics = PipelineDiagnostics {
        resample,
        gamma,
        edge_filter,
        total_duration: clock.elapsed(&total_start),
        summary: PipelineSummary {
            snapshot: *snapshot,
            source: source.dimensions(),
            output: image.dimensions(),
            mean_intensity: image.mean_intensity(),
        },
    };
    tracing::trace!(total = ?diagnostics.total_duration, "pipeline run finished");
    Ok(RunOutcome::Completed((image, diagnostics)))
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();
        let summary = &self.summary;

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Parameters: scale={:.2} gamma={:.2} interpolation={} filter={}",
            summary.snapshot.scale,
            summary.snapshot.gamma,
            summary.snapshot.interpolation,
            summary.snapshot.filter,
        ));
        lines.push(format!("Image: {} -> {}", summary.source, summary.output));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<16} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(60));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in self.stages() {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<16} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!("Mean output intensity: {:.4}", summary.mean_intensity));

        lines.join("\n")
    }

    /// Stages that actually ran, in pipeline order.
    #[must_use]
    pub fn stages(&self) -> Vec<(&'static str, &StageDiagnostics)> {
        let mut stages = vec![("Resample", &self.resample)];
        if let Some(ref gamma) = self.gamma {
            stages.push(("Gamma", gamma));
        }
        if let Some(ref edge) = self.edge_filter {
            stages.push(("Edge Filter", edge));
        }
        stages
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
pub fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Resample {
            method,
            source,
            output,
        } => format!("{method} {source} -> {output}"),
        StageMetrics::Gamma { gamma } => format!("gamma={gamma:.2}"),
        StageMetrics::EdgeFilter { saturated_pixels } => {
            format!("saturated={saturated_pixels}")
        }
    }
}

/// Count pixels with any color channel pinned at 0 or 1.
fn count_saturated(image: &PixelBuffer) -> usize {
    image
        .pixels()
        .iter()
        .filter(|c| c.rgb().iter().any(|&v| v <= 0.0 || v >= 1.0))
        .count()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::color::Color;
    use crate::types::FilterKind;

    /// Clock that advances one millisecond per reading.
    struct StepClock(Cell<u64>);

    impl Clock for StepClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            let t = self.0.get();
            self.0.set(t + 1);
            t
        }

        fn elapsed(&self, since: &u64) -> Duration {
            Duration::from_millis(self.now() - since)
        }
    }

    fn run_diag(snapshot: ParameterSnapshot) -> PipelineDiagnostics {
        let source = PixelBuffer::from_fn(8, 6, |x, y| Color::gray(f64::from(x * y) / 48.0));
        let outcome = run_with_diagnostics(
            &source,
            &snapshot,
            &CancellationToken::new(),
            &StepClock(Cell::new(0)),
        )
        .unwrap();
        outcome.completed().unwrap().1
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let ms = duration_ms(Duration::from_millis(1234));
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn skipped_stages_are_none() {
        let diag = run_diag(ParameterSnapshot::default());
        assert!(diag.gamma.is_none());
        assert!(diag.edge_filter.is_none());
        assert_eq!(diag.stages().len(), 1);
    }

    #[test]
    fn all_stages_recorded() {
        let diag = run_diag(ParameterSnapshot {
            scale: 0.5,
            gamma: 2.0,
            filter: FilterKind::Edge,
            ..ParameterSnapshot::default()
        });
        assert!(diag.gamma.is_some());
        assert!(diag.edge_filter.is_some());
        assert_eq!(diag.summary.output, Dimensions { width: 4, height: 3 });
        assert!(diag.total_duration > diag.resample.duration);
    }

    #[test]
    fn report_mentions_stages() {
        let diag = run_diag(ParameterSnapshot {
            gamma: 1.8,
            filter: FilterKind::Edge,
            ..ParameterSnapshot::default()
        });
        let report = diag.report();
        assert!(report.contains("Pipeline Diagnostics Report"));
        assert!(report.contains("Resample"));
        assert!(report.contains("Gamma"));
        assert!(report.contains("Edge Filter"));
        assert!(report.contains("8x6 -> 8x6"));
    }

    #[test]
    fn cancelled_run_has_no_diagnostics() {
        let token = CancellationToken::new();
        token.cancel();
        let outcome = run_with_diagnostics(
            &PixelBuffer::new(4, 4),
            &ParameterSnapshot::default(),
            &token,
            &SystemClock,
        )
        .unwrap();
        assert!(outcome.is_cancelled());
    }

    #[test]
    fn diagnostics_serialize_durations_as_seconds() {
        let diag = run_diag(ParameterSnapshot::default());
        let json = serde_json::to_value(&diag).unwrap();
        assert!(json["total_duration"].is_f64());
        let back: PipelineDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back.total_duration, diag.total_duration);
    }
}
