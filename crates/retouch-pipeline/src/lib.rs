//! retouch-pipeline: interactive raster retouching core (sans-IO).
//!
//! Transforms an in-memory image through:
//! resample -> gamma correction -> optional edge filter.
//!
//! Every stage allocates a fresh output buffer and polls a
//! [`CancellationToken`] between rows, so a superseded request stops
//! early. [`JobScheduler`] runs the pipeline on a dedicated worker and
//! delivers only the newest request's result. [`debounce::Debouncer`]
//! can sit in front of it to coalesce bursts of parameter changes.
//!
//! This crate performs no file or network I/O. Decoding of in-memory
//! bytes is available through [`raster::decode`].

pub mod buffer;
pub mod cancel;
pub mod color;
pub mod debounce;
pub mod diagnostics;
pub mod edge;
pub mod gamma;
pub mod pipeline;
pub mod raster;
pub mod resample;
pub mod scheduler;
pub mod types;

pub use buffer::PixelBuffer;
pub use cancel::{CancellationToken, Cancelled};
pub use color::Color;
pub use gamma::GammaCorrector;
pub use pipeline::{RunOutcome, run};
pub use resample::resample;
pub use scheduler::{
    Frame, FrameSink, JobScheduler, JobState, Processor, SchedulerConfig, SchedulerHandle,
    SchedulerStats,
};
pub use types::{Dimensions, FilterKind, InterpolationMethod, ParameterSnapshot, PipelineError};
