//! Latest-wins job scheduling for interactive recomputation.
//!
//! [`JobScheduler`] owns one dedicated worker thread and a single-slot
//! mailbox. Every [`submit`](SchedulerHandle::submit) bumps a generation
//! counter, cancels whatever the worker is running, and replaces any job
//! still waiting in the mailbox. The worker only ever sees the newest
//! request.
//!
//! Results reach the [`FrameSink`] under the scheduler lock, after
//! checking that the job's generation is still the latest one. A job that
//! ran past its last cancellation check therefore cannot overwrite the
//! output of a newer submission. Sinks must not call back into the
//! scheduler from [`FrameSink::present`].
//!
//! A panic inside the processor or the sink is caught on the worker. The
//! job counts as failed, the sink's [`reject`](FrameSink::reject) hook
//! hears about it, and the worker moves on to the next submission.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::buffer::PixelBuffer;
use crate::cancel::CancellationToken;
use crate::diagnostics::duration_serde;
use crate::gamma::GammaCorrector;
use crate::pipeline::{self, RunOutcome};
use crate::types::{ParameterSnapshot, PipelineError};

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Name given to the worker thread.
    pub worker_name: String,
    /// Quiet window a [`Debouncer`](crate::debounce::Debouncer) in front
    /// of this scheduler should wait for (seconds).
    #[serde(with = "duration_serde")]
    pub debounce: Duration,
}

impl SchedulerConfig {
    /// Default worker thread name.
    pub const DEFAULT_WORKER_NAME: &'static str = "retouch-worker";

    /// Default debounce window.
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1);
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_name: Self::DEFAULT_WORKER_NAME.to_owned(),
            debounce: Self::DEFAULT_DEBOUNCE,
        }
    }
}

/// A finished image handed to the [`FrameSink`].
#[derive(Debug, Clone)]
pub struct Frame {
    /// Generation of the submission that produced this frame.
    pub generation: u64,
    /// Parameters the frame was computed with.
    pub snapshot: ParameterSnapshot,
    /// The processed image.
    pub image: PixelBuffer,
    /// Time spent in the processor.
    pub elapsed: Duration,
}

/// Receives the output of current jobs.
///
/// Called on the worker thread while the scheduler lock is held, so a
/// sink must not submit from inside [`present`](Self::present). A UI
/// that reacts to frames should hand them to its own thread and submit
/// from there:
///
/// ```rust
/// use std::sync::mpsc;
/// use std::time::Duration;
///
/// use retouch_pipeline::{Frame, JobScheduler, ParameterSnapshot, PixelBuffer};
///
/// # fn main() -> Result<(), retouch_pipeline::PipelineError> {
/// let (tx, frames) = mpsc::channel::<Frame>();
/// let scheduler = JobScheduler::new(PixelBuffer::new(4, 4), move |frame: Frame| {
///     let _ = tx.send(frame);
/// })?;
///
/// scheduler.submit(ParameterSnapshot::default())?;
/// if let Ok(frame) = frames.recv_timeout(Duration::from_secs(10)) {
///     // Off the worker thread: resubmitting is safe here.
///     let zoomed = ParameterSnapshot { scale: 2.0, ..frame.snapshot };
///     scheduler.submit(zoomed)?;
/// }
/// # Ok(())
/// # }
/// ```
pub trait FrameSink: Send + 'static {
    /// Display a finished frame.
    fn present(&mut self, frame: Frame);

    /// The current job failed.
    fn reject(&mut self, generation: u64, error: PipelineError) {
        tracing::warn!(generation, %error, "pipeline job failed");
    }
}

impl<F> FrameSink for F
where
    F: FnMut(Frame) + Send + 'static,
{
    fn present(&mut self, frame: Frame) {
        self(frame);
    }
}

/// The work performed for each job.
pub trait Processor: Send + 'static {
    /// Process `source` with `snapshot`, polling `token`.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] if the job cannot be completed.
    fn process(
        &self,
        source: &PixelBuffer,
        snapshot: &ParameterSnapshot,
        token: &CancellationToken,
    ) -> Result<RunOutcome, PipelineError>;
}

/// [`Processor`] that runs [`pipeline::run`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardProcessor;

impl Processor for StandardProcessor {
    fn process(
        &self,
        source: &PixelBuffer,
        snapshot: &ParameterSnapshot,
        token: &CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        pipeline::run(source, snapshot, token)
    }
}

/// What the worker is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Nothing pending or running.
    Idle,
    /// A job is running or waiting to start.
    Running {
        /// Generation of the newest job.
        generation: u64,
    },
}

/// Counters over the scheduler's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Jobs accepted by `submit`.
    pub submitted: u64,
    /// Frames handed to the sink.
    pub delivered: u64,
    /// Jobs replaced before starting or aborted at a cancellation check.
    pub cancelled: u64,
    /// Jobs that finished but were superseded before delivery.
    pub stale: u64,
    /// Jobs whose processor returned an error or panicked.
    pub failed: u64,
}

struct Job {
    generation: u64,
    snapshot: ParameterSnapshot,
    source: Arc<PixelBuffer>,
    token: CancellationToken,
}

struct Running {
    generation: u64,
    token: CancellationToken,
}

struct State {
    generation: u64,
    source: Arc<PixelBuffer>,
    pending: Option<Job>,
    running: Option<Running>,
    closed: bool,
    stats: SchedulerStats,
}

impl State {
    fn is_idle(&self) -> bool {
        self.pending.is_none() && self.running.is_none()
    }

    /// Cancel the running job and drop the pending one.
    fn cancel_all(&mut self) {
        if let Some(running) = &self.running {
            running.token.cancel();
            tracing::debug!(generation = running.generation, "cancelling running job");
        }
        if let Some(job) = self.pending.take() {
            self.stats.cancelled += 1;
            tracing::debug!(generation = job.generation, "dropping pending job");
        }
    }
}

struct Shared {
    state: Mutex<State>,
    /// Signals the worker: new job or close.
    wake: Condvar,
    /// Signals waiters: the scheduler may have become idle.
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clonable handle for submitting work to a [`JobScheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Queue `snapshot`, superseding any earlier job. Returns the new
    /// generation.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] for a non-positive
    /// gamma and [`PipelineError::SchedulerClosed`] after shutdown.
    pub fn submit(&self, snapshot: ParameterSnapshot) -> Result<u64, PipelineError> {
        GammaCorrector::new(snapshot.gamma)?;

        let mut state = self.shared.lock();
        if state.closed {
            return Err(PipelineError::SchedulerClosed);
        }
        state.cancel_all();
        state.generation += 1;
        let generation = state.generation;
        state.pending = Some(Job {
            generation,
            snapshot,
            source: Arc::clone(&state.source),
            token: CancellationToken::new(),
        });
        state.stats.submitted += 1;
        drop(state);

        tracing::debug!(generation, ?snapshot, "job submitted");
        self.shared.wake.notify_one();
        Ok(generation)
    }

    /// Current worker state.
    #[must_use]
    pub fn status(&self) -> JobState {
        let state = self.shared.lock();
        if state.is_idle() {
            JobState::Idle
        } else {
            JobState::Running {
                generation: state.generation,
            }
        }
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.shared.lock().stats
    }
}

/// Owns the worker thread. See the [module docs](self).
pub struct JobScheduler {
    handle: SchedulerHandle,
    config: SchedulerConfig,
    worker: Option<JoinHandle<()>>,
}

impl JobScheduler {
    /// Start a scheduler running the standard pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::WorkerSpawn`] if the thread cannot start.
    pub fn new(source: PixelBuffer, sink: impl FrameSink) -> Result<Self, PipelineError> {
        Self::with_processor(source, &SchedulerConfig::default(), StandardProcessor, sink)
    }

    /// Start a scheduler with a custom processor.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::WorkerSpawn`] if the thread cannot start.
    pub fn with_processor(
        source: PixelBuffer,
        config: &SchedulerConfig,
        processor: impl Processor,
        sink: impl FrameSink,
    ) -> Result<Self, PipelineError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                generation: 0,
                source: Arc::new(source),
                pending: None,
                running: None,
                closed: false,
                stats: SchedulerStats::default(),
            }),
            wake: Condvar::new(),
            idle: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(config.worker_name.clone())
            .spawn(move || worker_loop(&worker_shared, &processor, sink))?;

        tracing::debug!(worker = %config.worker_name, "scheduler started");
        Ok(Self {
            handle: SchedulerHandle { shared },
            config: config.clone(),
            worker: Some(worker),
        })
    }

    /// The settings this scheduler was started with.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// A clonable submission handle.
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// See [`SchedulerHandle::submit`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] for a non-positive
    /// gamma.
    pub fn submit(&self, snapshot: ParameterSnapshot) -> Result<u64, PipelineError> {
        self.handle.submit(snapshot)
    }

    /// Current worker state.
    #[must_use]
    pub fn status(&self) -> JobState {
        self.handle.status()
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.handle.stats()
    }

    /// Replace the source image and cancel in-flight work.
    ///
    /// Nothing is resubmitted; the next `submit` uses the new source.
    pub fn set_source(&self, source: PixelBuffer) {
        let mut state = self.handle.shared.lock();
        state.cancel_all();
        // Results computed against the old source are now stale.
        state.generation += 1;
        state.source = Arc::new(source);
        tracing::debug!(generation = state.generation, "source replaced");
        drop(state);
        self.handle.shared.idle.notify_all();
    }

    /// Block until nothing is pending or running, or `timeout` elapses.
    /// Returns whether the scheduler is idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let shared = &self.handle.shared;
        let (state, _) = shared
            .idle
            .wait_timeout_while(shared.lock(), timeout, |state| !state.is_idle())
            .unwrap_or_else(PoisonError::into_inner);
        state.is_idle()
    }

    /// Finish the latest job, deliver it, and stop the worker.
    pub fn shutdown(mut self) -> SchedulerStats {
        self.close(false);
        self.stats()
    }

    fn close(&mut self, cancel: bool) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        {
            let mut state = self.handle.shared.lock();
            if cancel {
                state.cancel_all();
                state.generation += 1;
            }
            state.closed = true;
        }
        self.handle.shared.wake.notify_all();
        if worker.join().is_err() {
            tracing::warn!("pipeline worker panicked");
        }
        tracing::debug!(cancel, "scheduler stopped");
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.close(true);
    }
}

/// Wait for the next job. `None` once closed with nothing pending.
fn next_job(shared: &Shared) -> Option<Job> {
    let mut state = shared.lock();
    loop {
        if let Some(job) = state.pending.take() {
            state.running = Some(Running {
                generation: job.generation,
                token: job.token.clone(),
            });
            return Some(job);
        }
        if state.closed {
            return None;
        }
        state = shared
            .wake
            .wait(state)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

/// Run a sink callback, logging instead of unwinding if it panics.
fn call_sink(generation: u64, callback: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        let reason = panic_message(&*payload);
        tracing::warn!(generation, %reason, "frame sink panicked");
    }
}

fn worker_loop(shared: &Shared, processor: &impl Processor, mut sink: impl FrameSink) {
    while let Some(job) = next_job(shared) {
        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            processor.process(&job.source, &job.snapshot, &job.token)
        }))
        .unwrap_or_else(|payload| Err(PipelineError::JobPanicked(panic_message(&*payload))));
        let elapsed = start.elapsed();

        let mut state = shared.lock();
        state.running = None;
        let current = state.generation == job.generation && !job.token.is_cancelled();
        let generation = job.generation;
        match result {
            Ok(RunOutcome::Completed(image)) if current => {
                state.stats.delivered += 1;
                tracing::debug!(generation, ?elapsed, "delivering frame");
                let frame = Frame {
                    generation,
                    snapshot: job.snapshot,
                    image,
                    elapsed,
                };
                call_sink(generation, || sink.present(frame));
            }
            Ok(RunOutcome::Completed(_)) => {
                state.stats.stale += 1;
                tracing::debug!(generation, "discarding stale frame");
            }
            Ok(RunOutcome::Cancelled) => {
                state.stats.cancelled += 1;
                tracing::debug!(generation, "job cancelled");
            }
            Err(error) => {
                state.stats.failed += 1;
                if current {
                    tracing::debug!(generation, %error, "job failed");
                    call_sink(generation, || sink.reject(generation, error));
                } else {
                    tracing::debug!(generation, %error, "superseded job failed");
                }
            }
        }
        drop(state);
        shared.idle.notify_all();
    }
    shared.idle.notify_all();
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::color::Color;

    const WAIT: Duration = Duration::from_secs(10);

    fn collecting_sink() -> (impl FrameSink, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel();
        let sink = move |frame: Frame| {
            let _ = tx.send(frame);
        };
        (sink, rx)
    }

    fn payload_of(f: impl FnOnce() + std::panic::UnwindSafe) -> Box<dyn Any + Send> {
        panic::catch_unwind(f).unwrap_err()
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let payload = payload_of(|| panic::panic_any("static text"));
        assert_eq!(panic_message(&*payload), "static text");
        let payload = payload_of(|| panic::panic_any(String::from("owned")));
        assert_eq!(panic_message(&*payload), "owned");
        let payload = payload_of(|| panic::panic_any(7_u8));
        assert_eq!(panic_message(&*payload), "unknown panic");
    }

    #[test]
    fn scheduler_keeps_its_config() {
        let (sink, _rx) = collecting_sink();
        let config = SchedulerConfig {
            debounce: Duration::from_millis(40),
            ..SchedulerConfig::default()
        };
        let scheduler =
            JobScheduler::with_processor(PixelBuffer::new(2, 2), &config, StandardProcessor, sink)
                .unwrap();
        assert_eq!(scheduler.config(), &config);
    }

    #[test]
    fn config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.worker_name, "retouch-worker");
        assert_eq!(config.debounce, Duration::from_millis(1));
    }

    #[test]
    fn config_serializes_debounce_as_seconds() {
        let json = serde_json::to_value(SchedulerConfig::default()).unwrap();
        assert!((json["debounce"].as_f64().unwrap() - 0.001).abs() < 1e-12);
        let partial: SchedulerConfig = serde_json::from_str(r#"{"debounce": 0.25}"#).unwrap();
        assert_eq!(partial.debounce, Duration::from_millis(250));
        assert_eq!(partial.worker_name, "retouch-worker");
    }

    #[test]
    fn single_submit_delivers_once() {
        let (sink, rx) = collecting_sink();
        let scheduler =
            JobScheduler::new(PixelBuffer::from_pixel(4, 4, Color::gray(0.5)), sink).unwrap();
        let generation = scheduler
            .submit(ParameterSnapshot {
                scale: 2.0,
                ..ParameterSnapshot::default()
            })
            .unwrap();
        let frame = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(frame.generation, generation);
        assert_eq!(frame.image.width(), 8);
        assert!(scheduler.wait_idle(WAIT));
        assert_eq!(scheduler.status(), JobState::Idle);
        let stats = scheduler.shutdown();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.delivered, 1);
    }

    #[test]
    fn invalid_gamma_is_rejected_synchronously() {
        let (sink, rx) = collecting_sink();
        let scheduler = JobScheduler::new(PixelBuffer::new(2, 2), sink).unwrap();
        let result = scheduler.submit(ParameterSnapshot {
            gamma: 0.0,
            ..ParameterSnapshot::default()
        });
        assert!(matches!(result, Err(PipelineError::InvalidParameter(_))));
        assert_eq!(scheduler.stats().submitted, 0);
        drop(scheduler);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_handle_refuses_work() {
        let (sink, _rx) = collecting_sink();
        let scheduler = JobScheduler::new(PixelBuffer::new(2, 2), sink).unwrap();
        let handle = scheduler.handle();
        drop(scheduler);
        assert!(matches!(
            handle.submit(ParameterSnapshot::default()),
            Err(PipelineError::SchedulerClosed)
        ));
    }

    #[test]
    fn shutdown_finishes_pending_job() {
        let (sink, rx) = collecting_sink();
        let scheduler = JobScheduler::new(PixelBuffer::new(3, 3), sink).unwrap();
        scheduler.submit(ParameterSnapshot::default()).unwrap();
        let stats = scheduler.shutdown();
        assert_eq!(stats.delivered, 1);
        assert!(rx.try_recv().is_ok());
    }
}
