//! Trailing-edge coalescing of rapid parameter changes.
//!
//! A slider drag produces a snapshot per pointer event. [`Debouncer`]
//! holds only the newest one and forwards it to the scheduler once no new
//! snapshot has arrived for the quiet window. The scheduler is correct
//! without it; debouncing only saves work that would be cancelled anyway.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::gamma::GammaCorrector;
use crate::scheduler::{JobScheduler, SchedulerHandle};
use crate::types::{ParameterSnapshot, PipelineError};

/// Counters over the debouncer's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebounceStats {
    /// Snapshots accepted by [`Debouncer::submit`].
    pub received: u64,
    /// Snapshots passed on to the scheduler.
    pub forwarded: u64,
}

struct Inbox {
    pending: Option<ParameterSnapshot>,
    deadline: Instant,
    closed: bool,
    stats: DebounceStats,
}

struct Shared {
    inbox: Mutex<Inbox>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Forwards the latest snapshot after a quiet window.
pub struct Debouncer {
    shared: Arc<Shared>,
    window: Duration,
    thread: Option<JoinHandle<()>>,
}

impl Debouncer {
    /// Start a debouncer in front of `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::WorkerSpawn`] if the timer thread cannot
    /// start.
    pub fn new(handle: SchedulerHandle, window: Duration) -> Result<Self, PipelineError> {
        let shared = Arc::new(Shared {
            inbox: Mutex::new(Inbox {
                pending: None,
                deadline: Instant::now(),
                closed: false,
                stats: DebounceStats::default(),
            }),
            wake: Condvar::new(),
        });
        let timer_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("retouch-debounce".to_owned())
            .spawn(move || forward_loop(&timer_shared, &handle))?;
        Ok(Self {
            shared,
            window,
            thread: Some(thread),
        })
    }

    /// Start a debouncer in front of `scheduler`, using the window from
    /// its [`SchedulerConfig::debounce`](crate::SchedulerConfig::debounce).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::WorkerSpawn`] if the timer thread cannot
    /// start.
    pub fn for_scheduler(scheduler: &JobScheduler) -> Result<Self, PipelineError> {
        Self::new(scheduler.handle(), scheduler.config().debounce)
    }

    /// The quiet window.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Record `snapshot`, replacing any not yet forwarded, and restart
    /// the quiet window.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidParameter`] for a non-positive
    /// gamma. The previous pending snapshot is kept.
    pub fn submit(&self, snapshot: ParameterSnapshot) -> Result<(), PipelineError> {
        GammaCorrector::new(snapshot.gamma)?;
        let mut inbox = self.shared.lock();
        inbox.pending = Some(snapshot);
        inbox.deadline = Instant::now() + self.window;
        inbox.stats.received += 1;
        drop(inbox);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Forward the pending snapshot without waiting out the window.
    pub fn flush(&self) {
        self.shared.lock().deadline = Instant::now();
        self.shared.wake.notify_one();
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> DebounceStats {
        self.shared.lock().stats
    }

    /// Forward anything pending, stop the timer thread, and return the
    /// final counters.
    pub fn finish(mut self) -> DebounceStats {
        self.close();
        self.stats()
    }

    fn close(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.shared.lock().closed = true;
        self.shared.wake.notify_one();
        if thread.join().is_err() {
            tracing::warn!("debounce thread panicked");
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.close();
    }
}

fn forward_loop(shared: &Shared, handle: &SchedulerHandle) {
    let mut inbox = shared.lock();
    loop {
        let Some(snapshot) = inbox.pending else {
            if inbox.closed {
                return;
            }
            inbox = shared.wake.wait(inbox).unwrap_or_else(PoisonError::into_inner);
            continue;
        };

        let now = Instant::now();
        if inbox.closed || now >= inbox.deadline {
            inbox.pending = None;
            inbox.stats.forwarded += 1;
            drop(inbox);
            if let Err(error) = handle.submit(snapshot) {
                tracing::warn!(%error, "debounced snapshot was not accepted");
            }
            inbox = shared.lock();
        } else {
            let remaining = inbox.deadline.duration_since(now);
            let (guard, _) = shared
                .wake
                .wait_timeout(inbox, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            inbox = guard;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::buffer::PixelBuffer;
    use crate::scheduler::{Frame, SchedulerConfig, StandardProcessor};

    const LONG: Duration = Duration::from_secs(60);

    fn scheduler() -> (JobScheduler, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel();
        let scheduler = JobScheduler::new(PixelBuffer::new(4, 4), move |frame: Frame| {
            let _ = tx.send(frame);
        })
        .unwrap();
        (scheduler, rx)
    }

    fn snapshot(scale: f64) -> ParameterSnapshot {
        ParameterSnapshot {
            scale,
            ..ParameterSnapshot::default()
        }
    }

    #[test]
    fn for_scheduler_uses_configured_window() {
        let (tx, rx) = mpsc::channel();
        let config = SchedulerConfig {
            debounce: Duration::from_millis(250),
            ..SchedulerConfig::default()
        };
        let scheduler = JobScheduler::with_processor(
            PixelBuffer::new(4, 4),
            &config,
            StandardProcessor,
            move |frame: Frame| {
                let _ = tx.send(frame);
            },
        )
        .unwrap();

        let debouncer = Debouncer::for_scheduler(&scheduler).unwrap();
        assert_eq!(debouncer.window(), Duration::from_millis(250));
        debouncer.submit(snapshot(0.5)).unwrap();
        debouncer.finish();
        let frame = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(frame.image.width(), 2);
    }

    #[test]
    fn default_config_gives_default_window() {
        let (scheduler, _rx) = scheduler();
        let debouncer = Debouncer::for_scheduler(&scheduler).unwrap();
        assert_eq!(debouncer.window(), SchedulerConfig::DEFAULT_DEBOUNCE);
    }

    #[test]
    fn burst_collapses_to_last_snapshot() {
        let (scheduler, rx) = scheduler();
        let debouncer = Debouncer::new(scheduler.handle(), LONG).unwrap();
        for step in 1..=10 {
            debouncer.submit(snapshot(f64::from(step) * 0.25)).unwrap();
        }
        let stats = debouncer.finish();
        assert_eq!(stats.received, 10);
        assert_eq!(stats.forwarded, 1);

        let frame = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!((frame.snapshot.scale - 2.5).abs() < f64::EPSILON);
        assert_eq!(scheduler.shutdown().submitted, 1);
    }

    #[test]
    fn flush_forwards_without_waiting() {
        let (scheduler, rx) = scheduler();
        let debouncer = Debouncer::new(scheduler.handle(), LONG).unwrap();
        debouncer.submit(snapshot(0.5)).unwrap();
        debouncer.flush();
        let frame = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(frame.image.width(), 2);
        assert_eq!(debouncer.stats().forwarded, 1);
    }

    #[test]
    fn short_window_forwards_on_its_own() {
        let (scheduler, rx) = scheduler();
        let debouncer = Debouncer::new(scheduler.handle(), Duration::from_millis(1)).unwrap();
        debouncer.submit(snapshot(1.0)).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(10)).is_ok());
        drop(debouncer);
    }

    #[test]
    fn invalid_gamma_is_refused() {
        let (scheduler, _rx) = scheduler();
        let debouncer = Debouncer::new(scheduler.handle(), LONG).unwrap();
        let result = debouncer.submit(ParameterSnapshot {
            gamma: -1.0,
            ..ParameterSnapshot::default()
        });
        assert!(matches!(result, Err(PipelineError::InvalidParameter(_))));
        assert_eq!(debouncer.finish(), DebounceStats::default());
    }

    #[test]
    fn nothing_pending_forwards_nothing() {
        let (scheduler, _rx) = scheduler();
        let debouncer = Debouncer::new(scheduler.handle(), LONG).unwrap();
        assert_eq!(debouncer.finish().forwarded, 0);
        assert_eq!(scheduler.stats().submitted, 0);
    }
}
