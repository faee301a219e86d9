//! Background progress monitor for campaign dispatch.
//!
//! Periodically logs unit counters so operators can follow long-running
//! campaigns without reading every per-unit log line.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// Snapshot of dispatch counters at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Invocations scheduled across all stages so far.
    pub scheduled: usize,
    /// Invocations currently holding a host slot.
    pub running: usize,
    /// Invocations that exited successfully.
    pub completed: usize,
    /// Invocations that failed after all attempts.
    pub failed: usize,
    /// Units skipped because history or an earlier failure said so.
    pub skipped: usize,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Scheduled invocations that reached a terminal status.
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }
}

/// Shared atomic counters updated by unit tasks.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounters {
    pub scheduled: Arc<AtomicUsize>,
    pub running: Arc<AtomicUsize>,
    pub completed: Arc<AtomicUsize>,
    pub failed: Arc<AtomicUsize>,
    pub skipped: Arc<AtomicUsize>,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, start: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        }
    }
}

/// A background task that logs dispatch progress every `interval`.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Starts logging; `total` is the number of (stage, unit) pairs in the run.
    pub fn start(counters: ProgressCounters, total: usize, interval: Duration) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // first tick fires immediately

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = counters.snapshot(start);
                let done = snap.finished() + snap.skipped;
                let pct = if total > 0 {
                    (done as f64 / total as f64 * 100.0).min(100.0)
                } else {
                    0.0
                };

                tracing::info!(
                    scheduled = snap.scheduled,
                    running = snap.running,
                    completed = snap.completed,
                    failed = snap.failed,
                    skipped = snap.skipped,
                    total,
                    progress_pct = format!("{:.1}%", pct),
                    elapsed_secs = snap.elapsed.as_secs(),
                    "Campaign progress"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Signals the monitor to stop and waits for it.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
