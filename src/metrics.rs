// Task metrics module
//
// Lightweight counters for what the task engine did during this process's lifetime

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counters shared by every task run.
///
/// Uses atomic operations so worker threads can record without locks. The
/// binary logs a summary on exit.
#[derive(Debug)]
pub struct Metrics {
    /// Items moved forward (disable, enable, recategorize, relocate, trash)
    pub items_moved: AtomicUsize,

    /// Archives unpacked
    pub items_unpacked: AtomicUsize,

    /// Items skipped because there was nothing to do or the path was missing
    pub items_skipped: AtomicUsize,

    /// Items given up on after a permission repair did not help
    pub items_abandoned: AtomicUsize,

    /// Items moved back during rollback
    pub items_rolled_back: AtomicUsize,

    /// Objects checked by permission repair passes
    pub objects_repaired: AtomicUsize,

    pub tasks_succeeded: AtomicUsize,
    pub tasks_failed: AtomicUsize,
    pub tasks_canceled: AtomicUsize,

    /// Wall time spent inside tasks, in milliseconds
    pub total_task_time_ms: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            items_moved: AtomicUsize::new(0),
            items_unpacked: AtomicUsize::new(0),
            items_skipped: AtomicUsize::new(0),
            items_abandoned: AtomicUsize::new(0),
            items_rolled_back: AtomicUsize::new(0),
            objects_repaired: AtomicUsize::new(0),
            tasks_succeeded: AtomicUsize::new(0),
            tasks_failed: AtomicUsize::new(0),
            tasks_canceled: AtomicUsize::new(0),
            total_task_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_moved(&self) {
        self.items_moved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unpacked(&self) {
        self.items_unpacked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.items_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self) {
        self.items_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rolled_back(&self) {
        self.items_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_repaired(&self, objects: usize) {
        self.objects_repaired.fetch_add(objects, Ordering::Relaxed);
    }

    pub fn record_task_succeeded(&self) {
        self.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_canceled(&self) {
        self.tasks_canceled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_time(&self, duration: Duration) {
        self.total_task_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn tasks_finished(&self) -> usize {
        self.tasks_succeeded.load(Ordering::Relaxed)
            + self.tasks_failed.load(Ordering::Relaxed)
            + self.tasks_canceled.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average time per finished task in milliseconds
    pub fn avg_task_time_ms(&self) -> f64 {
        let total = self.total_task_time_ms.load(Ordering::Relaxed);
        let count = self.tasks_finished();
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== Task Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Tasks: {} succeeded, {} failed, {} canceled (avg: {:.2}ms)",
            self.tasks_succeeded.load(Ordering::Relaxed),
            self.tasks_failed.load(Ordering::Relaxed),
            self.tasks_canceled.load(Ordering::Relaxed),
            self.avg_task_time_ms()
        );
        tracing::info!(
            "Items: {} moved, {} unpacked, {} skipped, {} abandoned, {} rolled back",
            self.items_moved.load(Ordering::Relaxed),
            self.items_unpacked.load(Ordering::Relaxed),
            self.items_skipped.load(Ordering::Relaxed),
            self.items_abandoned.load(Ordering::Relaxed),
            self.items_rolled_back.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Permission repair checked {} objects",
            self.objects_repaired.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
