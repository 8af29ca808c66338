//! Per-worker statistics counters
//!
//! Monotone relaxed counters; telemetry, not synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct WorkerStats {
    work_completed: AtomicU64,
    forward_passes: AtomicU64,
    backward_passes: AtomicU64,
    sync_arrivals: AtomicU64,
    items_dropped: AtomicU64,
    callback_errors: AtomicU64,
}

/// Point-in-time copy of a worker's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerStatsSnapshot {
    pub work_completed: u64,
    pub forward_passes: u64,
    pub backward_passes: u64,
    pub sync_arrivals: u64,
    pub items_dropped: u64,
    pub callback_errors: u64,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn completed(&self) {
        self.work_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn forward(&self) {
        self.forward_passes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn backward(&self) {
        self.backward_passes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn sync_arrival(&self) {
        self.sync_arrivals.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn dropped(&self) {
        self.items_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn callback_error(&self) {
        self.callback_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn work_completed(&self) -> u64 {
        self.work_completed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            work_completed: self.work_completed.load(Ordering::Relaxed),
            forward_passes: self.forward_passes.load(Ordering::Relaxed),
            backward_passes: self.backward_passes.load(Ordering::Relaxed),
            sync_arrivals: self.sync_arrivals.load(Ordering::Relaxed),
            items_dropped: self.items_dropped.load(Ordering::Relaxed),
            callback_errors: self.callback_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_monotone() {
        let stats = WorkerStats::new();
        let mut last = 0;
        for _ in 0..10 {
            stats.completed();
            let now = stats.work_completed();
            assert!(now > last);
            last = now;
        }
    }

    #[test]
    fn test_snapshot() {
        let stats = WorkerStats::new();
        stats.forward();
        stats.forward();
        stats.backward();
        stats.dropped();
        let snap = stats.snapshot();
        assert_eq!(snap.forward_passes, 2);
        assert_eq!(snap.backward_passes, 1);
        assert_eq!(snap.items_dropped, 1);
        assert_eq!(snap.work_completed, 0);
    }
}
