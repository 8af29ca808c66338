//! Per-worker work queue
//!
//! A bounded FIFO of typed work items guarded by the worker's control
//! mutex, with a condvar for wake-on-enqueue. Enqueue is safe from inside
//! a model callback: the mutex is per-worker and never held while a
//! callback runs.
//!
//! Stop policy: once the stop flag is set, [`WorkQueue::pop_wait`]
//! returns `None` even if items remain; leftovers are dropped when the
//! queue is. Workers finish only their in-flight item.

use crate::error::{RuntimeError, RuntimeResult};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

/// Kind of one unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    /// Run the forward callback for this worker's layer
    Forward,

    /// Run the backward callback, writing into the gradient slice
    Backward,

    /// End-of-step hook: the worker zeroes its own gradient slice
    Optimize,

    /// Arrive at the worker's layer barrier
    SyncLayer,

    /// Arrive at the global barrier
    SyncGlobal,

    /// Caller-defined kind; unknown kinds are logged and dropped
    User(u16),
}

/// One unit of work queued on a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    pub kind: WorkKind,
    pub token_id: u32,

    /// Target id for supervised steps; 0 when unused
    pub target_id: u32,
}

impl WorkItem {
    pub const fn new(kind: WorkKind, token_id: u32, target_id: u32) -> Self {
        Self { kind, token_id, target_id }
    }
}

struct Inner {
    items: VecDeque<WorkItem>,
    stopped: bool,
}

pub struct WorkQueue {
    inner: Mutex<Inner>,
    cv: Condvar,
    capacity: usize,
    high_water: AtomicUsize,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                stopped: false,
            }),
            cv: Condvar::new(),
            capacity,
            high_water: AtomicUsize::new(0),
        }
    }

    /// Append an item and wake the worker.
    pub fn push(&self, item: WorkItem) -> RuntimeResult<()> {
        let mut inner = self.lock()?;
        if inner.stopped {
            return Err(RuntimeError::ShuttingDown);
        }
        if inner.items.len() >= self.capacity {
            return Err(RuntimeError::Exhausted);
        }
        inner.items.push_back(item);
        self.high_water.fetch_max(inner.items.len(), Ordering::Relaxed);
        self.cv.notify_one();
        Ok(())
    }

    /// Block until an item arrives or the queue stops.
    ///
    /// `None` means stopped; the stop check comes before the pop so a
    /// stopping worker processes nothing beyond its in-flight item.
    pub fn pop_wait(&self) -> Option<WorkItem> {
        let mut inner = self.inner.lock().ok()?;
        loop {
            if inner.stopped {
                return None;
            }
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            inner = self.cv.wait(inner).ok()?;
        }
    }

    /// Pop without blocking.
    pub fn try_pop(&self) -> Option<WorkItem> {
        let mut inner = self.inner.lock().ok()?;
        if inner.stopped {
            return None;
        }
        inner.items.pop_front()
    }

    /// Set the stop flag under the mutex and wake the worker.
    pub fn stop(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.stopped = true;
        }
        self.cv.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().map(|i| i.stopped).unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Peak depth observed at any push.
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }

    fn lock(&self) -> RuntimeResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| RuntimeError::InvariantViolation("work queue mutex poisoned"))
    }
}
