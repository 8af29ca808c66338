//! Fixed message pool with optional heap fallback
//!
//! Messages are preallocated at system construction and recycled through a
//! bounded free list. When the free list runs dry the pool either falls
//! back to plain heap allocation (counting the event) or surfaces
//! [`RuntimeError::Exhausted`], depending on configuration. Message ids
//! come from a fetch-add counter starting at 1; id 0 is reserved.

use crate::error::{RuntimeError, RuntimeResult};
use crate::id::LatticeId;
use crate::message::{monotonic_ns, Message, MessageKind};
use crate::state::Priority;

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by the pool. Relaxed; they are operational telemetry,
/// not synchronization.
#[derive(Debug, Default)]
struct PoolCounters {
    pool_allocs: AtomicU64,
    heap_allocs: AtomicU64,
    recycled: AtomicU64,
    exhausted: AtomicU64,
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub pool_allocs: u64,
    pub heap_allocs: u64,
    pub recycled: u64,
    pub exhausted: u64,
}

pub struct MessagePool {
    free: ArrayQueue<Box<Message>>,
    next_id: AtomicU64,
    capacity: usize,
    heap_fallback: bool,
    counters: PoolCounters,
}

impl MessagePool {
    /// Create a pool of `capacity` preallocated messages with heap
    /// fallback enabled.
    pub fn new(capacity: usize) -> RuntimeResult<Self> {
        Self::with_fallback(capacity, true)
    }

    /// Create a pool, choosing whether exhaustion falls back to the heap.
    pub fn with_fallback(capacity: usize, heap_fallback: bool) -> RuntimeResult<Self> {
        if capacity == 0 {
            return Err(RuntimeError::InvalidArgument("pool capacity must be > 0"));
        }
        let free = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            // Cannot fail: the queue was just sized for exactly this many.
            let _ = free.push(Box::new(blank_message()));
        }
        Ok(Self {
            free,
            next_id: AtomicU64::new(1),
            capacity,
            heap_fallback,
            counters: PoolCounters::default(),
        })
    }

    /// Allocate a message, stamping id and timestamp.
    pub fn alloc(
        &self,
        kind: MessageKind,
        priority: Priority,
        sender: LatticeId,
        receiver: LatticeId,
        payload: Vec<u8>,
    ) -> RuntimeResult<Box<Message>> {
        let mut msg = match self.free.pop() {
            Some(msg) => {
                self.counters.pool_allocs.fetch_add(1, Ordering::Relaxed);
                msg
            }
            None if self.heap_fallback => {
                self.counters.heap_allocs.fetch_add(1, Ordering::Relaxed);
                Box::new(blank_message())
            }
            None => {
                self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                return Err(RuntimeError::Exhausted);
            }
        };
        msg.id = self.next_id.fetch_add(1, Ordering::Relaxed);
        msg.kind = kind;
        msg.priority = priority;
        msg.sender = sender;
        msg.receiver = receiver;
        msg.payload = payload;
        msg.timestamp_ns = monotonic_ns();
        msg.deadline_ns = None;
        msg.persistent = false;
        Ok(msg)
    }

    /// Return a message to the pool.
    ///
    /// Persistent messages are never recycled. When the free list is full
    /// the message is a heap-fallback overflow and is simply dropped.
    pub fn release(&self, mut msg: Box<Message>) {
        if msg.persistent {
            return;
        }
        msg.payload.clear();
        msg.id = 0;
        if self.free.push(msg).is_ok() {
            self.counters.recycled.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of ids issued so far.
    #[inline]
    pub fn issued(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed) - 1
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages currently sitting in the free list.
    #[inline]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pool_allocs: self.counters.pool_allocs.load(Ordering::Relaxed),
            heap_allocs: self.counters.heap_allocs.load(Ordering::Relaxed),
            recycled: self.counters.recycled.load(Ordering::Relaxed),
            exhausted: self.counters.exhausted.load(Ordering::Relaxed),
        }
    }
}

fn blank_message() -> Message {
    Message {
        id: 0,
        kind: MessageKind::Control,
        priority: Priority::Normal,
        sender: LatticeId::NONE,
        receiver: LatticeId::NONE,
        payload: Vec::new(),
        timestamp_ns: 0,
        deadline_ns: None,
        persistent: false,
    }
}
