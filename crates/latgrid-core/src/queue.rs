//! Lock-free message queues
//!
//! One [`FifoQueue`] per priority level, four levels fanned in by
//! [`PriorityQueue`]. The underlying queue is crossbeam's `SegQueue`, a
//! Michael-Scott-family lock-free MPMC FIFO; ABA protection is internal to
//! it. Dequeue on an empty queue returns `None` without blocking.

use crate::message::Message;
use crate::state::Priority;

use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Single-priority lock-free FIFO with a high-water mark.
pub struct FifoQueue {
    inner: SegQueue<Box<Message>>,
    high_water: AtomicUsize,
}

impl FifoQueue {
    pub fn new() -> Self {
        Self {
            inner: SegQueue::new(),
            high_water: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, msg: Box<Message>) {
        self.inner.push(msg);
        let len = self.inner.len();
        self.high_water.fetch_max(len, Ordering::Relaxed);
    }

    #[inline]
    pub fn pop(&self) -> Option<Box<Message>> {
        self.inner.pop()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Largest length observed at any push.
    #[inline]
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }
}

impl Default for FifoQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Four-level priority fan-in
///
/// Enqueue dispatches on the message's own priority field. Dequeue scans
/// Critical through Low and returns the first message found; FIFO holds
/// within a level, and sustained high-priority traffic may starve lower
/// levels.
pub struct PriorityQueue {
    lanes: [FifoQueue; Priority::COUNT],
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            lanes: [
                FifoQueue::new(),
                FifoQueue::new(),
                FifoQueue::new(),
                FifoQueue::new(),
            ],
        }
    }

    pub fn enqueue(&self, msg: Box<Message>) {
        self.lanes[msg.priority.as_index()].push(msg);
    }

    pub fn dequeue(&self) -> Option<Box<Message>> {
        for lane in &self.lanes {
            if let Some(msg) = lane.pop() {
                return Some(msg);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(FifoQueue::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(FifoQueue::is_empty)
    }

    pub fn high_water(&self, priority: Priority) -> usize {
        self.lanes[priority.as_index()].high_water()
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::LatticeId;
    use crate::message::{monotonic_ns, MessageKind};

    fn msg(seq: u64, priority: Priority) -> Box<Message> {
        Box::new(Message {
            id: seq + 1,
            kind: MessageKind::Data,
            priority,
            sender: LatticeId::new(0, 0),
            receiver: LatticeId::new(0, 1),
            payload: seq.to_le_bytes().to_vec(),
            timestamp_ns: monotonic_ns(),
            deadline_ns: None,
            persistent: false,
        })
    }

    fn seq_of(msg: &Message) -> u64 {
        u64::from_le_bytes(msg.payload[..8].try_into().unwrap())
    }

    #[test]
    fn test_empty_pop_does_not_block() {
        let q = FifoQueue::new();
        assert!(q.pop().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn test_single_enqueue_dequeue_round_trip() {
        let q = FifoQueue::new();
        q.push(msg(7, Priority::Normal));
        let out = q.pop().unwrap();
        assert_eq!(seq_of(&out), 7);
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let q = FifoQueue::new();
        for i in 0..100 {
            q.push(msg(i, Priority::Normal));
        }
        for i in 0..100 {
            assert_eq!(seq_of(&q.pop().unwrap()), i);
        }
    }

    #[test]
    fn test_high_water_tracks_peak() {
        let q = FifoQueue::new();
        for i in 0..10 {
            q.push(msg(i, Priority::Normal));
        }
        while q.pop().is_some() {}
        assert_eq!(q.high_water(), 10);
    }

    #[test]
    fn test_priority_drains_critical_first() {
        // 10 LOW, 10 CRITICAL, 10 LOW: all CRITICAL first, then the 20
        // LOW in enqueue order.
        let q = PriorityQueue::new();
        for i in 0..10 {
            q.enqueue(msg(i, Priority::Low));
        }
        for i in 10..20 {
            q.enqueue(msg(i, Priority::Critical));
        }
        for i in 20..30 {
            q.enqueue(msg(i, Priority::Low));
        }

        let drained: Vec<u64> = std::iter::from_fn(|| q.dequeue()).map(|m| seq_of(&m)).collect();
        assert_eq!(drained.len(), 30);
        assert_eq!(&drained[..10], &(10..20).collect::<Vec<_>>()[..]);
        let expected_low: Vec<u64> = (0..10).chain(20..30).collect();
        assert_eq!(&drained[10..], &expected_low[..]);
    }

    #[test]
    fn test_mpmc_no_loss() {
        use std::sync::Arc;
        use std::thread;

        let q = Arc::new(FifoQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..250 {
                        q.push(msg(p * 250 + i, Priority::Normal));
                    }
                })
            })
            .collect();
        for h in producers {
            h.join().unwrap();
        }

        let mut seen: Vec<u64> = std::iter::from_fn(|| q.pop()).map(|m| seq_of(&m)).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    }
}
