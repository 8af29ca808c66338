//! Message system: pool plus channel registry
//!
//! Owns the message pool and a bounded table of channels. Routing picks
//! the first channel whose endpoints match; the table is append-only and
//! deliberately not deduplicated, so creating two channels for the same
//! pair doubles the routing surface for that pair.

use crate::channel::Channel;
use crate::error::{RuntimeError, RuntimeResult};
use crate::id::LatticeId;
use crate::message::{Message, MessageKind};
use crate::pool::{MessagePool, PoolStats};
use crate::spinlock::SpinLock;
use crate::state::Priority;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Snapshot of system-level counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemStats {
    pub sent: u64,
    pub failed_sends: u64,
    pub dropped_messages: u64,
    pub broadcasts: u64,
    pub pool: PoolStats,
}

pub struct MessageSystem {
    pool: MessagePool,
    channels: SpinLock<Vec<Arc<Channel>>>,
    max_channels: usize,
    sent: AtomicU64,
    failed_sends: AtomicU64,
    dropped_messages: AtomicU64,
    broadcasts: AtomicU64,
}

impl MessageSystem {
    pub fn new(max_channels: usize, pool_size: usize) -> RuntimeResult<Self> {
        if max_channels == 0 {
            return Err(RuntimeError::InvalidArgument("max_channels must be > 0"));
        }
        Ok(Self {
            pool: MessagePool::new(pool_size)?,
            channels: SpinLock::new(Vec::with_capacity(max_channels)),
            max_channels,
            sent: AtomicU64::new(0),
            failed_sends: AtomicU64::new(0),
            dropped_messages: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn pool(&self) -> &MessagePool {
        &self.pool
    }

    /// Register a channel between `a` and `b`. No deduplication.
    pub fn create_channel(&self, a: LatticeId, b: LatticeId) -> RuntimeResult<Arc<Channel>> {
        let channel = Arc::new(Channel::new(a, b)?);
        let mut table = self.channels.lock();
        if table.len() >= self.max_channels {
            return Err(RuntimeError::Exhausted);
        }
        table.push(Arc::clone(&channel));
        Ok(channel)
    }

    /// First registered channel connecting the pair, in either order.
    pub fn channel_between(&self, a: LatticeId, b: LatticeId) -> Option<Arc<Channel>> {
        self.channels
            .lock()
            .iter()
            .find(|ch| ch.is_endpoint(a) && ch.is_endpoint(b))
            .cloned()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Allocate a message from the pool, stamped and addressed.
    pub fn compose(
        &self,
        kind: MessageKind,
        priority: Priority,
        sender: LatticeId,
        receiver: LatticeId,
        payload: Vec<u8>,
    ) -> RuntimeResult<Box<Message>> {
        self.pool.alloc(kind, priority, sender, receiver, payload)
    }

    /// Route a message to its receiver, or fan it out on broadcast.
    ///
    /// On failure the message is recycled and the error surfaced; the
    /// caller decides whether to retry with a fresh message.
    pub fn send(&self, msg: Box<Message>) -> RuntimeResult<()> {
        if msg.receiver.is_broadcast() {
            return self.broadcast(msg);
        }
        let channel = match self.channel_between(msg.sender, msg.receiver) {
            Some(ch) => ch,
            None => {
                self.failed_sends.fetch_add(1, Ordering::Relaxed);
                self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                self.pool.release(msg);
                return Err(RuntimeError::InvalidArgument("no channel for pair"));
            }
        };
        match channel.send(msg) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(rejected) => {
                self.failed_sends.fetch_add(1, Ordering::Relaxed);
                self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                self.pool.release(rejected.message);
                Err(rejected.error)
            }
        }
    }

    /// Enqueue a clone into every channel where the sender is an
    /// endpoint. Each clone gets its own id so id uniqueness holds.
    fn broadcast(&self, msg: Box<Message>) -> RuntimeResult<()> {
        let targets: Vec<Arc<Channel>> = self
            .channels
            .lock()
            .iter()
            .filter(|ch| ch.is_endpoint(msg.sender))
            .cloned()
            .collect();

        if targets.is_empty() {
            self.failed_sends.fetch_add(1, Ordering::Relaxed);
            self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            self.pool.release(msg);
            return Err(RuntimeError::InvalidArgument("sender has no channels"));
        }

        for channel in &targets {
            let receiver = match channel.peer_of(msg.sender) {
                Some(peer) => peer,
                None => continue,
            };
            let mut clone =
                self.pool
                    .alloc(msg.kind, msg.priority, msg.sender, receiver, msg.payload.clone())?;
            clone.deadline_ns = msg.deadline_ns;
            // send() cannot reject here: the sender is an endpoint by
            // construction of `targets`.
            if channel.send(clone).is_ok() {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.pool.release(msg);
        Ok(())
    }

    /// Return a received message to the pool.
    pub fn release(&self, msg: Box<Message>) {
        self.pool.release(msg);
    }

    pub fn stats(&self) -> SystemStats {
        SystemStats {
            sent: self.sent.load(Ordering::Relaxed),
            failed_sends: self.failed_sends.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            pool: self.pool.stats(),
        }
    }
}
