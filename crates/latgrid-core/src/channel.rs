//! Bidirectional channel between two lattice threads
//!
//! A channel pairs two endpoints and keeps one priority queue per
//! direction. Sends from anything other than an endpoint are rejected.
//! Within one priority on one direction, delivery is FIFO; across
//! directions or channels no ordering is promised.

use crate::error::RuntimeError;
use crate::id::LatticeId;
use crate::message::Message;
use crate::queue::PriorityQueue;
use crate::state::Priority;

use core::fmt;
use std::time::{Duration, Instant};

/// Sleep per poll in `recv_timeout`. Short enough for latency, long
/// enough not to busy-spin a core.
const RECV_POLL: Duration = Duration::from_micros(5);

/// A send the channel refused, handing the message back to the caller.
pub struct RejectedSend {
    pub error: RuntimeError,
    pub message: Box<Message>,
}

impl fmt::Debug for RejectedSend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RejectedSend")
            .field("error", &self.error)
            .field("message_id", &self.message.id)
            .finish()
    }
}

impl fmt::Display for RejectedSend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "send rejected: {}", self.error)
    }
}

pub struct Channel {
    a: LatticeId,
    b: LatticeId,
    a_to_b: PriorityQueue,
    b_to_a: PriorityQueue,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("a", &self.a)
            .field("b", &self.b)
            .finish()
    }
}

impl Channel {
    /// Endpoints must be distinct addressable workers.
    pub fn new(a: LatticeId, b: LatticeId) -> Result<Self, RuntimeError> {
        if !a.is_addressable() || !b.is_addressable() {
            return Err(RuntimeError::InvalidArgument("channel endpoint is a sentinel"));
        }
        if a == b {
            return Err(RuntimeError::InvalidArgument("channel endpoints must differ"));
        }
        Ok(Self {
            a,
            b,
            a_to_b: PriorityQueue::new(),
            b_to_a: PriorityQueue::new(),
        })
    }

    #[inline]
    pub fn endpoints(&self) -> (LatticeId, LatticeId) {
        (self.a, self.b)
    }

    #[inline]
    pub fn is_endpoint(&self, id: LatticeId) -> bool {
        id == self.a || id == self.b
    }

    /// The opposite end, if `id` is an endpoint.
    pub fn peer_of(&self, id: LatticeId) -> Option<LatticeId> {
        if id == self.a {
            Some(self.b)
        } else if id == self.b {
            Some(self.a)
        } else {
            None
        }
    }

    /// Route a message by its sender field.
    pub fn send(&self, msg: Box<Message>) -> Result<(), RejectedSend> {
        if msg.sender == self.a {
            self.a_to_b.enqueue(msg);
            Ok(())
        } else if msg.sender == self.b {
            self.b_to_a.enqueue(msg);
            Ok(())
        } else {
            Err(RejectedSend {
                error: RuntimeError::InvalidSender,
                message: msg,
            })
        }
    }

    /// Dequeue the next message addressed to `who`, highest priority first.
    pub fn recv(&self, who: LatticeId) -> Result<Option<Box<Message>>, RuntimeError> {
        if who == self.a {
            Ok(self.b_to_a.dequeue())
        } else if who == self.b {
            Ok(self.a_to_b.dequeue())
        } else {
            Err(RuntimeError::InvalidArgument("receiver is not an endpoint"))
        }
    }

    /// Poll `recv` with short sleeps until a message arrives or `timeout`
    /// passes. A timeout is reported as `Ok(None)`, not an error.
    pub fn recv_timeout(
        &self,
        who: LatticeId,
        timeout: Duration,
    ) -> Result<Option<Box<Message>>, RuntimeError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(msg) = self.recv(who)? {
                return Ok(Some(msg));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(RECV_POLL);
        }
    }

    /// Messages waiting for `who`.
    pub fn pending(&self, who: LatticeId) -> usize {
        if who == self.a {
            self.b_to_a.len()
        } else if who == self.b {
            self.a_to_b.len()
        } else {
            0
        }
    }

    pub fn high_water(&self, who: LatticeId, priority: Priority) -> usize {
        if who == self.a {
            self.b_to_a.high_water(priority)
        } else if who == self.b {
            self.a_to_b.high_water(priority)
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{monotonic_ns, MessageKind};
    use std::sync::Arc;
    use std::thread;

    const A: LatticeId = LatticeId::new(0, 0);
    const B: LatticeId = LatticeId::new(0, 1);

    fn msg(sender: LatticeId, receiver: LatticeId, seq: u64, priority: Priority) -> Box<Message> {
        Box::new(Message {
            id: seq + 1,
            kind: MessageKind::Data,
            priority,
            sender,
            receiver,
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
    fn test_rejects_degenerate_endpoints() {
        assert!(Channel::new(A, A).is_err());
        assert!(Channel::new(A, LatticeId::NONE).is_err());
        assert!(Channel::new(LatticeId::BROADCAST, B).is_err());
    }

    #[test]
    fn test_send_from_non_endpoint_rejected() {
        let ch = Channel::new(A, B).unwrap();
        let outsider = LatticeId::new(5, 5);
        let rejected = ch.send(msg(outsider, B, 0, Priority::Normal)).unwrap_err();
        assert_eq!(rejected.error, RuntimeError::InvalidSender);
        // The message comes back intact.
        assert_eq!(seq_of(&rejected.message), 0);
    }

    #[test]
    fn test_directional_routing() {
        let ch = Channel::new(A, B).unwrap();
        ch.send(msg(A, B, 1, Priority::Normal)).unwrap();
        ch.send(msg(B, A, 2, Priority::Normal)).unwrap();

        assert_eq!(seq_of(&ch.recv(B).unwrap().unwrap()), 1);
        assert_eq!(seq_of(&ch.recv(A).unwrap().unwrap()), 2);
        assert!(ch.recv(A).unwrap().is_none());
        assert!(ch.recv(LatticeId::new(9, 9)).is_err());
    }

    #[test]
    fn test_recv_timeout_empty_returns_none() {
        let ch = Channel::new(A, B).unwrap();
        let start = Instant::now();
        let got = ch.recv_timeout(B, Duration::from_millis(5)).unwrap();
        assert!(got.is_none());
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_recv_timeout_picks_up_late_send() {
        let ch = Arc::new(Channel::new(A, B).unwrap());
        let sender = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(2));
                ch.send(msg(A, B, 42, Priority::Normal)).unwrap();
            })
        };
        let got = ch.recv_timeout(B, Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(seq_of(&got), 42);
        sender.join().unwrap();
    }

    #[test]
    fn test_ping_pong_1000_in_order() {
        // 1000 NORMAL messages A -> B arrive complete and in order.
        let ch = Arc::new(Channel::new(A, B).unwrap());

        let producer = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || {
                for i in 0..1000 {
                    ch.send(msg(A, B, i, Priority::Normal)).unwrap();
                }
            })
        };

        let consumer = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || {
                let mut next = 0u64;
                while next < 1000 {
                    if let Some(m) = ch.recv(B).unwrap() {
                        assert_eq!(seq_of(&m), next);
                        next += 1;
                    } else {
                        std::hint::spin_loop();
                    }
                }
            })
        };

        producer.join().unwrap();
        consumer.join().unwrap();
        assert_eq!(ch.pending(B), 0);
    }

    #[test]
    fn test_priority_burst_ordering() {
        // 10 LOW, 10 CRITICAL, 10 LOW: receiver sees all CRITICAL first,
        // then the LOW messages in enqueue order.
        let ch = Channel::new(A, B).unwrap();
        for i in 0..10 {
            ch.send(msg(A, B, i, Priority::Low)).unwrap();
        }
        for i in 10..20 {
            ch.send(msg(A, B, i, Priority::Critical)).unwrap();
        }
        for i in 20..30 {
            ch.send(msg(A, B, i, Priority::Low)).unwrap();
        }

        let mut order = Vec::new();
        while let Some(m) = ch.recv(B).unwrap() {
            order.push(seq_of(&m));
        }
        assert_eq!(&order[..10], &(10..20).collect::<Vec<_>>()[..]);
        assert_eq!(&order[10..], &(0..10).chain(20..30).collect::<Vec<_>>()[..]);
    }
}
