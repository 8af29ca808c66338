//! Message record and type tags
//!
//! Messages are allocated from a [`MessagePool`](crate::pool::MessagePool)
//! and routed through channels. The payload is owned by the message;
//! dropping the message drops the payload.

use crate::id::LatticeId;
use crate::state::Priority;

use std::sync::OnceLock;
use std::time::Instant;

/// First tag value available to user extensions.
pub const USER_KIND_BASE: u16 = 1000;

/// Type tag of a message
///
/// Tags below [`USER_KIND_BASE`] are reserved for the runtime; everything
/// at or above it round-trips through [`MessageKind::User`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Runtime control traffic
    Control,

    /// Numerical payload hand-off
    Data,

    /// Phase coordination between workers
    Sync,

    /// Orderly stop request
    Shutdown,

    /// Caller-defined tag, `>= USER_KIND_BASE`
    User(u16),
}

impl MessageKind {
    pub const fn as_u16(self) -> u16 {
        match self {
            MessageKind::Control => 1,
            MessageKind::Data => 2,
            MessageKind::Sync => 3,
            MessageKind::Shutdown => 4,
            MessageKind::User(tag) => tag,
        }
    }

    /// Unknown reserved tags map to `Control`; user-range tags round-trip.
    pub const fn from_u16(raw: u16) -> Self {
        match raw {
            2 => MessageKind::Data,
            3 => MessageKind::Sync,
            4 => MessageKind::Shutdown,
            tag if tag >= USER_KIND_BASE => MessageKind::User(tag),
            _ => MessageKind::Control,
        }
    }
}

/// One message in flight
///
/// `id` is unique and non-zero within the issuing
/// [`MessageSystem`](crate::system::MessageSystem); id 0 is reserved.
#[derive(Debug)]
pub struct Message {
    pub id: u64,
    pub kind: MessageKind,
    pub priority: Priority,
    pub sender: LatticeId,
    pub receiver: LatticeId,
    pub payload: Vec<u8>,

    /// Allocation time, monotonic nanoseconds
    pub timestamp_ns: u64,

    /// Optional delivery deadline, monotonic nanoseconds
    pub deadline_ns: Option<u64>,

    /// Skip pool recycling on release; the owner manages reuse
    pub persistent: bool,
}

impl Message {
    /// A message past its deadline stays deliverable; receivers decide
    /// what an expired message means.
    #[inline]
    pub fn is_expired(&self) -> bool {
        match self.deadline_ns {
            Some(deadline) => monotonic_ns() > deadline,
            None => false,
        }
    }

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.receiver.is_broadcast()
    }
}

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds since the first call in this process. Monotone.
#[inline]
pub fn monotonic_ns() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}
