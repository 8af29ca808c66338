//! # latgrid-core
//!
//! Core types for the latgrid lattice runtime. Platform-agnostic; the
//! lattice itself (workers, barriers, gradients) lives in
//! `latgrid-runtime`.
//!
//! ## Modules
//!
//! - `id` - lattice thread identity
//! - `state` - lifecycle state machine, role, message priority
//! - `message` - message record and type tags
//! - `pool` - fixed message pool with heap fallback
//! - `queue` - lock-free FIFO and 4-level priority fan-in
//! - `channel` - bidirectional channel between two thread ids
//! - `system` - message pool plus channel registry
//! - `region` - shared memory regions (read-only / COW / locked-write)
//! - `workqueue` - per-worker work queue
//! - `stats` - worker counters
//! - `error` - error types
//! - `spinlock` - internal spinlock primitive
//! - `logmsg` - leveled stderr logging macros
//! - `env` - environment variable helpers

pub mod channel;
pub mod env;
pub mod error;
pub mod id;
pub mod logmsg;
pub mod message;
pub mod pool;
pub mod queue;
pub mod region;
pub mod spinlock;
pub mod state;
pub mod stats;
pub mod system;
pub mod workqueue;

// Re-exports for convenience
pub use channel::{Channel, RejectedSend};
pub use env::{env_get, env_get_bool, env_get_opt};
pub use error::{RuntimeError, RuntimeResult};
pub use id::LatticeId;
pub use logmsg::{clear_log_context, set_log_context, LogLevel};
pub use message::{monotonic_ns, Message, MessageKind, USER_KIND_BASE};
pub use pool::{MessagePool, PoolStats};
pub use queue::{FifoQueue, PriorityQueue};
pub use region::{AccessMode, HistoryEntry, RegionStats, SharedRegion};
pub use spinlock::SpinLock;
pub use state::{Lifecycle, LifecycleCell, Priority, Role, Transition};
pub use stats::{WorkerStats, WorkerStatsSnapshot};
pub use system::{MessageSystem, SystemStats};
pub use workqueue::{WorkItem, WorkKind, WorkQueue};
