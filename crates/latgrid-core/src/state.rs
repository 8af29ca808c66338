//! Worker lifecycle, role and message priority types

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::spinlock::SpinLock;

/// Lifecycle state of a worker
///
/// The normal path is `Uninitialized -> Initialized -> Ready -> Running ->
/// Stopping -> Stopped`, with `Paused` reachable from `Running` and back.
/// `Error` is reachable from every state and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    /// Allocated, identity not yet assigned
    Uninitialized = 0,

    /// Identity and buffers assigned, thread not spawned
    Initialized = 1,

    /// Thread spawned, waiting for the first work item
    Ready = 2,

    /// Processing work items
    Running = 3,

    /// Parked between items, queue kept intact
    Paused = 4,

    /// Stop flag observed, finishing the in-flight item
    Stopping = 5,

    /// Thread exited, queue drained or discarded
    Stopped = 6,

    /// Unrecoverable fault
    Error = 7,
}

impl Lifecycle {
    /// Check whether `self -> to` is an allowed transition.
    pub const fn allows(self, to: Lifecycle) -> bool {
        use Lifecycle::*;
        if matches!(to, Error) {
            // Error is reachable from everything except itself.
            return !matches!(self, Error);
        }
        matches!(
            (self, to),
            (Uninitialized, Initialized)
                | (Initialized, Ready)
                | (Ready, Running)
                | (Ready, Stopping)
                | (Running, Paused)
                | (Running, Stopping)
                | (Paused, Running)
                | (Paused, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// True once the worker can no longer make progress.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Lifecycle::Stopped | Lifecycle::Error)
    }
}

impl From<u8> for Lifecycle {
    fn from(v: u8) -> Self {
        match v {
            0 => Lifecycle::Uninitialized,
            1 => Lifecycle::Initialized,
            2 => Lifecycle::Ready,
            3 => Lifecycle::Running,
            4 => Lifecycle::Paused,
            5 => Lifecycle::Stopping,
            6 => Lifecycle::Stopped,
            _ => Lifecycle::Error,
        }
    }
}

/// Outcome of a requested lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The state changed and callbacks fired
    Applied,

    /// The transition is not in the table; state unchanged
    Invalid,

    /// The worker is already in `Error`; state unchanged
    Faulted,
}

type TransitionFn = Box<dyn Fn(Lifecycle, Lifecycle) + Send + Sync>;

/// Atomic lifecycle cell with transition validation and change callbacks.
///
/// Transitions are validated against the table in [`Lifecycle::allows`];
/// an invalid request leaves the state untouched. Callbacks registered via
/// [`LifecycleCell::on_transition`] fire after every applied transition
/// with `(from, to)`.
pub struct LifecycleCell {
    state: AtomicU8,
    callbacks: SpinLock<Vec<TransitionFn>>,
}

impl LifecycleCell {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(Lifecycle::Uninitialized as u8),
            callbacks: SpinLock::new(Vec::new()),
        }
    }

    #[inline]
    pub fn get(&self) -> Lifecycle {
        Lifecycle::from(self.state.load(Ordering::Acquire))
    }

    /// Attempt a transition to `to`.
    pub fn transition(&self, to: Lifecycle) -> Transition {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            let from = Lifecycle::from(cur);
            if from == Lifecycle::Error {
                return Transition::Faulted;
            }
            if !from.allows(to) {
                return Transition::Invalid;
            }
            match self.state.compare_exchange_weak(
                cur,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    for cb in self.callbacks.lock().iter() {
                        cb(from, to);
                    }
                    return Transition::Applied;
                }
                Err(actual) => cur = actual,
            }
        }
    }

    /// Register a callback fired after each applied transition.
    pub fn on_transition<F>(&self, f: F)
    where
        F: Fn(Lifecycle, Lifecycle) + Send + Sync + 'static,
    {
        self.callbacks.lock().push(Box::new(f));
    }
}

impl Default for LifecycleCell {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LifecycleCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LifecycleCell").field(&self.get()).finish()
    }
}

/// Role of a worker within its layer
///
/// Position 0 coordinates; everyone else computes. Role is fixed at pool
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Worker,
}

impl Role {
    #[inline]
    pub const fn from_position(position: u16) -> Self {
        if position == 0 {
            Role::Coordinator
        } else {
            Role::Worker
        }
    }
}

/// Priority level for messages
///
/// Lower discriminant drains first. Sustained higher-priority traffic can
/// starve lower levels; that is the accepted trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    /// Control traffic, drained before everything else
    Critical = 0,

    /// Latency-sensitive traffic
    High = 1,

    /// Default for data messages
    Normal = 2,

    /// Background traffic, may be starved
    Low = 3,
}

impl Priority {
    /// Number of priority levels
    pub const COUNT: usize = 4;

    #[inline]
    pub const fn as_index(self) -> usize {
        self as usize
    }

    #[inline]
    pub const fn from_index(idx: usize) -> Option<Priority> {
        match idx {
            0 => Some(Priority::Critical),
            1 => Some(Priority::High),
            2 => Some(Priority::Normal),
            3 => Some(Priority::Low),
            _ => None,
        }
    }

    /// Iterator over all levels, highest first.
    pub fn iter() -> impl Iterator<Item = Priority> {
        [Priority::Critical, Priority::High, Priority::Normal, Priority::Low].into_iter()
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl From<u8> for Priority {
    fn from(v: u8) -> Self {
        // Out-of-range values fall back to Normal.
        match v {
            0 => Priority::Critical,
            1 => Priority::High,
            2 => Priority::Normal,
            3 => Priority::Low,
            _ => Priority::Normal,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Critical => write!(f, "CRITICAL"),
            Priority::High => write!(f, "HIGH"),
            Priority::Normal => write!(f, "NORMAL"),
            Priority::Low => write!(f, "LOW"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_normal_path() {
        let cell = LifecycleCell::new();
        for to in [
            Lifecycle::Initialized,
            Lifecycle::Ready,
            Lifecycle::Running,
            Lifecycle::Stopping,
            Lifecycle::Stopped,
        ] {
            assert_eq!(cell.transition(to), Transition::Applied);
            assert_eq!(cell.get(), to);
        }
        assert!(cell.get().is_terminal());
    }

    #[test]
    fn test_invalid_transition_keeps_state() {
        let cell = LifecycleCell::new();
        assert_eq!(cell.transition(Lifecycle::Running), Transition::Invalid);
        assert_eq!(cell.get(), Lifecycle::Uninitialized);
    }

    #[test]
    fn test_pause_resume() {
        assert!(Lifecycle::Running.allows(Lifecycle::Paused));
        assert!(Lifecycle::Paused.allows(Lifecycle::Running));
        assert!(Lifecycle::Paused.allows(Lifecycle::Stopping));
        assert!(!Lifecycle::Ready.allows(Lifecycle::Paused));
    }

    #[test]
    fn test_error_reachable_and_terminal() {
        let cell = LifecycleCell::new();
        assert_eq!(cell.transition(Lifecycle::Error), Transition::Applied);
        assert_eq!(cell.transition(Lifecycle::Initialized), Transition::Faulted);
        assert_eq!(cell.get(), Lifecycle::Error);
    }

    #[test]
    fn test_callbacks_fire_on_applied_only() {
        let cell = LifecycleCell::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        cell.on_transition(move |from, to| {
            assert!(from.allows(to));
            f.fetch_add(1, Ordering::SeqCst);
        });

        cell.transition(Lifecycle::Initialized);
        cell.transition(Lifecycle::Running); // invalid, must not fire
        cell.transition(Lifecycle::Ready);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_role_from_position() {
        assert_eq!(Role::from_position(0), Role::Coordinator);
        assert_eq!(Role::from_position(7), Role::Worker);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
    }

    #[test]
    fn test_priority_out_of_range_defaults_to_normal() {
        assert_eq!(Priority::from(200u8), Priority::Normal);
        assert_eq!(Priority::from_index(9), None);
    }
}
