//! Shared memory regions
//!
//! A region is a fixed-size byte buffer with one of three concurrent
//! access disciplines:
//!
//! - `ReadOnly`: reads are wait-free and unbounded, writes always fail.
//! - `CopyOnWrite`: writers mutate a private copy; releasing the guard
//!   folds the copy back atomically, bumps the version and fires
//!   invalidation listeners. Readers hold a stable snapshot.
//! - `LockedWrite`: a writer excludes every reader and every other
//!   writer, blocking until exclusive access is possible.
//!
//! Acquisition returns a guard; release happens on drop, so a release
//! without a matching acquire cannot be expressed. The instantaneous
//! invariant holds in every mode: either no writer, or exactly one writer
//! and zero readers.

use crate::error::{RuntimeError, RuntimeResult};
use crate::message::monotonic_ns;
use crate::spinlock::SpinLock;

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Concurrent access discipline of a region, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    CopyOnWrite,
    LockedWrite,
}

/// One entry of the optional version history ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry {
    pub version: u64,
    pub timestamp_ns: u64,
    pub size: usize,
}

struct HistoryRing {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryRing {
    fn record(&mut self, entry: HistoryEntry) {
        // Overflow is silent; the oldest entry goes.
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }
}

/// Snapshot of region counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionStats {
    pub reads: u64,
    pub writes: u64,
    pub cow_copies: u64,
    pub invalidations: u64,
}

#[derive(Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    cow_copies: AtomicU64,
    invalidations: AtomicU64,
}

/// Canonical storage. Direct for modes that mutate in place or never
/// mutate; Staged for copy-on-write, where commit swaps the snapshot.
enum Store {
    Direct(UnsafeCell<Box<[u8]>>),
    Staged(SpinLock<Arc<Vec<u8>>>),
}

#[derive(Default)]
struct LockState {
    readers: u32,
    writer: bool,
}

type InvalidationFn = Box<dyn Fn(u64, u64) + Send + Sync>;

pub struct SharedRegion {
    id: u32,
    size: usize,
    mode: AccessMode,
    version: AtomicU64,
    store: Store,

    // LockedWrite arbitration; untouched in the other modes.
    lock: Mutex<LockState>,
    cv: Condvar,

    // Instantaneous holder counts, all modes.
    readers: AtomicU32,
    writers: AtomicU32,

    listeners: SpinLock<Vec<InvalidationFn>>,
    history: SpinLock<Option<HistoryRing>>,
    counters: Counters,
}

// Safety: the Direct store is only handed out as &mut under LockedWrite
// exclusivity, and never mutated at all in ReadOnly mode. The Staged
// store swaps whole Arcs under its spinlock.
unsafe impl Sync for SharedRegion {}
unsafe impl Send for SharedRegion {}

impl SharedRegion {
    /// Create a zero-filled region.
    pub fn new(id: u32, size: usize, mode: AccessMode) -> RuntimeResult<Self> {
        if size == 0 {
            return Err(RuntimeError::InvalidArgument("region size must be > 0"));
        }
        Self::from_bytes(id, vec![0u8; size], mode)
    }

    /// Create a region holding `bytes`. Read-only regions get their
    /// permanent contents this way.
    pub fn from_bytes(id: u32, bytes: Vec<u8>, mode: AccessMode) -> RuntimeResult<Self> {
        if bytes.is_empty() {
            return Err(RuntimeError::InvalidArgument("region size must be > 0"));
        }
        let size = bytes.len();
        let store = match mode {
            AccessMode::CopyOnWrite => Store::Staged(SpinLock::new(Arc::new(bytes))),
            _ => Store::Direct(UnsafeCell::new(bytes.into_boxed_slice())),
        };
        Ok(Self {
            id,
            size,
            mode,
            version: AtomicU64::new(0),
            store,
            lock: Mutex::new(LockState::default()),
            cv: Condvar::new(),
            readers: AtomicU32::new(0),
            writers: AtomicU32::new(0),
            listeners: SpinLock::new(Vec::new()),
            history: SpinLock::new(None),
            counters: Counters::default(),
        })
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    #[inline]
    pub fn reader_count(&self) -> u32 {
        self.readers.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn writer_count(&self) -> u32 {
        self.writers.load(Ordering::Relaxed)
    }

    /// Start recording `(version, timestamp, size)` per write into a ring
    /// of `capacity` entries.
    pub fn enable_history(&self, capacity: usize) -> RuntimeResult<()> {
        if capacity == 0 {
            return Err(RuntimeError::InvalidArgument("history capacity must be > 0"));
        }
        *self.history.lock() = Some(HistoryRing {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        });
        Ok(())
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        match &*self.history.lock() {
            Some(ring) => ring.entries.iter().copied().collect(),
            None => Vec::new(),
        }
    }

    /// Register a listener fired on every committed write with
    /// `(old_version, new_version)`.
    pub fn on_invalidate<F>(&self, f: F)
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Box::new(f));
    }

    /// Acquire shared read access.
    ///
    /// Wait-free for `ReadOnly` and `CopyOnWrite`; blocks behind an
    /// active writer in `LockedWrite` mode.
    pub fn acquire_read(&self) -> RuntimeResult<RegionReadGuard<'_>> {
        let data = match (&self.store, self.mode) {
            (Store::Direct(cell), AccessMode::ReadOnly) => {
                // Safety: a ReadOnly region is never written after
                // construction.
                ReadData::Borrowed(unsafe { &**cell.get() })
            }
            (Store::Staged(canonical), _) => ReadData::Snapshot(Arc::clone(&canonical.lock())),
            (Store::Direct(cell), _) => {
                let mut state = poisoned_to_invariant(self.lock.lock())?;
                while state.writer {
                    state = poisoned_to_invariant(self.cv.wait(state))?;
                }
                state.readers += 1;
                // Safety: the lock state excludes writers until this
                // reader releases.
                ReadData::Borrowed(unsafe { &**cell.get() })
            }
        };
        self.readers.fetch_add(1, Ordering::AcqRel);
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        Ok(RegionReadGuard { region: self, data })
    }

    /// Acquire write access according to the region's mode.
    pub fn acquire_write(&self) -> RuntimeResult<RegionWriteGuard<'_>> {
        let data = match (&self.store, self.mode) {
            (_, AccessMode::ReadOnly) => return Err(RuntimeError::AccessDenied),
            (Store::Staged(canonical), _) => {
                let copy = canonical.lock().as_ref().clone();
                self.counters.cow_copies.fetch_add(1, Ordering::Relaxed);
                WriteData::Staged(copy)
            }
            (Store::Direct(cell), _) => {
                let mut state = poisoned_to_invariant(self.lock.lock())?;
                while state.writer || state.readers > 0 {
                    state = poisoned_to_invariant(self.cv.wait(state))?;
                }
                state.writer = true;
                // Safety: exclusive per the lock state; released on drop.
                WriteData::Exclusive(unsafe { &mut **cell.get() })
            }
        };
        self.writers.fetch_add(1, Ordering::AcqRel);
        Ok(RegionWriteGuard { region: self, data })
    }

    pub fn stats(&self) -> RegionStats {
        RegionStats {
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            cow_copies: self.counters.cow_copies.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        }
    }

    /// Version bump plus history and listener fan-out, shared by both
    /// write-release paths.
    fn committed(&self) {
        let old = self.version.fetch_add(1, Ordering::AcqRel);
        let new = old + 1;
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        if let Some(ring) = self.history.lock().as_mut() {
            ring.record(HistoryEntry {
                version: new,
                timestamp_ns: monotonic_ns(),
                size: self.size,
            });
        }
        let listeners = self.listeners.lock();
        for listener in listeners.iter() {
            listener(old, new);
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl core::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("mode", &self.mode)
            .field("version", &self.version())
            .finish()
    }
}

fn poisoned_to_invariant<T>(
    r: Result<T, std::sync::PoisonError<T>>,
) -> RuntimeResult<T> {
    r.map_err(|_| RuntimeError::InvariantViolation("region lock poisoned"))
}

enum ReadData<'a> {
    Borrowed(&'a [u8]),
    Snapshot(Arc<Vec<u8>>),
}

/// Shared read access; released on drop.
pub struct RegionReadGuard<'a> {
    region: &'a SharedRegion,
    data: ReadData<'a>,
}

impl Deref for RegionReadGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.data {
            ReadData::Borrowed(slice) => slice,
            ReadData::Snapshot(arc) => arc.as_slice(),
        }
    }
}

impl Drop for RegionReadGuard<'_> {
    fn drop(&mut self) {
        // The atomic count drops before the lock-state hand-off so that a
        // writer admitted by the state never observes a stale reader.
        let prev = self.region.readers.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "reader count underflow");
        if self.region.mode == AccessMode::LockedWrite {
            if let Ok(mut state) = self.region.lock.lock() {
                debug_assert!(state.readers > 0, "reader count underflow");
                state.readers = state.readers.saturating_sub(1);
                self.region.cv.notify_all();
            }
        }
    }
}

enum WriteData<'a> {
    Exclusive(&'a mut [u8]),
    Staged(Vec<u8>),
}

/// Write access; the release on drop commits the write, bumps the
/// version and fires invalidation listeners.
pub struct RegionWriteGuard<'a> {
    region: &'a SharedRegion,
    data: WriteData<'a>,
}

impl Deref for RegionWriteGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.data {
            WriteData::Exclusive(slice) => slice,
            WriteData::Staged(copy) => copy.as_slice(),
        }
    }
}

impl DerefMut for RegionWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match &mut self.data {
            WriteData::Exclusive(slice) => slice,
            WriteData::Staged(copy) => copy.as_mut_slice(),
        }
    }
}

impl Drop for RegionWriteGuard<'_> {
    fn drop(&mut self) {
        let exclusive = matches!(self.data, WriteData::Exclusive(_));
        if let WriteData::Staged(copy) = &mut self.data {
            let committed = std::mem::take(copy);
            if let Store::Staged(canonical) = &self.region.store {
                *canonical.lock() = Arc::new(committed);
            }
        }
        self.region.committed();
        let prev = self.region.writers.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "writer count underflow");
        if exclusive {
            // Release the state last, after the commit and the atomic
            // count, so admitted readers see a fully released writer.
            if let Ok(mut state) = self.region.lock.lock() {
                debug_assert!(state.writer, "writer flag lost");
                state.writer = false;
                self.region.cv.notify_all();
            }
        }
    }
}
