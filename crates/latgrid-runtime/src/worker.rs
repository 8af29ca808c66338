//! Worker threads
//!
//! Each worker owns one OS thread and a position in the lattice. The
//! shared [`Worker`] struct carries the control surface (queue, lifecycle,
//! stats, boundaries); the numerical buffers live on the worker's own
//! stack inside [`worker_main`], so nothing else can touch them.

use crate::barrier::StepBarrier;
use crate::gradient::GradientSlice;
use crate::model::{CallContext, ModelCallbacks};

use latgrid_core::error::{RuntimeError, RuntimeResult};
use latgrid_core::id::LatticeId;
use latgrid_core::region::{AccessMode, SharedRegion};
use latgrid_core::spinlock::SpinLock;
use latgrid_core::state::{Lifecycle, LifecycleCell, Role, Transition};
use latgrid_core::stats::{WorkerStats, WorkerStatsSnapshot};
use latgrid_core::workqueue::{WorkItem, WorkKind, WorkQueue};
use latgrid_core::{clear_log_context, lg_debug, lg_warn, set_log_context};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Sleep while paused between items.
const PAUSE_POLL: Duration = Duration::from_micros(100);

pub struct Worker {
    id: LatticeId,
    role: Role,
    lifecycle: LifecycleCell,
    queue: WorkQueue,
    paused: AtomicBool,
    boundaries: SpinLock<Vec<(LatticeId, Arc<SharedRegion>)>>,
    max_neighbors: usize,
    stats: WorkerStats,
    thread_id: AtomicU64,
}

impl Worker {
    pub(crate) fn new(id: LatticeId, queue_depth: usize, max_neighbors: usize) -> Self {
        let worker = Self {
            id,
            role: Role::from_position(id.position()),
            lifecycle: LifecycleCell::new(),
            queue: WorkQueue::new(queue_depth),
            paused: AtomicBool::new(false),
            boundaries: SpinLock::new(Vec::new()),
            max_neighbors,
            stats: WorkerStats::new(),
            thread_id: AtomicU64::new(0),
        };
        // Identity assigned; buffers are created by the thread itself.
        worker.lifecycle.transition(Lifecycle::Initialized);
        worker
    }

    #[inline]
    pub fn id(&self) -> LatticeId {
        self.id
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.get()
    }

    /// Register a lifecycle-change callback.
    pub fn on_transition<F>(&self, f: F)
    where
        F: Fn(Lifecycle, Lifecycle) + Send + Sync + 'static,
    {
        self.lifecycle.on_transition(f);
    }

    /// Queue a work item and wake the worker. Callable from model
    /// callbacks: the queue mutex is per-worker and not held during
    /// dispatch.
    pub fn enqueue(&self, item: WorkItem) -> RuntimeResult<()> {
        self.queue.push(item)
    }

    /// Park the worker between items.
    pub fn pause(&self) -> RuntimeResult<()> {
        match self.lifecycle.transition(Lifecycle::Paused) {
            Transition::Applied => {
                self.paused.store(true, Ordering::Release);
                Ok(())
            }
            _ => Err(RuntimeError::InvalidArgument("worker is not running")),
        }
    }

    pub fn resume(&self) -> RuntimeResult<()> {
        match self.lifecycle.transition(Lifecycle::Running) {
            Transition::Applied => {
                self.paused.store(false, Ordering::Release);
                Ok(())
            }
            _ => Err(RuntimeError::InvalidArgument("worker is not paused")),
        }
    }

    /// Boundary region shared with `neighbor`, created on first use.
    ///
    /// Copy-on-write so a publishing worker never blocks its reader.
    /// Capped at the pool's `max_neighbors`.
    pub fn boundary_with(
        &self,
        neighbor: LatticeId,
        size: usize,
    ) -> RuntimeResult<Arc<SharedRegion>> {
        if !neighbor.is_addressable() || neighbor == self.id {
            return Err(RuntimeError::InvalidArgument("bad boundary neighbor"));
        }
        let mut boundaries = self.boundaries.lock();
        if let Some((_, region)) = boundaries.iter().find(|(who, _)| *who == neighbor) {
            return Ok(Arc::clone(region));
        }
        if boundaries.len() >= self.max_neighbors {
            return Err(RuntimeError::Exhausted);
        }
        let region = Arc::new(SharedRegion::new(
            neighbor.as_u32(),
            size,
            AccessMode::CopyOnWrite,
        )?);
        boundaries.push((neighbor, Arc::clone(&region)));
        Ok(region)
    }

    pub fn boundary_count(&self) -> usize {
        self.boundaries.lock().len()
    }

    /// OS thread id recorded by the running thread; 0 before start.
    #[inline]
    pub fn os_thread_id(&self) -> u64 {
        self.thread_id.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn work_completed(&self) -> u64 {
        self.stats.work_completed()
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Depth high-water mark of the work queue.
    pub fn queue_high_water(&self) -> usize {
        self.queue.high_water()
    }

    pub(crate) fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub(crate) fn mark_error(&self) {
        self.lifecycle.transition(Lifecycle::Error);
    }
}

/// Everything a worker thread needs, moved into the spawn closure.
pub(crate) struct WorkerHarness {
    pub worker: Arc<Worker>,
    pub model: Arc<dyn ModelCallbacks>,
    pub gradient: GradientSlice,
    pub layer_barrier: Arc<StepBarrier>,
    pub global_barrier: Arc<StepBarrier>,
    pub activation_len: usize,
    pub pin_cpu: Option<usize>,
}

/// The worker loop: wait on the queue, dispatch by work kind, exit on
/// stop after finishing only the in-flight item.
pub(crate) fn worker_main(mut harness: WorkerHarness) {
    let worker = Arc::clone(&harness.worker);
    let id = worker.id();
    set_log_context(id.layer(), id.position());

    #[cfg(unix)]
    worker
        .thread_id
        .store(unsafe { libc::pthread_self() as u64 }, Ordering::Relaxed);

    if let Some(cpu) = harness.pin_cpu {
        if !crate::affinity::pin_current_thread(cpu) {
            lg_debug!("placement hint ignored for cpu {}", cpu);
        }
    }

    worker.lifecycle.transition(Lifecycle::Ready);

    let mut staged = vec![0.0f64; harness.activation_len];
    let mut activation = vec![0.0f64; harness.activation_len];
    let mut first_item = true;

    while let Some(item) = worker.queue.pop_wait() {
        if first_item {
            worker.lifecycle.transition(Lifecycle::Running);
            first_item = false;
        }
        while worker.paused.load(Ordering::Acquire) && !worker.queue.is_stopped() {
            std::thread::sleep(PAUSE_POLL);
        }
        dispatch(
            &worker,
            &harness.model,
            &harness.layer_barrier,
            &harness.global_barrier,
            item,
            &mut staged,
            &mut activation,
            &mut harness.gradient,
        );
        worker.stats.completed();
    }

    worker.lifecycle.transition(Lifecycle::Stopping);
    worker.lifecycle.transition(Lifecycle::Stopped);
    clear_log_context();
}

fn dispatch(
    worker: &Worker,
    model: &Arc<dyn ModelCallbacks>,
    layer_barrier: &Arc<StepBarrier>,
    global_barrier: &Arc<StepBarrier>,
    item: WorkItem,
    staged: &mut [f64],
    activation: &mut [f64],
    gradient: &mut GradientSlice,
) {
    let id = worker.id();
    let cx = CallContext {
        layer: id.layer(),
        position: id.position(),
        token_id: item.token_id,
        target_id: item.target_id,
    };
    match item.kind {
        WorkKind::Forward => {
            if let Some(embedding) = model.input_for(item.token_id) {
                let n = staged.len().min(embedding.len());
                staged[..n].copy_from_slice(&embedding[..n]);
            }
            match model.forward(&cx, staged, activation) {
                Ok(()) => {
                    model.store_output(item.token_id, activation);
                    worker.stats.forward();
                }
                Err(err) => {
                    worker.stats.callback_error();
                    lg_warn!("forward failed for token {}: {}", item.token_id, err);
                }
            }
        }
        WorkKind::Backward => {
            match model.backward(&cx, activation, gradient.as_mut_slice()) {
                Ok(()) => worker.stats.backward(),
                Err(err) => {
                    worker.stats.callback_error();
                    lg_warn!("backward failed for token {}: {}", item.token_id, err);
                }
            }
        }
        WorkKind::Optimize => {
            // End-of-step hook: the zeroing cost of the next step is
            // distributed across workers.
            gradient.zero();
        }
        WorkKind::SyncLayer => {
            worker.stats.sync_arrival();
            layer_barrier.arrive();
        }
        WorkKind::SyncGlobal => {
            worker.stats.sync_arrival();
            global_barrier.arrive();
        }
        WorkKind::User(tag) => {
            lg_warn!("unknown work kind {} dropped", tag);
            worker.stats.dropped();
        }
    }
}
