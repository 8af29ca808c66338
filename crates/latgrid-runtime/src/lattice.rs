//! The lattice thread pool
//!
//! Constructs, starts, stops and joins `L x W` workers, owns the layer
//! and global barriers, the gradient accumulator and the global shared
//! region. Workers are an arena indexed by `(layer, position)`; nothing
//! in the pool holds owning pointers between workers.
//!
//! Phase discipline: the driver enqueues sync items and observes barrier
//! generations. The barrier parties are exactly the workers; the driver
//! is a spectator.

use crate::barrier::StepBarrier;
use crate::config::PoolConfig;
use crate::gradient::GradientAccumulator;
use crate::model::{self, ModelCallbacks};
use crate::worker::{worker_main, Worker, WorkerHarness};

use latgrid_core::error::{RuntimeError, RuntimeResult};
use latgrid_core::id::LatticeId;
use latgrid_core::lg_info;
use latgrid_core::region::{AccessMode, SharedRegion};
use latgrid_core::stats::WorkerStatsSnapshot;
use latgrid_core::workqueue::{WorkItem, WorkKind};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

pub struct LatticePool {
    config: PoolConfig,
    workers: Vec<Arc<Worker>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    layer_barriers: Vec<Arc<StepBarrier>>,
    global_barrier: Arc<StepBarrier>,
    gradients: Arc<GradientAccumulator>,
    model: Arc<dyn ModelCallbacks>,
    shared: Arc<SharedRegion>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl LatticePool {
    /// Build the lattice. Allocates workers, barriers, the gradient slab
    /// and the global shared region; spawns nothing yet.
    pub fn new(config: PoolConfig, model: Arc<dyn ModelCallbacks>) -> RuntimeResult<Self> {
        config
            .validate()
            .map_err(RuntimeError::InvalidArgument)?;
        if !model::validate(model.as_ref()) {
            return Err(RuntimeError::InvalidArgument(
                "model callback table is incomplete",
            ));
        }

        let layers = config.layers;
        let width = config.positions_per_layer;
        let mut workers = Vec::with_capacity(config.worker_count());
        for layer in 0..layers {
            for position in 0..width {
                workers.push(Arc::new(Worker::new(
                    LatticeId::new(layer as u16, position as u16),
                    config.work_queue_depth,
                    config.max_neighbors,
                )));
            }
        }

        let layer_barriers = (0..layers)
            .map(|_| Arc::new(StepBarrier::new(width)))
            .collect();
        let global_barrier = Arc::new(StepBarrier::new(layers * width));

        let gradients = Arc::new(GradientAccumulator::new(
            config.worker_count(),
            config.gradient_slice_len,
            config.reduction_policy,
        )?);

        // Parameter staging region, written only in the exclusive
        // optimizer phase.
        let shared = Arc::new(SharedRegion::new(
            0,
            config.gradient_slice_len * std::mem::size_of::<f64>(),
            AccessMode::LockedWrite,
        )?);

        Ok(Self {
            config,
            workers,
            handles: Mutex::new(Vec::new()),
            layer_barriers,
            global_barrier,
            gradients,
            model,
            shared,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Spawn the worker threads. Idempotent; a stopped pool is not
    /// restartable.
    pub fn start(&self) -> RuntimeResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(RuntimeError::ShuttingDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut handles = self
            .handles
            .lock()
            .map_err(|_| RuntimeError::InvariantViolation("pool handle table poisoned"))?;
        for (index, worker) in self.workers.iter().enumerate() {
            let id = worker.id();
            let harness = WorkerHarness {
                worker: Arc::clone(worker),
                model: Arc::clone(&self.model),
                gradient: self.gradients.claim_slice(index)?,
                layer_barrier: Arc::clone(&self.layer_barriers[id.layer() as usize]),
                global_barrier: Arc::clone(&self.global_barrier),
                activation_len: self.config.activation_len,
                pin_cpu: self.config.numa_hint.then_some(index),
            };
            let handle = std::thread::Builder::new()
                .name(format!("latgrid-w{}-{}", id.layer(), id.position()))
                .spawn(move || worker_main(harness))
                .map_err(|_| {
                    worker.mark_error();
                    RuntimeError::AllocationFailure
                })?;
            handles.push(handle);
        }
        lg_info!(
            "lattice started: {} layers x {} positions",
            self.config.layers,
            self.config.positions_per_layer
        );
        Ok(())
    }

    /// Stop every worker and join its thread. Idempotent; implied by
    /// drop. Workers finish only their in-flight item; leftover queue
    /// entries are discarded with the pool.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for worker in &self.workers {
            worker.queue().stop();
        }
        // Never-started pools have no handles; the drain is a no-op.
        if let Ok(mut handles) = self.handles.lock() {
            for handle in handles.drain(..) {
                let _ = handle.join();
            }
        }
        self.model.cleanup();
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    #[inline]
    pub fn gradients(&self) -> &GradientAccumulator {
        &self.gradients
    }

    #[inline]
    pub fn shared_region(&self) -> &Arc<SharedRegion> {
        &self.shared
    }

    /// Constant-time worker lookup.
    pub fn get_thread(&self, layer: usize, position: usize) -> Option<&Arc<Worker>> {
        if layer >= self.config.layers || position >= self.config.positions_per_layer {
            return None;
        }
        self.workers
            .get(layer * self.config.positions_per_layer + position)
    }

    /// Queue a work item on worker `(layer, position)`.
    pub fn submit(
        &self,
        layer: usize,
        position: usize,
        item: WorkItem,
    ) -> RuntimeResult<()> {
        let worker = self
            .get_thread(layer, position)
            .ok_or(RuntimeError::InvalidArgument("worker index out of range"))?;
        worker.enqueue(item)
    }

    /// Rendezvous all `W` workers of `layer` at its barrier and wait for
    /// the round to complete.
    pub fn sync_layer(&self, layer: usize) -> RuntimeResult<()> {
        let barrier = self
            .layer_barriers
            .get(layer)
            .ok_or(RuntimeError::InvalidArgument("layer out of range"))?;
        if !self.is_started() || self.is_stopped() {
            return Err(RuntimeError::ShuttingDown);
        }
        let target = barrier.generation() + 1;
        for position in 0..self.config.positions_per_layer {
            self.submit(layer, position, WorkItem::new(WorkKind::SyncLayer, 0, 0))?;
        }
        barrier.wait_generation(target);
        Ok(())
    }

    /// Rendezvous every worker in the pool at the global barrier.
    pub fn sync_all(&self) -> RuntimeResult<()> {
        if !self.is_started() || self.is_stopped() {
            return Err(RuntimeError::ShuttingDown);
        }
        let target = self.global_barrier.generation() + 1;
        for worker in &self.workers {
            worker.enqueue(WorkItem::new(WorkKind::SyncGlobal, 0, 0))?;
        }
        self.global_barrier.wait_generation(target);
        Ok(())
    }

    pub fn pause_worker(&self, layer: usize, position: usize) -> RuntimeResult<()> {
        self.get_thread(layer, position)
            .ok_or(RuntimeError::InvalidArgument("worker index out of range"))?
            .pause()
    }

    pub fn resume_worker(&self, layer: usize, position: usize) -> RuntimeResult<()> {
        self.get_thread(layer, position)
            .ok_or(RuntimeError::InvalidArgument("worker index out of range"))?
            .resume()
    }

    pub fn worker_stats(&self, layer: usize, position: usize) -> Option<WorkerStatsSnapshot> {
        self.get_thread(layer, position).map(|w| w.stats())
    }

    /// Sum of `work_completed` across the lattice. Monotone.
    pub fn total_work_completed(&self) -> u64 {
        self.workers.iter().map(|w| w.work_completed()).sum()
    }

    /// Structural self-check: arena geometry, identity assignment,
    /// barrier party counts, gradient slab geometry.
    pub fn validate(&self) -> RuntimeResult<()> {
        let width = self.config.positions_per_layer;
        if self.workers.len() != self.config.worker_count() {
            return Err(RuntimeError::InvariantViolation("worker arena size"));
        }
        for (index, worker) in self.workers.iter().enumerate() {
            let id = worker.id();
            if id.index(width) != index {
                return Err(RuntimeError::InvariantViolation("worker identity mismatch"));
            }
        }
        if self.layer_barriers.len() != self.config.layers
            || self.layer_barriers.iter().any(|b| b.parties() != width)
        {
            return Err(RuntimeError::InvariantViolation("layer barrier geometry"));
        }
        if self.global_barrier.parties() != self.config.worker_count() {
            return Err(RuntimeError::InvariantViolation("global barrier geometry"));
        }
        if self.gradients.workers() != self.config.worker_count()
            || self.gradients.slice_len() != self.config.gradient_slice_len
        {
            return Err(RuntimeError::InvariantViolation("gradient slab geometry"));
        }
        Ok(())
    }
}

impl Drop for LatticePool {
    fn drop(&mut self) {
        // Free implies stop.
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradient::ReductionPolicy;
    use crate::model::CallContext;
    use latgrid_core::state::Lifecycle;

    /// Counts tokens through forward and writes ones through backward.
    struct Toy;

    impl ModelCallbacks for Toy {
        fn embedding_dim(&self) -> usize {
            8
        }
        fn num_layers(&self) -> usize {
            2
        }
        fn vocab_size(&self) -> usize {
            32
        }
        fn forward(&self, _cx: &CallContext, input: &[f64], output: &mut [f64]) -> RuntimeResult<()> {
            output.copy_from_slice(input);
            Ok(())
        }
        fn backward(
            &self,
            cx: &CallContext,
            _grad_out: &[f64],
            grad_in: &mut [f64],
        ) -> RuntimeResult<()> {
            let scale = (cx.position + 1) as f64;
            for g in grad_in.iter_mut() {
                *g = scale;
            }
            Ok(())
        }
    }

    struct BadModel;

    impl ModelCallbacks for BadModel {
        fn embedding_dim(&self) -> usize {
            0
        }
        fn num_layers(&self) -> usize {
            0
        }
        fn vocab_size(&self) -> usize {
            0
        }
        fn forward(&self, _: &CallContext, _: &[f64], _: &mut [f64]) -> RuntimeResult<()> {
            Ok(())
        }
        fn backward(&self, _: &CallContext, _: &[f64], _: &mut [f64]) -> RuntimeResult<()> {
            Ok(())
        }
    }

    fn small_config() -> PoolConfig {
        PoolConfig::new()
            .layers(2)
            .positions_per_layer(3)
            .activation_len(8)
            .gradient_slice_len(16)
            .work_queue_depth(256)
    }

    #[test]
    fn test_rejects_invalid_model() {
        assert!(matches!(
            LatticePool::new(small_config(), Arc::new(BadModel)),
            Err(RuntimeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_structure_and_addressing() {
        let pool = LatticePool::new(small_config(), Arc::new(Toy)).unwrap();
        pool.validate().unwrap();

        let worker = pool.get_thread(1, 2).unwrap();
        assert_eq!(worker.id(), LatticeId::new(1, 2));
        assert!(pool.get_thread(2, 0).is_none());
        assert!(pool.get_thread(0, 3).is_none());
        assert!(pool.get_thread(0, 0).unwrap().id().is_coordinator());

        let shared = pool.shared_region();
        assert_eq!(shared.mode(), AccessMode::LockedWrite);
        assert_eq!(shared.size(), 16 * std::mem::size_of::<f64>());
    }

    #[test]
    fn test_start_idempotent() {
        let pool = LatticePool::new(small_config(), Arc::new(Toy)).unwrap();
        pool.start().unwrap();
        pool.start().unwrap();
        pool.stop();
    }

    #[test]
    fn test_stop_twice_equals_once() {
        let pool = LatticePool::new(small_config(), Arc::new(Toy)).unwrap();
        pool.start().unwrap();
        pool.stop();
        pool.stop();
        assert!(pool.is_stopped());
        for layer in 0..2 {
            for position in 0..3 {
                assert_eq!(
                    pool.get_thread(layer, position).unwrap().lifecycle(),
                    Lifecycle::Stopped
                );
            }
        }
    }

    #[test]
    fn test_stopped_pool_not_restartable() {
        let pool = LatticePool::new(small_config(), Arc::new(Toy)).unwrap();
        pool.start().unwrap();
        pool.stop();
        assert_eq!(pool.start().unwrap_err(), RuntimeError::ShuttingDown);
    }

    #[test]
    fn test_stop_without_start_skips_join() {
        let pool = LatticePool::new(small_config(), Arc::new(Toy)).unwrap();
        pool.stop();
        assert!(pool.is_stopped());
    }

    #[test]
    fn test_submit_after_stop_rejected() {
        let pool = LatticePool::new(small_config(), Arc::new(Toy)).unwrap();
        pool.start().unwrap();
        pool.stop();
        assert_eq!(
            pool.submit(0, 0, WorkItem::new(WorkKind::Forward, 0, 0))
                .unwrap_err(),
            RuntimeError::ShuttingDown
        );
    }

    #[test]
    fn test_one_training_step_end_to_end() {
        // 2x3 lattice: forward both layers, backward both layers, global
        // sync, reduce. Worker (l, p) writes p+1 into its slice, so each
        // column of the slab carries {1,2,3} twice and the average over
        // the six workers is 2.0.
        let pool = LatticePool::new(small_config(), Arc::new(Toy)).unwrap();
        pool.start().unwrap();
        pool.gradients().zero_all();

        for layer in 0..2 {
            for position in 0..3 {
                pool.submit(
                    layer,
                    position,
                    WorkItem::new(WorkKind::Forward, position as u32, 0),
                )
                .unwrap();
            }
            pool.sync_layer(layer).unwrap();
        }

        for layer in (0..2).rev() {
            for position in 0..3 {
                pool.submit(
                    layer,
                    position,
                    WorkItem::new(WorkKind::Backward, position as u32, 1),
                )
                .unwrap();
            }
            pool.sync_layer(layer).unwrap();
        }

        pool.sync_all().unwrap();
        pool.gradients().reduce();
        let accum = pool.gradients().accumulated();
        assert!(accum.iter().all(|&v| (v - 2.0).abs() < 1e-12));

        let completed = pool.total_work_completed();
        // 12 compute items plus 12 layer syncs plus 6 global syncs.
        assert_eq!(completed, 30);
        pool.stop();
    }

    #[test]
    fn test_calibration_lattice_clean_shutdown() {
        // The full 96-worker topology with 100 queued items per worker:
        // stop then drop must join every thread and discard leftovers.
        let config = PoolConfig::default()
            .activation_len(8)
            .gradient_slice_len(8)
            .reduction_policy(ReductionPolicy::Average);
        let pool = LatticePool::new(config, Arc::new(Toy)).unwrap();
        pool.start().unwrap();

        for layer in 0..8 {
            for position in 0..12 {
                for _ in 0..100 {
                    // Optimize items only touch the worker's own slice.
                    let _ = pool.submit(layer, position, WorkItem::new(WorkKind::Optimize, 0, 0));
                }
            }
        }

        pool.stop();
        for layer in 0..8 {
            for position in 0..12 {
                assert_eq!(
                    pool.get_thread(layer, position).unwrap().lifecycle(),
                    Lifecycle::Stopped
                );
            }
        }
    }

    #[test]
    fn test_work_completed_monotone_under_load() {
        let pool = LatticePool::new(small_config(), Arc::new(Toy)).unwrap();
        pool.start().unwrap();

        let mut last = 0;
        for round in 0..5 {
            for position in 0..3 {
                pool.submit(0, position, WorkItem::new(WorkKind::Forward, round, 0))
                    .unwrap();
            }
            pool.sync_layer(0).unwrap();
            let now = pool.total_work_completed();
            assert!(now >= last);
            last = now;
        }
        pool.stop();
    }
}
