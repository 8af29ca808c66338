//! # latgrid - Lattice Grid Runtime
//!
//! A hierarchical concurrent execution runtime that dispatches pipelined
//! numerical work (neural-network training over token embeddings) across
//! a fixed `L x W` lattice of worker threads.
//!
//! ## Features
//!
//! - **Lattice pool**: `L x W` workers with stable `(layer, position)`
//!   identities, reusable layer barriers and one global barrier
//! - **Message fabric**: fixed-pool allocation, lock-free MPMC queues,
//!   4-level priority fan-in, bidirectional channels
//! - **Shared regions**: read-only, copy-on-write and locked-write
//!   disciplines with versioning and invalidation listeners
//! - **Gradient accumulation**: disjoint per-worker slices, lock-free
//!   write path, average/sum/clipped reduction between steps
//! - **Model seam**: opaque forward/backward callbacks bound at pool
//!   construction
//!
//! ## Quick start
//!
//! ```ignore
//! use latgrid::{PoolConfig, StepDriver};
//! use std::sync::Arc;
//!
//! let config = PoolConfig::new().layers(2).positions_per_layer(4);
//! let driver = StepDriver::new(config, Arc::new(my_model))?;
//! driver.start()?;
//!
//! for batch in batches {
//!     driver.train_step(&batch, |gradient| optimizer.apply(gradient))?;
//! }
//!
//! driver.shutdown();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Driver                               │
//! │        submit items, observe barriers, reduce, apply        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     LatticePool (L x W)                     │
//! │     layer barriers ── global barrier ── gradient slab       │
//! └─────────────────────────────────────────────────────────────┘
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │  Worker   │ ──── │  Worker   │ ──── │  Worker   │
//!    │  L0.P0    │      │  L0.P1    │      │  L1.P0    │
//!    └───────────┘      └───────────┘      └───────────┘
//!          channels + shared regions between neighbors
//! ```

// Re-export core types
pub use latgrid_core::{
    AccessMode, Channel, LatticeId, Lifecycle, Message, MessageKind, MessagePool, MessageSystem,
    Priority, RegionStats, Role, RuntimeError, RuntimeResult, SharedRegion, SystemStats, WorkItem,
    WorkKind, WorkerStatsSnapshot,
};

// Re-export logging macros and helpers
pub use latgrid_core::logmsg::{init as init_logging, set_level as set_log_level, LogLevel};
pub use latgrid_core::{env_get, env_get_bool, env_get_opt, monotonic_ns};
pub use latgrid_core::{lg_debug, lg_error, lg_info, lg_trace, lg_warn};

// Re-export runtime types
pub use latgrid_runtime::{
    CallContext, GradientAccumulator, LatticePool, ModelCallbacks, PoolConfig, ReductionPolicy,
    StepBarrier, Worker,
};

use std::sync::Arc;

/// Convenience driver for the canonical step cycle: forward layer by
/// layer, backward in reverse, global sync, reduce, apply.
///
/// The pool underneath stays fully accessible for callers that need a
/// different phase structure.
pub struct StepDriver {
    pool: LatticePool,
}

impl StepDriver {
    /// Build the lattice; spawns nothing until [`start`](Self::start).
    pub fn new(config: PoolConfig, model: Arc<dyn ModelCallbacks>) -> RuntimeResult<Self> {
        Ok(Self {
            pool: LatticePool::new(config, model)?,
        })
    }

    pub fn start(&self) -> RuntimeResult<()> {
        self.pool.start()
    }

    #[inline]
    pub fn pool(&self) -> &LatticePool {
        &self.pool
    }

    /// Run one full training step over `(token, target)` pairs, fanning
    /// tokens round-robin across each layer's positions, then hand the
    /// reduced gradient to `apply_update`.
    pub fn train_step<F>(&self, tokens: &[(u32, u32)], apply_update: F) -> RuntimeResult<()>
    where
        F: FnOnce(&[f64]),
    {
        let config = self.pool.config();
        let width = config.positions_per_layer;

        // Zero-at-start: stale slices from non-participants never leak
        // into the reduction.
        self.pool.gradients().zero_all();

        for layer in 0..config.layers {
            for (i, &(token, target)) in tokens.iter().enumerate() {
                self.pool
                    .submit(layer, i % width, WorkItem::new(WorkKind::Forward, token, target))?;
            }
            self.pool.sync_layer(layer)?;
        }

        for layer in (0..config.layers).rev() {
            for (i, &(token, target)) in tokens.iter().enumerate() {
                self.pool
                    .submit(layer, i % width, WorkItem::new(WorkKind::Backward, token, target))?;
            }
            self.pool.sync_layer(layer)?;
        }

        self.pool.sync_all()?;
        self.pool.gradients().reduce();
        apply_update(self.pool.gradients().accumulated());
        Ok(())
    }

    /// Stop and join every worker. Implied by drop.
    pub fn shutdown(&self) {
        self.pool.stop();
    }
}
