//! Lattice pool configuration

use crate::gradient::ReductionPolicy;
use latgrid_core::env::env_get_opt;

/// Hard cap on lattice dimensions; generous for any realistic topology.
pub const MAX_LAYERS: usize = 256;
pub const MAX_POSITIONS: usize = 1024;

/// Configuration for [`LatticePool`](crate::lattice::LatticePool)
/// construction. All counts are fixed for the pool's lifetime.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// `L`, number of pipeline layers
    pub layers: usize,

    /// `W`, workers per layer
    pub positions_per_layer: usize,

    /// Per-worker activation buffer length in `f64` elements
    pub activation_len: usize,

    /// `S`, per-worker gradient slice length in `f64` elements
    pub gradient_slice_len: usize,

    /// Preallocated message pool capacity
    pub message_pool_size: usize,

    /// Channel table capacity
    pub max_channels: usize,

    /// Per-worker work queue depth
    pub work_queue_depth: usize,

    /// Cap on lazily-created neighbor boundary regions per worker
    pub max_neighbors: usize,

    /// How gradient slices combine between steps
    pub reduction_policy: ReductionPolicy,

    /// Placement hint only: pin workers round-robin to CPUs where the
    /// platform supports it
    pub numa_hint: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        // The calibration topology: 8 layers of 12 workers.
        Self {
            layers: 8,
            positions_per_layer: 12,
            activation_len: 256,
            gradient_slice_len: 1024,
            message_pool_size: 1024,
            max_channels: 256,
            work_queue_depth: 1024,
            max_neighbors: 4,
            reduction_policy: ReductionPolicy::Average,
            numa_hint: false,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layers(mut self, n: usize) -> Self {
        self.layers = n;
        self
    }

    pub fn positions_per_layer(mut self, n: usize) -> Self {
        self.positions_per_layer = n;
        self
    }

    pub fn activation_len(mut self, n: usize) -> Self {
        self.activation_len = n;
        self
    }

    pub fn gradient_slice_len(mut self, n: usize) -> Self {
        self.gradient_slice_len = n;
        self
    }

    pub fn message_pool_size(mut self, n: usize) -> Self {
        self.message_pool_size = n;
        self
    }

    pub fn max_channels(mut self, n: usize) -> Self {
        self.max_channels = n;
        self
    }

    pub fn work_queue_depth(mut self, n: usize) -> Self {
        self.work_queue_depth = n;
        self
    }

    pub fn max_neighbors(mut self, n: usize) -> Self {
        self.max_neighbors = n;
        self
    }

    pub fn reduction_policy(mut self, policy: ReductionPolicy) -> Self {
        self.reduction_policy = policy;
        self
    }

    pub fn numa_hint(mut self, enable: bool) -> Self {
        self.numa_hint = enable;
        self
    }

    /// Apply the optional `LG_REDUCTION` override
    /// (`average`, `sum`, `clip:<max_norm>`).
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(raw) = env_get_opt::<String>("LG_REDUCTION") {
            if let Some(policy) = ReductionPolicy::parse(&raw) {
                self.reduction_policy = policy;
            }
        }
        self
    }

    /// Total worker count `P = L * W`.
    #[inline]
    pub fn worker_count(&self) -> usize {
        self.layers * self.positions_per_layer
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.layers == 0 {
            return Err("layers must be at least 1");
        }
        if self.layers > MAX_LAYERS {
            return Err("layers exceeds maximum");
        }
        if self.positions_per_layer == 0 {
            return Err("positions_per_layer must be at least 1");
        }
        if self.positions_per_layer > MAX_POSITIONS {
            return Err("positions_per_layer exceeds maximum");
        }
        if self.activation_len == 0 {
            return Err("activation_len must be at least 1");
        }
        if self.gradient_slice_len == 0 {
            return Err("gradient_slice_len must be at least 1");
        }
        if self.message_pool_size == 0 {
            return Err("message_pool_size must be at least 1");
        }
        if self.max_channels == 0 {
            return Err("max_channels must be at least 1");
        }
        if self.work_queue_depth == 0 {
            return Err("work_queue_depth must be at least 1");
        }
        if let ReductionPolicy::ClippedAverage(norm) = self.reduction_policy {
            if !(norm > 0.0) {
                return Err("clip norm must be positive");
            }
        }
        Ok(())
    }
}
