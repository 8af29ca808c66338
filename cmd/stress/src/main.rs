//! Full-lattice shutdown stress
//!
//! The calibration topology (8 layers x 12 positions = 96 workers) with
//! 100 items queued per worker, then stop and free. The point is a
//! bounded, hang-free join with leftovers discarded.

use latgrid::{
    CallContext, LatticePool, ModelCallbacks, PoolConfig, RuntimeResult, WorkItem, WorkKind,
};

use std::sync::Arc;
use std::time::Instant;

struct NullModel;

impl ModelCallbacks for NullModel {
    fn embedding_dim(&self) -> usize {
        8
    }
    fn num_layers(&self) -> usize {
        8
    }
    fn vocab_size(&self) -> usize {
        64
    }
    fn forward(&self, _cx: &CallContext, input: &[f64], output: &mut [f64]) -> RuntimeResult<()> {
        output.copy_from_slice(input);
        Ok(())
    }
    fn backward(
        &self,
        _cx: &CallContext,
        _grad_out: &[f64],
        grad_in: &mut [f64],
    ) -> RuntimeResult<()> {
        for g in grad_in.iter_mut() {
            *g += 1.0;
        }
        Ok(())
    }
}

fn main() {
    let config = PoolConfig::default().activation_len(8).gradient_slice_len(64);
    let layers = config.layers;
    let width = config.positions_per_layer;

    let pool = LatticePool::new(config, Arc::new(NullModel)).expect("pool construction");
    pool.validate().expect("structural validation");
    pool.start().expect("pool start");

    for layer in 0..layers {
        for position in 0..width {
            for i in 0..100 {
                pool.submit(layer, position, WorkItem::new(WorkKind::Forward, i, 0))
                    .expect("submit");
            }
        }
    }

    let begin = Instant::now();
    pool.stop();
    let joined_in = begin.elapsed();

    println!(
        "stress: {} workers stopped and joined in {:?}, {} items completed",
        layers * width,
        joined_in,
        pool.total_work_completed()
    );
}
