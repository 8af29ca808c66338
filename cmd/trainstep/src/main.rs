//! One training step on a small lattice
//!
//! A toy model (scaled identity forward, position-scaled backward) runs
//! three full steps on a 2x3 lattice and prints the reduced gradient.

use latgrid::{
    CallContext, ModelCallbacks, PoolConfig, ReductionPolicy, RuntimeResult, StepDriver,
};

use std::sync::Arc;

struct ToyModel;

impl ModelCallbacks for ToyModel {
    fn embedding_dim(&self) -> usize {
        8
    }
    fn num_layers(&self) -> usize {
        2
    }
    fn vocab_size(&self) -> usize {
        64
    }

    fn forward(&self, cx: &CallContext, input: &[f64], output: &mut [f64]) -> RuntimeResult<()> {
        let scale = 1.0 + cx.layer as f64 * 0.5;
        for (o, i) in output.iter_mut().zip(input) {
            *o = i * scale;
        }
        Ok(())
    }

    fn backward(
        &self,
        cx: &CallContext,
        _grad_out: &[f64],
        grad_in: &mut [f64],
    ) -> RuntimeResult<()> {
        for g in grad_in.iter_mut() {
            *g = (cx.position + 1) as f64;
        }
        Ok(())
    }

    fn input_for(&self, token_id: u32) -> Option<Vec<f64>> {
        Some(vec![token_id as f64 / 64.0; 8])
    }
}

fn main() {
    let config = PoolConfig::new()
        .layers(2)
        .positions_per_layer(3)
        .activation_len(8)
        .gradient_slice_len(8)
        .reduction_policy(ReductionPolicy::Average)
        .with_env_overrides();

    let driver = StepDriver::new(config, Arc::new(ToyModel)).expect("pool construction");
    driver.start().expect("pool start");

    let batch = [(3u32, 4u32), (7, 8), (11, 12)];
    for step in 0..3 {
        driver
            .train_step(&batch, |gradient| {
                println!("step {}: accumulated[0..4] = {:?}", step, &gradient[..4]);
            })
            .expect("train step");
    }

    println!(
        "total work items completed: {}",
        driver.pool().total_work_completed()
    );
    driver.shutdown();
}
