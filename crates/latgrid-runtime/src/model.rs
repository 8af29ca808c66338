//! Model callback seam
//!
//! The runtime never interprets numerical buffers; it routes slices to
//! caller-supplied callbacks bound at pool construction. The trait plays
//! the role of a function-pointer table: `forward`/`backward` are
//! required, the rest default to no-ops, and the three dimension fields
//! are read once and validated up front.

use latgrid_core::error::RuntimeResult;

/// Indices the runtime exposes to every callback invocation. The runtime
/// does not interpret them; distance-style metrics are the callbacks'
/// business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub layer: u16,
    pub position: u16,
    pub token_id: u32,
    pub target_id: u32,
}

/// Numerical callbacks, opaque to the runtime.
///
/// `forward` reads the staged input and fills the worker's activation
/// buffer; `backward` reads the activation buffer as upstream gradient
/// and writes into the worker's gradient slice. Both run on the worker's
/// own OS thread.
pub trait ModelCallbacks: Send + Sync {
    fn embedding_dim(&self) -> usize;
    fn num_layers(&self) -> usize;
    fn vocab_size(&self) -> usize;

    fn forward(&self, cx: &CallContext, input: &[f64], output: &mut [f64]) -> RuntimeResult<()>;

    fn backward(
        &self,
        cx: &CallContext,
        grad_out: &[f64],
        grad_in: &mut [f64],
    ) -> RuntimeResult<()>;

    /// Optional: stage the embedding for a token before `forward`.
    fn input_for(&self, token_id: u32) -> Option<Vec<f64>> {
        let _ = token_id;
        None
    }

    /// Optional: observe a worker's output after `forward`.
    fn store_output(&self, token_id: u32, output: &[f64]) {
        let _ = (token_id, output);
    }

    /// Optional: release model-side resources at pool stop.
    fn cleanup(&self) {}
}

/// True iff the table is usable: all dimension fields non-zero.
/// (The required methods exist by construction of the trait.)
pub fn validate(model: &dyn ModelCallbacks) -> bool {
    model.embedding_dim() > 0 && model.num_layers() > 0 && model.vocab_size() > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Toy {
        dim: usize,
    }

    impl ModelCallbacks for Toy {
        fn embedding_dim(&self) -> usize {
            self.dim
        }
        fn num_layers(&self) -> usize {
            2
        }
        fn vocab_size(&self) -> usize {
            16
        }
        fn forward(&self, _cx: &CallContext, input: &[f64], output: &mut [f64]) -> RuntimeResult<()> {
            for (o, i) in output.iter_mut().zip(input) {
                *o = i + 1.0;
            }
            Ok(())
        }
        fn backward(
            &self,
            _cx: &CallContext,
            grad_out: &[f64],
            grad_in: &mut [f64],
        ) -> RuntimeResult<()> {
            for (g, u) in grad_in.iter_mut().zip(grad_out) {
                *g += u;
            }
            Ok(())
        }
    }

    #[test]
    fn test_validate() {
        assert!(validate(&Toy { dim: 8 }));
        assert!(!validate(&Toy { dim: 0 }));
    }

    #[test]
    fn test_default_hooks_are_noops() {
        let toy = Toy { dim: 4 };
        assert!(toy.input_for(3).is_none());
        toy.store_output(3, &[1.0]);
        toy.cleanup();
    }

    #[test]
    fn test_forward_backward_route_buffers() {
        let toy = Toy { dim: 4 };
        let cx = CallContext {
            layer: 0,
            position: 1,
            token_id: 5,
            target_id: 0,
        };
        let input = [1.0, 2.0];
        let mut output = [0.0, 0.0];
        toy.forward(&cx, &input, &mut output).unwrap();
        assert_eq!(output, [2.0, 3.0]);

        let mut grad = [0.5, 0.5];
        toy.backward(&cx, &output, &mut grad).unwrap();
        assert_eq!(grad, [2.5, 3.5]);
    }
}
