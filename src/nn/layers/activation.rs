use crate::io::StateDict;
use crate::nn::Module;
use crate::tensor::{Tensor, TensorOps};

/// Rectifier used throughout the trunk, residual blocks and light
/// estimator. Stateless, so the state-dict hooks are no-ops.
pub struct ReLU;

impl Module for ReLU {
    fn forward(&self, x: &Tensor) -> Tensor {
        x.relu()
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }

    fn state_dict(&self) -> StateDict {
        StateDict::new()
    }

    fn load_state_dict(&mut self, _state: &StateDict) {}
}

/// Caps the generator heads so normal and albedo maps land in `[-1, 1]`.
pub struct Tanh;

impl Module for Tanh {
    fn forward(&self, x: &Tensor) -> Tensor {
        x.tanh()
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }

    fn state_dict(&self) -> StateDict {
        StateDict::new()
    }

    fn load_state_dict(&mut self, _state: &StateDict) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::RawTensor;

    #[test]
    fn test_activations_are_stateless() {
        assert!(ReLU.parameters().is_empty());
        assert!(Tanh.parameters().is_empty());
        assert!(ReLU.state_dict().is_empty());
        assert!(Tanh.state_dict().is_empty());
    }

    #[test]
    fn test_forward_matches_tensor_ops() {
        let x = RawTensor::new(vec![-2.0, 0.5], &[2], false);
        assert_eq!(ReLU.forward(&x).borrow().data, vec![0.0, 0.5]);
        let t = Tanh.forward(&x).borrow().data.clone();
        assert!((t[0] - (-2.0f32).tanh()).abs() < 1e-6);
        assert!((t[1] - 0.5f32.tanh()).abs() < 1e-6);
    }
}
