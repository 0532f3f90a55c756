use crate::io::{StateDict, TensorData};
use crate::nn::Module;
use crate::tensor::{RawTensor, Tensor, TensorOps};

/// Fully-connected (dense/linear) layer
///
/// Computes: y = xW + b
/// where x is (batch, in_features), W is (in_features, out_features), b is (out_features)
pub struct Linear {
    pub weight: Tensor,
    pub bias: Option<Tensor>,
}

impl Linear {
    /// Create a new linear layer with Xavier-uniform initialization.
    pub fn new(in_features: usize, out_features: usize, use_bias: bool) -> Self {
        let w = RawTensor::xavier_uniform(&[in_features, out_features]);
        w.borrow_mut().requires_grad = true;
        let b = if use_bias {
            let b = RawTensor::zeros(&[out_features]);
            b.borrow_mut().requires_grad = true;
            Some(b)
        } else {
            None
        };
        Linear { weight: w, bias: b }
    }
}

impl Module for Linear {
    fn forward(&self, x: &Tensor) -> Tensor {
        let out = x.matmul(&self.weight);
        if let Some(b) = &self.bias {
            out.add(b)
        } else {
            out
        }
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = vec![self.weight.clone()];
        if let Some(ref bias) = self.bias {
            params.push(bias.clone())
        }
        params
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        state.insert("weight".to_string(), TensorData::from_tensor(&self.weight));
        if let Some(ref b) = self.bias {
            state.insert("bias".to_string(), TensorData::from_tensor(b));
        }
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        if let Some(w) = state.get("weight") {
            let mut t = self.weight.borrow_mut();
            t.data = w.data.clone();
            t.shape = w.shape.clone();
        }
        if let (Some(b), Some(bias_tensor)) = (state.get("bias"), self.bias.as_ref()) {
            let mut t = bias_tensor.borrow_mut();
            t.data = b.data.clone();
            t.shape = b.shape.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_forward_shape() {
        let layer = Linear::new(4, 2, true);
        let x = RawTensor::randn(&[3, 4]);
        let y = layer.forward(&x);
        assert_eq!(y.borrow().shape, vec![3, 2]);
    }

    #[test]
    fn test_linear_known_values() {
        let layer = Linear::new(2, 1, true);
        layer.weight.borrow_mut().data = vec![2.0, 3.0];
        layer.bias.as_ref().unwrap().borrow_mut().data = vec![1.0];
        let x = RawTensor::new(vec![1.0, 1.0], &[1, 2], false);
        let y = layer.forward(&x);
        assert_eq!(y.borrow().data, vec![6.0]);
    }
}
