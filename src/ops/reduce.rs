use crate::autograd::{grad_enabled, GradFn};
use crate::{RawTensor, Tensor};

/// Reduction operations: reduce tensor to scalar
///
/// These operations collapse all dimensions and require special gradient handling
/// since the output shape differs from the input.
#[derive(Clone, Copy)]
pub enum ReduceOp {
    Sum,  // Σ(x) - gradient broadcasts ones
    Mean, // mean(x) - gradient broadcasts 1/n
}

/// Gradient function for Sum reduction
///
/// Sum reduction collapses to scalar, so gradient broadcasts back to original shape.
pub struct SumGradFn {
    input_shape: Vec<usize>,
}

impl GradFn for SumGradFn {
    fn backward(&self, out_grad: &RawTensor, _parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let size: usize = self.input_shape.iter().product();
        let grad_val: f32 = out_grad.data[0];
        vec![Some(RawTensor::new(
            vec![grad_val; size],
            &self.input_shape,
            false,
        ))]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(SumGradFn {
            input_shape: self.input_shape.clone(),
        })
    }
}

/// Gradient function for Mean reduction
///
/// Each element gets gradient / `num_elements`.
pub struct MeanGradFn {
    input_shape: Vec<usize>,
}

impl GradFn for MeanGradFn {
    fn backward(&self, out_grad: &RawTensor, _parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let size: usize = self.input_shape.iter().product();
        let grad_val = out_grad.data[0] / (size as f32);
        vec![Some(RawTensor::new(
            vec![grad_val; size],
            &self.input_shape,
            false,
        ))]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(MeanGradFn {
            input_shape: self.input_shape.clone(),
        })
    }
}

// ===== REDUCE OPERATIONS =====

impl RawTensor {
    /// Apply a reduction operation that collapses the tensor to a scalar
    pub fn reduce_op(t: &Tensor, op: ReduceOp) -> Tensor {
        let (data, shape, req) = {
            let s = t.borrow();
            (s.data.clone(), s.shape.clone(), s.requires_grad)
        };
        let req = req && grad_enabled();

        let n = data.len() as f32;
        let value = match op {
            ReduceOp::Sum => data.iter().sum::<f32>(),
            ReduceOp::Mean => data.iter().sum::<f32>() / n,
        };

        let out = Self::new(vec![value], &[1], req);

        if req {
            out.borrow_mut().parents = vec![t.clone()];
            out.borrow_mut().grad_fn = match op {
                ReduceOp::Sum => Some(Box::new(SumGradFn { input_shape: shape })),
                ReduceOp::Mean => Some(Box::new(MeanGradFn { input_shape: shape })),
            };
        }
        out
    }

    pub fn sum(t: &Tensor) -> Tensor {
        Self::reduce_op(t, ReduceOp::Sum)
    }

    pub fn mean(t: &Tensor) -> Tensor {
        Self::reduce_op(t, ReduceOp::Mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorOps;

    #[test]
    fn test_sum_and_mean_values() {
        let x = RawTensor::new(vec![1.0, 2.0, 3.0, 6.0], &[4], false);
        assert_eq!(x.sum().item(), 12.0);
        assert_eq!(x.mean().item(), 3.0);
    }

    #[test]
    fn test_mean_gradient_is_uniform() {
        let x = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0], &[2, 2], true);
        x.mean().backward();
        assert_eq!(x.grad().unwrap(), vec![0.25; 4]);
    }
}
