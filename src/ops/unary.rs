use crate::autograd::{grad_enabled, GradFn};
use crate::{RawTensor, Tensor};

/// Unary operations: single input, single output
///
/// Each operation has a corresponding derivative:
/// - Neg: d(-x)/dx = -1
/// - Abs: d|x|/dx = sign(x)
/// - Sqrt: d(√x)/dx = 1/(2√x)
/// - Exp: d(eˣ)/dx = eˣ
/// - Tanh: d(tanh(x))/dx = 1 - tanh²(x)
/// - `ReLU`: d(max(0,x))/dx = x > 0 ? 1 : 0
#[derive(Clone, Copy)]
pub enum UnaryOp {
    Neg,
    Abs,
    Sqrt,
    Exp,
    Tanh,
    ReLU,
}

/// Gradient function for unary operations
///
/// Stores which operation was performed so backward can apply the correct derivative.
pub struct UnaryGradFn {
    op: UnaryOp,
}

impl GradFn for UnaryGradFn {
    fn backward(&self, out_grad: &RawTensor, parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let x = parents
            .first()
            .map(|p| p.borrow())
            .expect("unary ops require 1 parent");

        // Apply chain rule: ∂L/∂x = ∂L/∂y · ∂y/∂x
        let grad_data: Vec<f32> = match self.op {
            UnaryOp::Neg => out_grad.data.iter().map(|&g| -g).collect(),
            UnaryOp::Abs => out_grad
                .data
                .iter()
                .zip(&x.data)
                .map(|(&g, &x)| if x >= 0.0 { g } else { -g })
                .collect(),
            UnaryOp::Sqrt => out_grad
                .data
                .iter()
                .zip(&x.data)
                .map(|(&g, &x)| g / (2.0 * x.sqrt()))
                .collect(),
            UnaryOp::Exp => out_grad
                .data
                .iter()
                .zip(&x.data)
                .map(|(&g, &x)| g * x.exp())
                .collect(),
            UnaryOp::Tanh => out_grad
                .data
                .iter()
                .zip(&x.data)
                .map(|(&g, &x)| {
                    let t = x.tanh();
                    g * t.mul_add(-t, 1.0)
                })
                .collect(),
            UnaryOp::ReLU => out_grad
                .data
                .iter()
                .zip(&x.data)
                .map(|(&g, &x)| if x > 0.0 { g } else { 0.0 })
                .collect(),
        };
        vec![Some(RawTensor::new(grad_data, &x.shape, false))]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(Self { op: self.op })
    }
}

// ===== UNARY OPERATIONS =====
impl RawTensor {
    /// Apply a unary operation element-wise
    ///
    /// This is the unified implementation for all unary ops.
    /// Creates a new tensor and sets up gradient tracking if needed.
    pub fn unary_op(t: &Tensor, op: UnaryOp) -> Tensor {
        let (data, shape, req) = {
            let s = t.borrow();
            (s.data.clone(), s.shape.clone(), s.requires_grad)
        };
        let req = req && grad_enabled();

        let result: Vec<f32> = data
            .iter()
            .map(|&x| match op {
                UnaryOp::Neg => -x,
                UnaryOp::Abs => x.abs(),
                UnaryOp::Sqrt => x.sqrt(),
                UnaryOp::Exp => x.exp(),
                UnaryOp::Tanh => x.tanh(),
                UnaryOp::ReLU => x.max(0.0),
            })
            .collect();

        let out = Self::new(result, &shape, req);

        if req {
            out.borrow_mut().parents = vec![t.clone()];
            out.borrow_mut().grad_fn = Some(Box::new(UnaryGradFn { op }));
        }
        out
    }

    // Convenience methods for each unary operation
    pub fn neg(t: &Tensor) -> Tensor {
        Self::unary_op(t, UnaryOp::Neg)
    }
    pub fn abs(t: &Tensor) -> Tensor {
        Self::unary_op(t, UnaryOp::Abs)
    }
    pub fn sqrt(t: &Tensor) -> Tensor {
        Self::unary_op(t, UnaryOp::Sqrt)
    }
    pub fn exp(t: &Tensor) -> Tensor {
        Self::unary_op(t, UnaryOp::Exp)
    }
    pub fn tanh(t: &Tensor) -> Tensor {
        Self::unary_op(t, UnaryOp::Tanh)
    }
    pub fn relu(t: &Tensor) -> Tensor {
        Self::unary_op(t, UnaryOp::ReLU)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorOps;

    #[test]
    fn test_abs_values() {
        let x = RawTensor::new(vec![-2.0, 0.0, 3.0], &[3], false);
        let y = x.abs();
        assert_eq!(y.borrow().data, vec![2.0, 0.0, 3.0]);
    }

    #[test]
    fn test_neg_flips_sign_and_gradient() {
        let x = RawTensor::new(vec![-2.0, 3.0], &[2], true);
        let y = x.neg();
        assert_eq!(y.borrow().data, vec![2.0, -3.0]);
        y.sum().backward();
        assert_eq!(x.grad().unwrap(), vec![-1.0, -1.0]);
    }

    #[test]
    fn test_abs_gradient_sign() {
        let x = RawTensor::new(vec![-2.0, 3.0], &[2], true);
        let y = x.abs().sum();
        y.backward();
        assert_eq!(x.grad().unwrap(), vec![-1.0, 1.0]);
    }

    #[test]
    fn test_tanh_gradient() {
        let x = RawTensor::new(vec![-1.0, 0.3, 0.9], &[3], true);
        let passed = RawTensor::check_gradients_simple(&x, |t| t.tanh().sum());
        assert!(passed);
    }

    #[test]
    fn test_exp_and_sqrt_gradients() {
        let x = RawTensor::new(vec![0.5, 1.0, 2.0], &[3], true);
        assert!(RawTensor::check_gradients_simple(&x, |t| t.exp().sum()));
        let y = RawTensor::new(vec![0.5, 1.0, 4.0], &[3], true);
        assert!(RawTensor::check_gradients_simple(&y, |t| t.sqrt().sum()));
    }

    #[test]
    fn test_relu_zeroes_negatives() {
        let x = RawTensor::new(vec![-1.0, 2.0], &[2], true);
        let y = x.relu();
        assert_eq!(y.borrow().data, vec![0.0, 2.0]);
        y.sum().backward();
        assert_eq!(x.grad().unwrap(), vec![0.0, 1.0]);
    }
}
