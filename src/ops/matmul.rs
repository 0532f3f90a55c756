use crate::autograd::{grad_enabled, GradFn};
use crate::{RawTensor, Tensor};

// ===== MATRIX MULTIPLICATION =====

impl RawTensor {
    /// Transpose a 2D matrix
    ///
    /// For shape [m, n], produces shape [n, m]
    fn transpose_2d(data: &[f32], shape: &[usize]) -> Vec<f32> {
        assert_eq!(shape.len(), 2, "Transpose expects 2D shape");
        let (m, n) = (shape[0], shape[1]);
        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                result[j * m + i] = data[i * n + j];
            }
        }
        result
    }

    /// Raw matrix multiplication: (m,k) @ (k,n) -> (m,n)
    ///
    /// Naive O(mnk); the light-estimator head is the only matmul consumer and
    /// its matrices are small.
    pub fn matmul_raw(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0;
                for p in 0..k {
                    sum += a[i * k + p] * b[p * n + j];
                }
                result[i * n + j] = sum;
            }
        }
        result
    }

    /// 2D matrix multiplication: (m,n) @ (n,p) -> (m,p)
    ///
    /// # Panics
    /// Panics on non-2D inputs or inner-dimension mismatch.
    pub fn matmul(self_t: &Tensor, other: &Tensor) -> Tensor {
        let (data_a, shape_a, req_a) = {
            let s = self_t.borrow();
            (s.data.clone(), s.shape.clone(), s.requires_grad)
        };
        let (data_b, shape_b, req_b) = {
            let o = other.borrow();
            (o.data.clone(), o.shape.clone(), o.requires_grad)
        };

        assert!(
            shape_a.len() == 2 && shape_b.len() == 2,
            "Matmul not supported for shapes: {shape_a:?} @ {shape_b:?}"
        );

        let (m, n) = (shape_a[0], shape_a[1]);
        let (n2, p) = (shape_b[0], shape_b[1]);
        assert_eq!(n, n2, "Matmul dimension mismatch: ({m},{n}) @ ({n2},{p})");

        let requires_grad = (req_a || req_b) && grad_enabled();
        let result_data = Self::matmul_raw(&data_a, &data_b, m, n, p);
        let out = Self::new(result_data, &[m, p], requires_grad);

        if requires_grad {
            out.borrow_mut().parents = vec![self_t.clone(), other.clone()];
            out.borrow_mut().grad_fn = Some(Box::new(MatMulGradFn));
        }
        out
    }
}

/// Gradient function for matrix multiplication
///
/// For z = x @ y:
/// - ∂L/∂x = ∂L/∂z @ y^T
/// - ∂L/∂y = x^T @ ∂L/∂z
pub struct MatMulGradFn;

impl GradFn for MatMulGradFn {
    fn backward(&self, out_grad: &RawTensor, parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let x = parents[0].borrow();
        let y = parents[1].borrow();

        let grad_x = if x.requires_grad {
            let y_t = RawTensor::transpose_2d(&y.data, &y.shape);
            let grad_data = RawTensor::matmul_raw(
                &out_grad.data,
                &y_t,
                out_grad.shape[0],
                out_grad.shape[1],
                y.shape[0],
            );
            Some(RawTensor::new(grad_data, &x.shape, false))
        } else {
            None
        };

        let grad_y = if y.requires_grad {
            let x_t = RawTensor::transpose_2d(&x.data, &x.shape);
            let grad_data = RawTensor::matmul_raw(
                &x_t,
                &out_grad.data,
                x.shape[1],
                x.shape[0],
                out_grad.shape[1],
            );
            Some(RawTensor::new(grad_data, &y.shape, false))
        } else {
            None
        };

        vec![grad_x, grad_y]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(MatMulGradFn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorOps;

    #[test]
    fn test_matmul_2x2() {
        let a = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0], &[2, 2], false);
        let b = RawTensor::new(vec![5.0, 6.0, 7.0, 8.0], &[2, 2], false);
        let c = a.matmul(&b);
        assert_eq!(c.borrow().data, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_gradients() {
        let x = RawTensor::new(vec![0.5, -1.0, 2.0, 0.1, 0.7, -0.3], &[2, 3], true);
        let passed = RawTensor::check_gradients_simple(&x, |t| {
            let w = RawTensor::new(vec![1.0, 0.5, -0.5, 2.0, 0.3, -1.0], &[3, 2], false);
            t.matmul(&w).sum()
        });
        assert!(passed);
    }
}
