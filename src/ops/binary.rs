use crate::autograd::{grad_enabled, GradFn};
use crate::{RawTensor, Tensor};

/// Binary operations: two inputs, one output
///
/// Broadcasting is automatically handled for compatible shapes.
#[derive(Clone, Copy)]
pub enum BinaryOp {
    Add, // x + y
    Sub, // x - y
    Mul, // x * y (element-wise)
    Div, // x / y (element-wise)
}

/// Gradient function for binary operations
///
/// Handles broadcasting during backward pass - gradients must be summed
/// over dimensions that were broadcast in the forward pass.
pub struct BinaryGradFn {
    op: BinaryOp,
}

impl GradFn for BinaryGradFn {
    fn backward(&self, out_grad: &RawTensor, parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let x_ref = parents.first().cloned().unwrap();
        let y_ref = parents.get(1).cloned().unwrap();
        let x_val = x_ref.borrow();
        let y_val = y_ref.borrow();

        let (grad_x, grad_y) = match self.op {
            BinaryOp::Add => {
                // ∂(x+y)/∂x = 1, ∂(x+y)/∂y = 1
                // But must sum over broadcast dimensions
                let gx = if x_val.requires_grad {
                    let summed = RawTensor::sum_over_broadcast_dims(
                        &out_grad.data,
                        &out_grad.shape,
                        &x_val.shape,
                    );
                    Some(RawTensor::new(summed, &x_val.shape, false))
                } else {
                    None
                };
                let gy = if y_val.requires_grad {
                    let summed = RawTensor::sum_over_broadcast_dims(
                        &out_grad.data,
                        &out_grad.shape,
                        &y_val.shape,
                    );
                    Some(RawTensor::new(summed, &y_val.shape, false))
                } else {
                    None
                };
                (gx, gy)
            }
            BinaryOp::Sub => {
                // ∂(x-y)/∂x = 1, ∂(x-y)/∂y = -1
                let gx = if x_val.requires_grad {
                    let summed = RawTensor::sum_over_broadcast_dims(
                        &out_grad.data,
                        &out_grad.shape,
                        &x_val.shape,
                    );
                    Some(RawTensor::new(summed, &x_val.shape, false))
                } else {
                    None
                };
                let gy = if y_val.requires_grad {
                    let neg_grad: Vec<f32> = out_grad.data.iter().map(|&g| -g).collect();
                    let summed = RawTensor::sum_over_broadcast_dims(
                        &neg_grad,
                        &out_grad.shape,
                        &y_val.shape,
                    );
                    Some(RawTensor::new(summed, &y_val.shape, false))
                } else {
                    None
                };
                (gx, gy)
            }
            BinaryOp::Mul => {
                // ∂(x*y)/∂x = y, ∂(x*y)/∂y = x
                let gx = if x_val.requires_grad {
                    let y_bc = RawTensor::broadcast_to(&y_val.data, &y_val.shape, &out_grad.shape);
                    let grad: Vec<f32> = out_grad
                        .data
                        .iter()
                        .zip(&y_bc)
                        .map(|(&g, &y)| g * y)
                        .collect();
                    let summed =
                        RawTensor::sum_over_broadcast_dims(&grad, &out_grad.shape, &x_val.shape);
                    Some(RawTensor::new(summed, &x_val.shape, false))
                } else {
                    None
                };
                let gy = if y_val.requires_grad {
                    let x_bc = RawTensor::broadcast_to(&x_val.data, &x_val.shape, &out_grad.shape);
                    let grad: Vec<f32> = out_grad
                        .data
                        .iter()
                        .zip(&x_bc)
                        .map(|(&g, &x)| g * x)
                        .collect();
                    let summed =
                        RawTensor::sum_over_broadcast_dims(&grad, &out_grad.shape, &y_val.shape);
                    Some(RawTensor::new(summed, &y_val.shape, false))
                } else {
                    None
                };
                (gx, gy)
            }
            BinaryOp::Div => {
                // ∂(x/y)/∂x = 1/y, ∂(x/y)/∂y = -x/y²
                let gx = if x_val.requires_grad {
                    let y_bc = RawTensor::broadcast_to(&y_val.data, &y_val.shape, &out_grad.shape);
                    let grad: Vec<f32> = out_grad
                        .data
                        .iter()
                        .zip(&y_bc)
                        .map(|(&g, &y)| g / y)
                        .collect();
                    let summed =
                        RawTensor::sum_over_broadcast_dims(&grad, &out_grad.shape, &x_val.shape);
                    Some(RawTensor::new(summed, &x_val.shape, false))
                } else {
                    None
                };
                let gy = if y_val.requires_grad {
                    let x_bc = RawTensor::broadcast_to(&x_val.data, &x_val.shape, &out_grad.shape);
                    let y_bc = RawTensor::broadcast_to(&y_val.data, &y_val.shape, &out_grad.shape);
                    let grad: Vec<f32> = out_grad
                        .data
                        .iter()
                        .zip(&x_bc)
                        .zip(&y_bc)
                        .map(|((&g, &x), &y)| -g * x / (y * y))
                        .collect();
                    let summed =
                        RawTensor::sum_over_broadcast_dims(&grad, &out_grad.shape, &y_val.shape);
                    Some(RawTensor::new(summed, &y_val.shape, false))
                } else {
                    None
                };
                (gx, gy)
            }
        };

        vec![grad_x, grad_y]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(BinaryGradFn { op: self.op })
    }
}

// ===== BINARY OPERATIONS =====
impl RawTensor {
    /// Compute broadcast shape following `NumPy` broadcasting rules
    ///
    /// Rules:
    /// 1. Align shapes from the right (trailing dimensions)
    /// 2. For each dimension, both must be equal OR one must be 1
    /// 3. Output dimension is the maximum of the two
    ///
    /// # Panics
    /// broadcast failures
    #[must_use]
    pub fn broadcast_shape(shape_a: &[usize], shape_b: &[usize]) -> Vec<usize> {
        let max_len = shape_a.len().max(shape_b.len());
        let mut result = vec![1; max_len];

        // Align from right (trailing dimensions)
        for i in 0..max_len {
            let a_dim = if i < shape_a.len() {
                shape_a[shape_a.len() - 1 - i]
            } else {
                1
            };
            let b_dim = if i < shape_b.len() {
                shape_b[shape_b.len() - 1 - i]
            } else {
                1
            };

            let slot = &mut result[max_len - 1 - i];
            if a_dim == b_dim {
                *slot = a_dim;
            } else if a_dim == 1 {
                *slot = b_dim;
            } else if b_dim == 1 {
                *slot = a_dim;
            } else {
                panic!("Cannot broadcast shapes {shape_a:?} and {shape_b:?} at dimension {i}");
            }
        }
        result
    }

    /// Broadcast data from one shape to another
    ///
    /// This repeats values along dimensions where `from_shape` is 1
    /// and `to_shape` is larger.
    pub(crate) fn broadcast_to(data: &[f32], from_shape: &[usize], to_shape: &[usize]) -> Vec<f32> {
        if from_shape == to_shape {
            return data.to_vec();
        }

        let to_size: usize = to_shape.iter().product();
        let mut result = vec![0.0; to_size];

        // Pad from_shape with leading 1s to match rank
        let mut padded_from = vec![1; to_shape.len()];
        let offset = to_shape.len() - from_shape.len();
        padded_from[offset..].copy_from_slice(from_shape);

        let from_strides_padded = Self::compute_strides(&padded_from);
        let to_strides = Self::compute_strides(to_shape);

        // For each output position, compute corresponding input position
        #[allow(clippy::needless_range_loop)]
        for i in 0..to_size {
            let mut from_idx = 0;
            let mut remainder = i;
            for dim in 0..to_shape.len() {
                let coord = remainder / to_strides[dim];
                remainder %= to_strides[dim];
                // if dim was broadcast (size 1) the source coord is 0
                if padded_from[dim] != 1 {
                    from_idx += coord * from_strides_padded[dim];
                }
            }
            result[i] = data[from_idx];
        }
        result
    }

    /// Sum gradient over dimensions that were broadcast
    ///
    /// During backward pass, if a dimension was broadcast from size 1 to size N,
    /// we need to sum the gradients over that dimension to get the gradient
    /// for the original size-1 dimension.
    pub(crate) fn sum_over_broadcast_dims(
        grad: &[f32],
        grad_shape: &[usize],
        target_shape: &[usize],
    ) -> Vec<f32> {
        if grad_shape == target_shape {
            return grad.to_vec();
        }

        // Pad target_shape with leading 1s to match ranks
        let mut padded_target = vec![1; grad_shape.len()];
        let offset = grad_shape.len() - target_shape.len();
        padded_target[offset..].copy_from_slice(target_shape);

        let mut result = vec![0.0; target_shape.iter().product()];
        let target_strides = Self::compute_strides(target_shape);
        let grad_strides = Self::compute_strides(grad_shape);

        // For each gradient element, sum into the appropriate result position
        for (i, &grad_val) in grad.iter().enumerate() {
            let mut target_idx = 0;
            let mut remainder = i;

            for dim in 0..grad_shape.len() {
                let coord = remainder / grad_strides[dim];
                remainder %= grad_strides[dim];

                // Map to target coordinate (skip if was broadcast)
                if dim >= offset && padded_target[dim] != 1 {
                    target_idx += coord * target_strides[dim - offset];
                }
            }
            result[target_idx] += grad_val;
        }
        result
    }

    /// Apply a binary operation with broadcasting
    ///
    /// Steps:
    /// 1. Compute broadcast shape
    /// 2. Broadcast both inputs to that shape
    /// 3. Apply operation element-wise
    /// 4. Set up gradient tracking
    /// # Panics
    /// broadcast failure
    pub fn binary_op(self_t: &Tensor, other: &Tensor, op: BinaryOp) -> Tensor {
        let (data_a, shape_a, req_a) = {
            let s = self_t.borrow();
            (s.data.clone(), s.shape.clone(), s.requires_grad)
        };
        let (data_b, shape_b, req_b) = {
            let o = other.borrow();
            (o.data.clone(), o.shape.clone(), o.requires_grad)
        };

        let requires_grad = (req_a || req_b) && grad_enabled();

        let out_shape = Self::broadcast_shape(&shape_a, &shape_b);
        let out_size: usize = out_shape.iter().product();
        assert!(out_size > 0, "Invalid broadcast result size");

        let bc_data_a = Self::broadcast_to(&data_a, &shape_a, &out_shape);
        let bc_data_b = Self::broadcast_to(&data_b, &shape_b, &out_shape);

        let result_data: Vec<f32> = bc_data_a
            .iter()
            .zip(&bc_data_b)
            .map(|(a, b)| match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
            })
            .collect();

        let out = Self::new(result_data, &out_shape, requires_grad);

        if requires_grad {
            out.borrow_mut().parents = vec![self_t.clone(), other.clone()];
            out.borrow_mut().grad_fn = Some(Box::new(BinaryGradFn { op }));
        }
        out
    }

    // Convenience methods for binary operations
    pub fn add(self_t: &Tensor, other: &Tensor) -> Tensor {
        Self::binary_op(self_t, other, BinaryOp::Add)
    }
    pub fn sub(self_t: &Tensor, other: &Tensor) -> Tensor {
        Self::binary_op(self_t, other, BinaryOp::Sub)
    }
    pub fn elem_mul(self_t: &Tensor, other: &Tensor) -> Tensor {
        Self::binary_op(self_t, other, BinaryOp::Mul)
    }
    pub fn div(self_t: &Tensor, other: &Tensor) -> Tensor {
        Self::binary_op(self_t, other, BinaryOp::Div)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorOps;

    #[test]
    fn test_broadcast_add_shapes() {
        let a = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], false);
        let b = RawTensor::new(vec![10.0, 20.0, 30.0], &[3], false);
        let c = a.add(&b);
        assert_eq!(c.borrow().shape, vec![2, 3]);
        assert_eq!(c.borrow().data, vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
    }

    #[test]
    fn test_broadcast_mul_channelwise() {
        // [B,1,H,W] * [B,1,1,1] is the shading coefficient pattern
        let a = RawTensor::ones(&[2, 1, 2, 2]);
        let b = RawTensor::new(vec![2.0, 3.0], &[2, 1, 1, 1], false);
        let c = a.elem_mul(&b);
        assert_eq!(c.borrow().shape, vec![2, 1, 2, 2]);
        assert_eq!(&c.borrow().data[..4], &[2.0; 4]);
        assert_eq!(&c.borrow().data[4..], &[3.0; 4]);
    }

    #[test]
    fn test_mul_gradient_with_broadcast() {
        let x = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0], &[2, 2], true);
        let passed = RawTensor::check_gradients_simple(&x, |t| {
            let w = RawTensor::new(vec![0.5, 2.0], &[2], false);
            t.elem_mul(&w).sum()
        });
        assert!(passed);
    }

    #[test]
    fn test_div_gradient() {
        let x = RawTensor::new(vec![1.0, 2.0, 4.0], &[3], true);
        let passed = RawTensor::check_gradients_simple(&x, |t| {
            let y = RawTensor::new(vec![2.0, 4.0, 8.0], &[3], false);
            t.div(&y).sum()
        });
        assert!(passed);
    }
}
