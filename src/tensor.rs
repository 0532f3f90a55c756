use crate::autograd::GradFn;
use crate::device::Device;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::cell::RefCell;
use std::rc::Rc;

/// Type alias for a reference-counted, interior-mutable tensor.
///
/// We use `Rc<RefCell<RawTensor>>` to allow multiple references to the same tensor
/// (needed for computation graphs) while still allowing mutation (for gradient accumulation).
///
/// **Note**: single-threaded only, which matches the batch-sequential training
/// loop. For multi-threading this would become `Arc<Mutex<RawTensor>>`.
pub type Tensor = Rc<RefCell<RawTensor>>;

// ===== RAW TENSOR STRUCTURE =====

/// The core tensor structure containing data and gradient tracking
///
/// This is wrapped in `Rc<RefCell<>>` to create the public `Tensor` type.
/// Fields:
/// - `data`: flat Vec<f32> of actual values (row-major order)
/// - `shape`: dimensions, e.g. [batch, channels, height, width]
/// - `grad`: accumulated gradient (Some once backward has reached this tensor)
/// - `requires_grad`: whether to track gradients for this tensor
/// - `grad_fn`: function to compute parent gradients during backward
/// - `parents`: input tensors that this tensor depends on
/// - `device`: placement marker; every tensor in a run must agree
pub struct RawTensor {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
    pub grad: Option<Vec<f32>>,
    pub requires_grad: bool,
    pub grad_fn: Option<Box<dyn GradFn>>,
    pub parents: Vec<Tensor>,
    pub device: Device,
}

impl Clone for RawTensor {
    fn clone(&self) -> Self {
        RawTensor {
            data: self.data.clone(),
            shape: self.shape.clone(),
            grad: self.grad.clone(),
            requires_grad: self.requires_grad,
            grad_fn: self.grad_fn.as_ref().map(|gf| gf.clone_box()),
            parents: self.parents.clone(),
            device: self.device,
        }
    }
}

impl std::fmt::Debug for RawTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("requires_grad", &self.requires_grad)
            .field("has_grad", &self.grad.is_some())
            .field("device", &self.device)
            .finish()
    }
}

// ===== TENSOR CONSTRUCTORS =====
impl RawTensor {
    /// Create a new tensor from data and shape
    ///
    /// # Panics
    /// Panics if data.len() != shape.product()
    pub fn new(data: Vec<f32>, shape: &[usize], requires_grad: bool) -> Tensor {
        assert_eq!(
            data.len(),
            shape.iter().product::<usize>(),
            "Data length must match shape"
        );
        let raw = RawTensor {
            data,
            shape: shape.to_vec(),
            grad: None,
            requires_grad,
            grad_fn: None,
            parents: vec![],
            device: Device::Cpu,
        };
        Rc::new(RefCell::new(raw))
    }

    /// Create a tensor filled with zeros
    pub fn zeros(shape: &[usize]) -> Tensor {
        let size = shape.iter().product();
        Self::new(vec![0.0; size], shape, false)
    }

    /// Create a tensor filled with ones
    pub fn ones(shape: &[usize]) -> Tensor {
        let size = shape.iter().product();
        Self::new(vec![1.0; size], shape, false)
    }

    /// Create tensor filled with a constant value
    pub fn constant(value: f32, shape: &[usize]) -> Tensor {
        let size = shape.iter().product();
        Self::new(vec![value; size], shape, false)
    }

    /// Create a tensor with random values uniformly distributed in [0, 1)
    pub fn rand(shape: &[usize]) -> Tensor {
        let size = shape.iter().product();
        let mut rng = rand::rng();
        let data: Vec<f32> = (0..size).map(|_| rng.random::<f32>()).collect();
        Self::new(data, shape, false)
    }

    /// Create a tensor with values from standard normal distribution N(0, 1)
    pub fn randn(shape: &[usize]) -> Tensor {
        let size = shape.iter().product();
        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut rng = rand::rng();
        let data: Vec<f32> = (0..size).map(|_| normal.sample(&mut rng)).collect();
        Self::new(data, shape, false)
    }

    /// Xavier uniform initialization
    ///
    /// Samples weights uniformly from [-limit, limit] where
    /// limit = sqrt(6 / (fan_in + fan_out))
    pub fn xavier_uniform(shape: &[usize]) -> Tensor {
        let fan_in = shape[0];
        let fan_out = shape[1];
        let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
        let size: usize = shape.iter().product();
        let mut rng = rand::rng();
        let data: Vec<f32> = (0..size).map(|_| rng.random_range(-limit..limit)).collect();
        Self::new(data, shape, false)
    }

    /// Extract the single value of a scalar tensor, detached from the graph.
    ///
    /// # Panics
    /// Panics if the tensor holds more than one element.
    pub fn item(self_t: &Tensor) -> f32 {
        let t = self_t.borrow();
        assert_eq!(t.data.len(), 1, "item() requires a scalar tensor");
        t.data[0]
    }
}

// ===== AXIS REDUCTIONS =====

/// Gradient for sum_dim: broadcast ones back to input shape
struct SumDimGradFn {
    input_shape: Vec<usize>,
    dim: usize,
    keepdim: bool,
}

impl GradFn for SumDimGradFn {
    fn backward(&self, out_grad: &RawTensor, _parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let grad_data = &out_grad.data;

        // If keepdim=false, unsqueeze the dimension back
        let mut expanded_shape = out_grad.shape.clone();
        if !self.keepdim {
            expanded_shape.insert(self.dim, 1);
        }

        let size: usize = self.input_shape.iter().product();
        let mut result = vec![0.0; size];
        let grad_strides = RawTensor::compute_strides(&expanded_shape);

        #[allow(clippy::needless_range_loop)]
        for i in 0..size {
            let mut coords = vec![0; self.input_shape.len()];
            let mut rem = i;
            for (d, &dim_sz) in self.input_shape.iter().enumerate().rev() {
                coords[d] = rem % dim_sz;
                rem /= dim_sz;
            }

            // Map to gradient coordinates (zero out the summed dimension)
            let mut grad_coords = coords;
            grad_coords[self.dim] = 0;

            let grad_idx: usize = grad_coords
                .iter()
                .zip(&grad_strides)
                .map(|(c, s)| c * s)
                .sum();
            result[i] = grad_data[grad_idx];
        }

        vec![Some(RawTensor::new(result, &self.input_shape, false))]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(SumDimGradFn {
            input_shape: self.input_shape.clone(),
            dim: self.dim,
            keepdim: self.keepdim,
        })
    }
}

impl RawTensor {
    /// Sum along a specific axis
    ///
    /// # Arguments
    /// * `dim` - Axis to reduce (0-indexed)
    /// * `keepdim` - If true, keep reduced dimension as size 1
    pub fn sum_dim(self_t: &Tensor, dim: usize, keepdim: bool) -> Tensor {
        let (data, shape, req_grad) = {
            let s = self_t.borrow();
            assert!(
                dim < s.shape.len(),
                "dim {} out of bounds for shape {:?}",
                dim,
                s.shape
            );
            (s.data.clone(), s.shape.clone(), s.requires_grad)
        };
        let req_grad = req_grad && crate::autograd::grad_enabled();

        let mut out_shape = shape.clone();
        out_shape[dim] = 1; // intermediate shape before squeeze
        let out_size: usize = out_shape.iter().product();
        let mut result = vec![0.0; out_size];

        let out_strides = Self::compute_strides(&out_shape);

        #[allow(clippy::needless_range_loop)]
        for i in 0..data.len() {
            let mut coords = vec![0; shape.len()];
            let mut rem = i;
            for (d, &dim_sz) in shape.iter().enumerate().rev() {
                coords[d] = rem % dim_sz;
                rem /= dim_sz;
            }

            let mut out_coords = coords;
            out_coords[dim] = 0;

            let out_idx: usize = out_coords
                .iter()
                .zip(&out_strides)
                .map(|(c, s)| c * s)
                .sum();
            result[out_idx] += data[i];
        }

        let final_shape = if keepdim {
            out_shape
        } else {
            out_shape
                .iter()
                .enumerate()
                .filter(|(d, _)| *d != dim)
                .map(|(_, &sz)| sz)
                .collect()
        };

        let out = Self::new(result, &final_shape, req_grad);

        if req_grad {
            out.borrow_mut().parents = vec![self_t.clone()];
            out.borrow_mut().grad_fn = Some(Box::new(SumDimGradFn {
                input_shape: shape,
                dim,
                keepdim,
            }));
        }
        out
    }

    /// Mean along a specific axis
    ///
    /// Implemented as sum_dim(dim) / size(dim)
    pub fn mean_dim(self_t: &Tensor, dim: usize, keepdim: bool) -> Tensor {
        let shape = self_t.borrow().shape.clone();
        assert!(dim < shape.len(), "Dimension out of bounds");

        let n = shape[dim] as f32;
        let sum = Self::sum_dim(self_t, dim, keepdim);
        let div_tensor = Self::new(vec![n], &[1], false);

        RawTensor::div(&sum, &div_tensor)
    }
}

// ===== NUMERICAL GRADIENT CHECKING =====

impl RawTensor {
    /// Check gradients numerically using finite differences
    ///
    /// For each parameter, we compute:
    ///
    /// Analytical gradient: What our backward() computes
    /// Numerical gradient: (f(x+ε) - f(x-ε)) / (2ε)
    ///
    /// The central difference formula is more accurate than forward difference.
    ///
    /// # Returns
    /// (max_error, mean_error, passed)
    pub fn check_gradients<F>(
        tensor: &Tensor,
        loss_fn: F,
        epsilon: f32,
        tolerance: f32,
    ) -> (f32, f32, bool)
    where
        F: Fn(&Tensor) -> Tensor,
    {
        let loss = loss_fn(tensor);
        loss.backward();

        let analytical_grad = tensor.grad().expect("Tensor must have gradient");
        let mut numerical_grad = vec![0.0; analytical_grad.len()];

        let original_data = tensor.borrow().data.clone();
        let original_shape = tensor.borrow().shape.clone();
        let requires_grad = tensor.borrow().requires_grad;

        for i in 0..original_data.len() {
            let mut data_plus = original_data.clone();
            data_plus[i] += epsilon;
            let tensor_plus = RawTensor::new(data_plus, &original_shape, requires_grad);
            let val_plus = loss_fn(&tensor_plus).borrow().data[0];

            let mut data_minus = original_data.clone();
            data_minus[i] -= epsilon;
            let tensor_minus = RawTensor::new(data_minus, &original_shape, requires_grad);
            let val_minus = loss_fn(&tensor_minus).borrow().data[0];

            // central diff
            numerical_grad[i] = (val_plus - val_minus) / (2.0 * epsilon);
        }

        let mut max_error: f32 = 0.0;
        let mut total_error: f32 = 0.0;

        for (i, (&analytical, &numerical)) in
            analytical_grad.iter().zip(&numerical_grad).enumerate()
        {
            let error = (analytical - numerical).abs();
            let relative_error = if numerical.abs() > 1e-8 {
                error / numerical.abs()
            } else {
                error
            };

            max_error = max_error.max(relative_error);
            total_error += relative_error;

            if relative_error > tolerance {
                eprintln!(
                    "Gradient mismatch at index {}: analytical={:.6e}, numerical={:.6e}, error={:.6e}",
                    i, analytical, numerical, relative_error
                );
            }
        }

        let mean_error = total_error / analytical_grad.len() as f32;
        let passed = max_error < tolerance;

        (max_error, mean_error, passed)
    }

    /// Simplified gradient checker with default parameters
    ///
    /// Uses epsilon=1e-2 and tolerance=1e-3, which work well for most cases.
    pub fn check_gradients_simple<F>(tensor: &Tensor, loss_fn: F) -> bool
    where
        F: Fn(&Tensor) -> Tensor,
    {
        let (max_err, mean_err, passed) = Self::check_gradients(tensor, loss_fn, 1e-2, 1e-3);

        if !passed {
            eprintln!(
                "Gradient check FAILED: max_error={:.6e}, mean_error={:.6e}",
                max_err, mean_err
            );
        }

        passed
    }
}

// ===== TRAIT-BASED API =====

/// Public trait for tensor operations
///
/// This provides a more ergonomic API: `tensor.add(&other)` instead of
/// `RawTensor::add(&tensor, &other)`
pub trait TensorOps {
    // Binary ops
    fn add(&self, other: &Tensor) -> Tensor;
    fn sub(&self, other: &Tensor) -> Tensor;
    fn elem_mul(&self, other: &Tensor) -> Tensor;
    fn div(&self, other: &Tensor) -> Tensor;

    // Unary ops
    fn neg(&self) -> Tensor;
    fn abs(&self) -> Tensor;
    fn sqrt(&self) -> Tensor;
    fn exp(&self) -> Tensor;
    fn tanh(&self) -> Tensor;
    fn relu(&self) -> Tensor;

    // Reduce ops
    fn sum(&self) -> Tensor;
    fn mean(&self) -> Tensor;
    fn sum_dim(&self, dim: usize, keepdim: bool) -> Tensor;
    fn mean_dim(&self, dim: usize, keepdim: bool) -> Tensor;

    // Movement ops
    fn reshape(&self, new_shape: &[usize]) -> Tensor;
    fn narrow(&self, dim: usize, start: usize, len: usize) -> Tensor;

    // Matmul
    fn matmul(&self, other: &Tensor) -> Tensor;

    // Gradient ops
    fn backward(&self);
    fn grad(&self) -> Option<Vec<f32>>;
    fn item(&self) -> f32;
}

impl TensorOps for Tensor {
    fn add(&self, other: &Tensor) -> Tensor {
        RawTensor::add(self, other)
    }
    fn sub(&self, other: &Tensor) -> Tensor {
        RawTensor::sub(self, other)
    }
    fn elem_mul(&self, other: &Tensor) -> Tensor {
        RawTensor::elem_mul(self, other)
    }
    fn div(&self, other: &Tensor) -> Tensor {
        RawTensor::div(self, other)
    }

    fn neg(&self) -> Tensor {
        RawTensor::neg(self)
    }
    fn abs(&self) -> Tensor {
        RawTensor::abs(self)
    }
    fn sqrt(&self) -> Tensor {
        RawTensor::sqrt(self)
    }
    fn exp(&self) -> Tensor {
        RawTensor::exp(self)
    }
    fn tanh(&self) -> Tensor {
        RawTensor::tanh(self)
    }
    fn relu(&self) -> Tensor {
        RawTensor::relu(self)
    }

    fn sum(&self) -> Tensor {
        RawTensor::sum(self)
    }
    fn mean(&self) -> Tensor {
        RawTensor::mean(self)
    }
    fn sum_dim(&self, dim: usize, keepdim: bool) -> Tensor {
        RawTensor::sum_dim(self, dim, keepdim)
    }
    fn mean_dim(&self, dim: usize, keepdim: bool) -> Tensor {
        RawTensor::mean_dim(self, dim, keepdim)
    }

    fn reshape(&self, new_shape: &[usize]) -> Tensor {
        RawTensor::reshape(self, new_shape)
    }
    fn narrow(&self, dim: usize, start: usize, len: usize) -> Tensor {
        RawTensor::narrow(self, dim, start, len)
    }

    fn matmul(&self, other: &Tensor) -> Tensor {
        RawTensor::matmul(self, other)
    }

    fn backward(&self) {
        RawTensor::backward(self)
    }
    fn grad(&self) -> Option<Vec<f32>> {
        self.borrow().grad.clone()
    }
    fn item(&self) -> f32 {
        RawTensor::item(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_shape() {
        let result = std::panic::catch_unwind(|| {
            let _ = RawTensor::new(vec![1.0, 2.0, 3.0], &[2, 2], false);
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_sum_dim_values() {
        let x = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], false);
        let s = RawTensor::sum_dim(&x, 1, false);
        assert_eq!(s.borrow().shape, vec![2]);
        assert_eq!(s.borrow().data, vec![6.0, 15.0]);
    }

    #[test]
    fn test_mean_dim_keepdim() {
        let x = RawTensor::new(vec![2.0, 4.0, 6.0, 8.0], &[2, 2], false);
        let m = RawTensor::mean_dim(&x, 0, true);
        assert_eq!(m.borrow().shape, vec![1, 2]);
        assert_eq!(m.borrow().data, vec![4.0, 6.0]);
    }

    #[test]
    fn test_sum_dim_gradient() {
        let x = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0], &[2, 2], true);
        let passed = RawTensor::check_gradients_simple(&x, |t| {
            RawTensor::sum(&RawTensor::sum_dim(t, 1, false))
        });
        assert!(passed);
    }

    #[test]
    fn test_item_detaches_scalar() {
        let x = RawTensor::new(vec![7.5], &[1], true);
        assert_eq!(RawTensor::item(&x), 7.5);
    }
}
