use crate::autograd::{grad_enabled, GradFn};
use crate::{RawTensor, Tensor};

/// Movement operations: reorganize data without changing values
///
/// - Reshape: same data, new shape (element count preserved)
/// - Narrow: contiguous slice along one dimension
pub enum MovementOp {
    Reshape { original_shape: Vec<usize> },
    Narrow { original_shape: Vec<usize>, dim: usize, start: usize, len: usize },
}

pub struct MovementGradFn {
    op: MovementOp,
}

impl GradFn for MovementGradFn {
    fn backward(&self, out_grad: &RawTensor, _parents: &[Tensor]) -> Vec<Option<Tensor>> {
        match &self.op {
            MovementOp::Reshape { original_shape } => {
                // Gradient flows through unchanged, only the shape reverts
                vec![Some(RawTensor::new(
                    out_grad.data.clone(),
                    original_shape,
                    false,
                ))]
            }
            MovementOp::Narrow {
                original_shape,
                dim,
                start,
                len,
            } => {
                // Scatter the slice gradient back into a zero tensor of the
                // original shape; positions outside the slice get no gradient.
                let size: usize = original_shape.iter().product();
                let mut result = vec![0.0; size];
                let in_strides = RawTensor::compute_strides(original_shape);
                let out_strides = RawTensor::compute_strides(&out_grad.shape);

                debug_assert_eq!(out_grad.shape[*dim], *len);
                for (i, &g) in out_grad.data.iter().enumerate() {
                    let mut rem = i;
                    let mut src_idx = 0;
                    for d in 0..out_grad.shape.len() {
                        let mut coord = rem / out_strides[d];
                        rem %= out_strides[d];
                        if d == *dim {
                            coord += start;
                        }
                        src_idx += coord * in_strides[d];
                    }
                    result[src_idx] = g;
                }
                vec![Some(RawTensor::new(result, original_shape, false))]
            }
        }
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        let op = match &self.op {
            MovementOp::Reshape { original_shape } => MovementOp::Reshape {
                original_shape: original_shape.clone(),
            },
            MovementOp::Narrow {
                original_shape,
                dim,
                start,
                len,
            } => MovementOp::Narrow {
                original_shape: original_shape.clone(),
                dim: *dim,
                start: *start,
                len: *len,
            },
        };
        Box::new(MovementGradFn { op })
    }
}

/// Gradient for concat: split the output gradient back to each input
pub struct ConcatGradFn {
    dim: usize,
    input_shapes: Vec<Vec<usize>>,
}

impl GradFn for ConcatGradFn {
    fn backward(&self, out_grad: &RawTensor, parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let mut grads = Vec::with_capacity(self.input_shapes.len());
        let mut offset = 0;

        for (shape, parent) in self.input_shapes.iter().zip(parents) {
            let len = shape[self.dim];
            if parent.borrow().requires_grad {
                let piece =
                    slice_along_dim(&out_grad.data, &out_grad.shape, self.dim, offset, len);
                grads.push(Some(RawTensor::new(piece, shape, false)));
            } else {
                grads.push(None);
            }
            offset += len;
        }
        grads
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(ConcatGradFn {
            dim: self.dim,
            input_shapes: self.input_shapes.clone(),
        })
    }
}

/// Copy a contiguous [start, start+len) range along `dim` into a new buffer.
fn slice_along_dim(
    data: &[f32],
    shape: &[usize],
    dim: usize,
    start: usize,
    len: usize,
) -> Vec<f32> {
    let mut out_shape = shape.to_vec();
    out_shape[dim] = len;
    let out_size: usize = out_shape.iter().product();
    let mut out = vec![0.0; out_size];

    let in_strides = RawTensor::compute_strides(shape);
    let out_strides = RawTensor::compute_strides(&out_shape);

    #[allow(clippy::needless_range_loop)]
    for i in 0..out_size {
        let mut rem = i;
        let mut src_idx = 0;
        for d in 0..out_shape.len() {
            let mut coord = rem / out_strides[d];
            rem %= out_strides[d];
            if d == dim {
                coord += start;
            }
            src_idx += coord * in_strides[d];
        }
        out[i] = data[src_idx];
    }
    out
}

// ===== MOVEMENT OPERATIONS =====

impl RawTensor {
    /// Row-major strides for a shape
    pub fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// Change the shape without changing the data
    ///
    /// # Panics
    /// Panics if element counts differ.
    pub fn reshape(self_t: &Tensor, new_shape: &[usize]) -> Tensor {
        let (data, shape, req) = {
            let s = self_t.borrow();
            (s.data.clone(), s.shape.clone(), s.requires_grad)
        };
        let req = req && grad_enabled();

        assert_eq!(
            shape.iter().product::<usize>(),
            new_shape.iter().product::<usize>(),
            "reshape cannot change element count: {shape:?} -> {new_shape:?}"
        );

        let out = Self::new(data, new_shape, req);
        if req {
            out.borrow_mut().parents = vec![self_t.clone()];
            out.borrow_mut().grad_fn = Some(Box::new(MovementGradFn {
                op: MovementOp::Reshape {
                    original_shape: shape,
                },
            }));
        }
        out
    }

    /// Contiguous slice of length `len` starting at `start` along `dim`
    ///
    /// Used to pull individual channels out of NCHW tensors (e.g. the three
    /// normal components feeding the SH basis).
    ///
    /// # Panics
    /// Panics if the range exceeds the dimension.
    pub fn narrow(self_t: &Tensor, dim: usize, start: usize, len: usize) -> Tensor {
        let (data, shape, req) = {
            let s = self_t.borrow();
            (s.data.clone(), s.shape.clone(), s.requires_grad)
        };
        let req = req && grad_enabled();

        assert!(dim < shape.len(), "dim {dim} out of bounds for {shape:?}");
        assert!(
            start + len <= shape[dim],
            "narrow range {start}..{} exceeds dim {dim} of {shape:?}",
            start + len
        );

        let sliced = slice_along_dim(&data, &shape, dim, start, len);
        let mut out_shape = shape.clone();
        out_shape[dim] = len;

        let out = Self::new(sliced, &out_shape, req);
        if req {
            out.borrow_mut().parents = vec![self_t.clone()];
            out.borrow_mut().grad_fn = Some(Box::new(MovementGradFn {
                op: MovementOp::Narrow {
                    original_shape: shape,
                    dim,
                    start,
                    len,
                },
            }));
        }
        out
    }

    /// Concatenate tensors along `dim`
    ///
    /// All inputs must agree on every dimension except `dim`. This is the
    /// channel-fusion op feeding the light estimator.
    ///
    /// # Panics
    /// Panics on empty input or incompatible shapes.
    pub fn concat(tensors: &[Tensor], dim: usize) -> Tensor {
        assert!(!tensors.is_empty(), "concat requires at least one tensor");

        let first_shape = tensors[0].borrow().shape.clone();
        assert!(dim < first_shape.len(), "concat dim out of bounds");

        let mut input_shapes = Vec::with_capacity(tensors.len());
        let mut dim_total = 0;
        let mut requires_grad = false;
        for t in tensors {
            let s = t.borrow();
            assert_eq!(
                s.shape.len(),
                first_shape.len(),
                "concat inputs must have equal rank"
            );
            for (d, (&a, &b)) in s.shape.iter().zip(&first_shape).enumerate() {
                assert!(
                    d == dim || a == b,
                    "concat inputs differ at dim {d}: {:?} vs {:?}",
                    s.shape,
                    first_shape
                );
            }
            dim_total += s.shape[dim];
            requires_grad |= s.requires_grad;
            input_shapes.push(s.shape.clone());
        }
        let requires_grad = requires_grad && grad_enabled();

        let mut out_shape = first_shape.clone();
        out_shape[dim] = dim_total;
        let out_size: usize = out_shape.iter().product();
        let mut out_data = vec![0.0; out_size];
        let out_strides = Self::compute_strides(&out_shape);

        // Write each input into its channel range of the output
        let mut offset = 0;
        for t in tensors {
            let s = t.borrow();
            let in_strides = Self::compute_strides(&s.shape);
            for (i, &v) in s.data.iter().enumerate() {
                let mut rem = i;
                let mut dst_idx = 0;
                for d in 0..s.shape.len() {
                    let mut coord = rem / in_strides[d];
                    rem %= in_strides[d];
                    if d == dim {
                        coord += offset;
                    }
                    dst_idx += coord * out_strides[d];
                }
                out_data[dst_idx] = v;
            }
            offset += s.shape[dim];
        }

        let out = Self::new(out_data, &out_shape, requires_grad);
        if requires_grad {
            out.borrow_mut().parents = tensors.to_vec();
            out.borrow_mut().grad_fn = Some(Box::new(ConcatGradFn { dim, input_shapes }));
        }
        out
    }
}
