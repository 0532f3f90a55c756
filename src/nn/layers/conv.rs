use crate::autograd::{grad_enabled, GradFn};
use crate::io::{StateDict, TensorData};
use crate::nn::Module;
use crate::tensor::{RawTensor, Tensor};

/// 2D convolution over NCHW inputs.
///
/// Direct (non-im2col) implementation. The decomposition networks run at
/// small spatial sizes and channel counts, so the straightforward seven-deep
/// loop is fast enough and keeps the backward pass easy to audit.
///
/// Output size: `H_out` = (`H_in` + 2*padding - kernel) / stride + 1
pub struct Conv2d {
    pub weight: Tensor,       // [out_channels, in_channels, kernel_h, kernel_w]
    pub bias: Option<Tensor>, // [out_channels]
    stride: (usize, usize),
    padding: (usize, usize),
}

impl Conv2d {
    pub fn new(
        in_ch: usize,
        out_ch: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        use_bias: bool,
    ) -> Self {
        // He initialization over the receptive field
        let w = RawTensor::randn(&[out_ch, in_ch, kernel, kernel]);
        {
            let mut w_mut = w.borrow_mut();
            let scale = (2.0 / (in_ch * kernel * kernel) as f32).sqrt();
            for v in w_mut.data.iter_mut() {
                *v *= scale;
            }
            w_mut.requires_grad = true;
        }

        let b = if use_bias {
            let b = RawTensor::zeros(&[out_ch]);
            b.borrow_mut().requires_grad = true;
            Some(b)
        } else {
            None
        };

        Conv2d {
            weight: w,
            bias: b,
            stride: (stride, stride),
            padding: (padding, padding),
        }
    }
}

impl Module for Conv2d {
    fn forward(&self, x: &Tensor) -> Tensor {
        let (batch, in_channels, in_h, in_w, x_data, x_req) = {
            let x_borrow = x.borrow();
            assert_eq!(x_borrow.shape.len(), 4, "Input must be 4D: (B, C, H, W)");
            (
                x_borrow.shape[0],
                x_borrow.shape[1],
                x_borrow.shape[2],
                x_borrow.shape[3],
                x_borrow.data.clone(),
                x_borrow.requires_grad,
            )
        };

        let (out_channels, kh, kw, w_data, w_req) = {
            let w_borrow = self.weight.borrow();
            assert_eq!(
                w_borrow.shape[1], in_channels,
                "Channel mismatch: input has {} channels but weight expects {}",
                in_channels, w_borrow.shape[1]
            );
            (
                w_borrow.shape[0],
                w_borrow.shape[2],
                w_borrow.shape[3],
                w_borrow.data.clone(),
                w_borrow.requires_grad,
            )
        };

        let (sh, sw) = self.stride;
        let (ph, pw) = self.padding;
        let out_h = (in_h + 2 * ph - kh) / sh + 1;
        let out_w = (in_w + 2 * pw - kw) / sw + 1;

        let bias_data = self.bias.as_ref().map(|b| b.borrow().data.clone());
        let b_req = self
            .bias
            .as_ref()
            .map(|b| b.borrow().requires_grad)
            .unwrap_or(false);

        let mut out_data = vec![0.0f32; batch * out_channels * out_h * out_w];
        for b in 0..batch {
            for o in 0..out_channels {
                let base_bias = bias_data.as_ref().map(|bd| bd[o]).unwrap_or(0.0);
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let mut acc = base_bias;
                        for c in 0..in_channels {
                            for ki in 0..kh {
                                let ih = oh * sh + ki;
                                if ih < ph || ih >= in_h + ph {
                                    continue;
                                }
                                let ih = ih - ph;
                                for kj in 0..kw {
                                    let iw = ow * sw + kj;
                                    if iw < pw || iw >= in_w + pw {
                                        continue;
                                    }
                                    let iw = iw - pw;
                                    let x_idx = ((b * in_channels + c) * in_h + ih) * in_w + iw;
                                    let w_idx = ((o * in_channels + c) * kh + ki) * kw + kj;
                                    acc += x_data[x_idx] * w_data[w_idx];
                                }
                            }
                        }
                        let out_idx = ((b * out_channels + o) * out_h + oh) * out_w + ow;
                        out_data[out_idx] = acc;
                    }
                }
            }
        }

        let requires_grad = (x_req || w_req || b_req) && grad_enabled();
        let out = RawTensor::new(out_data, &[batch, out_channels, out_h, out_w], requires_grad);

        if requires_grad {
            let mut parents = vec![x.clone(), self.weight.clone()];
            if let Some(ref bias) = self.bias {
                parents.push(bias.clone());
            }
            out.borrow_mut().parents = parents;
            out.borrow_mut().grad_fn = Some(Box::new(Conv2dGradFn {
                stride: self.stride,
                padding: self.padding,
            }));
        }
        out
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = vec![self.weight.clone()];
        if let Some(ref b) = self.bias {
            params.push(b.clone());
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

/// Gradient function for direct convolution.
///
/// Parents are `[input, weight]` or `[input, weight, bias]`. Both input and
/// weight gradients come from one sweep over the output positions, mirroring
/// the forward index arithmetic; the bias gradient is the per-channel sum of
/// the output gradient.
struct Conv2dGradFn {
    stride: (usize, usize),
    padding: (usize, usize),
}

impl GradFn for Conv2dGradFn {
    fn backward(&self, out_grad: &RawTensor, parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let x = parents[0].borrow();
        let w = parents[1].borrow();

        let (batch, in_channels, in_h, in_w) =
            (x.shape[0], x.shape[1], x.shape[2], x.shape[3]);
        let (out_channels, kh, kw) = (w.shape[0], w.shape[2], w.shape[3]);
        let (out_h, out_w) = (out_grad.shape[2], out_grad.shape[3]);
        let (sh, sw) = self.stride;
        let (ph, pw) = self.padding;

        let mut gx = if x.requires_grad {
            Some(vec![0.0f32; x.data.len()])
        } else {
            None
        };
        let mut gw = if w.requires_grad {
            Some(vec![0.0f32; w.data.len()])
        } else {
            None
        };

        for b in 0..batch {
            for o in 0..out_channels {
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let out_idx = ((b * out_channels + o) * out_h + oh) * out_w + ow;
                        let g = out_grad.data[out_idx];
                        if g == 0.0 {
                            continue;
                        }
                        for c in 0..in_channels {
                            for ki in 0..kh {
                                let ih = oh * sh + ki;
                                if ih < ph || ih >= in_h + ph {
                                    continue;
                                }
                                let ih = ih - ph;
                                for kj in 0..kw {
                                    let iw = ow * sw + kj;
                                    if iw < pw || iw >= in_w + pw {
                                        continue;
                                    }
                                    let iw = iw - pw;
                                    let x_idx = ((b * in_channels + c) * in_h + ih) * in_w + iw;
                                    let w_idx = ((o * in_channels + c) * kh + ki) * kw + kj;
                                    if let Some(ref mut gx) = gx {
                                        gx[x_idx] += g * w.data[w_idx];
                                    }
                                    if let Some(ref mut gw) = gw {
                                        gw[w_idx] += g * x.data[x_idx];
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        let mut grads = vec![
            gx.map(|d| RawTensor::new(d, &x.shape, false)),
            gw.map(|d| RawTensor::new(d, &w.shape, false)),
        ];

        if let Some(bias) = parents.get(2) {
            let bias = bias.borrow();
            if bias.requires_grad {
                let mut gb = vec![0.0f32; out_channels];
                let plane = out_h * out_w;
                for b in 0..batch {
                    for o in 0..out_channels {
                        let base = (b * out_channels + o) * plane;
                        for i in 0..plane {
                            gb[o] += out_grad.data[base + i];
                        }
                    }
                }
                grads.push(Some(RawTensor::new(gb, &[out_channels], false)));
            } else {
                grads.push(None);
            }
        }

        grads
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(Conv2dGradFn {
            stride: self.stride,
            padding: self.padding,
        })
    }
}
