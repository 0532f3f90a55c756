//! The decomposition sub-networks.
//!
//! Everything here is resolution-preserving: a trunk that lifts the masked
//! face into feature space, residual refiners and generator heads for the
//! normal and albedo branches, a light estimator over the fused features,
//! and the two closed-form rendering operators (shading, reconstruction)
//! expressed as tensor ops so gradients flow through them.

use crate::data::SH_COEFFS;
use crate::io::StateDict;
use crate::nn::{Conv2d, Linear, Module, ReLU, Tanh};
use crate::tensor::{RawTensor, Tensor, TensorOps};

/// Feature channels produced by the trunk and carried through both branches.
pub const FEATURE_CHANNELS: usize = 32;

fn merge_state(state: &mut StateDict, prefix: &str, sub: StateDict) {
    for (key, value) in sub {
        state.insert(format!("{prefix}.{key}"), value);
    }
}

fn extract_state(state: &StateDict, prefix: &str) -> StateDict {
    let prefix = format!("{prefix}.");
    let mut sub = StateDict::new();
    for (key, value) in state {
        if let Some(rest) = key.strip_prefix(&prefix) {
            if !rest.is_empty() {
                sub.insert(rest.to_string(), value.clone());
            }
        }
    }
    sub
}

/// Shared encoder: masked face `[B, 3, H, W]` -> features `[B, C_f, H, W]`.
pub struct FeatureTrunk {
    conv1: Conv2d,
    conv2: Conv2d,
    relu: ReLU,
}

impl FeatureTrunk {
    pub fn new(features: usize) -> Self {
        FeatureTrunk {
            conv1: Conv2d::new(3, features, 3, 1, 1, true),
            conv2: Conv2d::new(features, features, 3, 1, 1, true),
            relu: ReLU,
        }
    }
}

impl Module for FeatureTrunk {
    fn forward(&self, x: &Tensor) -> Tensor {
        let h = self.relu.forward(&self.conv1.forward(x));
        self.relu.forward(&self.conv2.forward(&h))
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut p = self.conv1.parameters();
        p.extend(self.conv2.parameters());
        p
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        merge_state(&mut state, "conv1", self.conv1.state_dict());
        merge_state(&mut state, "conv2", self.conv2.state_dict());
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        self.conv1.load_state_dict(&extract_state(state, "conv1"));
        self.conv2.load_state_dict(&extract_state(state, "conv2"));
    }
}

/// One residual conv block: `x + conv(relu(conv(x)))`, channels preserved.
struct ResidualBlock {
    conv1: Conv2d,
    conv2: Conv2d,
}

impl ResidualBlock {
    fn new(channels: usize) -> Self {
        ResidualBlock {
            conv1: Conv2d::new(channels, channels, 3, 1, 1, true),
            conv2: Conv2d::new(channels, channels, 3, 1, 1, true),
        }
    }
}

impl Module for ResidualBlock {
    fn forward(&self, x: &Tensor) -> Tensor {
        let h = self.conv1.forward(x).relu();
        let h = self.conv2.forward(&h);
        x.add(&h)
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut p = self.conv1.parameters();
        p.extend(self.conv2.parameters());
        p
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        merge_state(&mut state, "conv1", self.conv1.state_dict());
        merge_state(&mut state, "conv2", self.conv2.state_dict());
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        self.conv1.load_state_dict(&extract_state(state, "conv1"));
        self.conv2.load_state_dict(&extract_state(state, "conv2"));
    }
}

/// Branch-specific refiner: a stack of residual blocks over trunk features.
///
/// The normal and albedo branches each own one of these.
pub struct ResidualStack {
    blocks: Vec<ResidualBlock>,
}

impl ResidualStack {
    pub fn new(channels: usize, num_blocks: usize) -> Self {
        ResidualStack {
            blocks: (0..num_blocks).map(|_| ResidualBlock::new(channels)).collect(),
        }
    }
}

impl Module for ResidualStack {
    fn forward(&self, x: &Tensor) -> Tensor {
        let mut current = x.clone();
        for block in &self.blocks {
            current = block.forward(&current);
        }
        current
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.blocks.iter().flat_map(|b| b.parameters()).collect()
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        for (i, block) in self.blocks.iter().enumerate() {
            merge_state(&mut state, &format!("block{i}"), block.state_dict());
        }
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        for (i, block) in self.blocks.iter_mut().enumerate() {
            block.load_state_dict(&extract_state(state, &format!("block{i}")));
        }
    }
}

/// Decoder head: branch features -> 3-channel map in `[-1, 1]`.
pub struct GeneratorHead {
    conv: Conv2d,
    tanh: Tanh,
}

impl GeneratorHead {
    pub fn new(in_channels: usize) -> Self {
        GeneratorHead {
            conv: Conv2d::new(in_channels, 3, 3, 1, 1, true),
            tanh: Tanh,
        }
    }
}

impl Module for GeneratorHead {
    fn forward(&self, x: &Tensor) -> Tensor {
        self.tanh.forward(&self.conv.forward(x))
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.conv.parameters()
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        merge_state(&mut state, "conv", self.conv.state_dict());
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        self.conv.load_state_dict(&extract_state(state, "conv"));
    }
}

/// Lighting head over the fused `[B, 3*C_f, H, W]` feature stack.
///
/// 1x1 conv fusion, ReLU, global average pool, then a linear projection to
/// the 27 SH coefficients (9 per color channel, unnormalized).
pub struct LightEstimator {
    fuse: Conv2d,
    head: Linear,
}

impl LightEstimator {
    pub fn new(fused_channels: usize, hidden: usize) -> Self {
        LightEstimator {
            fuse: Conv2d::new(fused_channels, hidden, 1, 1, 0, true),
            head: Linear::new(hidden, SH_COEFFS, true),
        }
    }
}

impl Module for LightEstimator {
    fn forward(&self, x: &Tensor) -> Tensor {
        let h = self.fuse.forward(x).relu();
        // global average pool: [B, C, H, W] -> [B, C]
        let pooled = h.mean_dim(3, false).mean_dim(2, false);
        self.head.forward(&pooled)
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut p = self.fuse.parameters();
        p.extend(self.head.parameters());
        p
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        merge_state(&mut state, "fuse", self.fuse.state_dict());
        merge_state(&mut state, "head", self.head.state_dict());
        state
    }

    fn load_state_dict(&mut self, state: &StateDict) {
        self.fuse.load_state_dict(&extract_state(state, "fuse"));
        self.head.load_state_dict(&extract_state(state, "head"));
    }
}

// Irradiance constants from Ramamoorthi & Hanrahan's SH lighting model.
const C1: f32 = 0.429043;
const C2: f32 = 0.511664;
const C3: f32 = 0.743125;
const C4: f32 = 0.886227;
const C5: f32 = 0.247708;

/// Differentiable second-order SH shading.
///
/// Input normals are expected in display range `[0, 1]` (already
/// denormalized from the generator's `[-1, 1]`); they are mapped back to
/// direction components internally. The 27 coefficients are laid out 9 per
/// channel in the order `[L00, L1-1, L10, L11, L2-2, L2-1, L20, L21, L22]`,
/// channels R then G then B.
///
/// Stateless; it exists as a struct so the optimizer registration can treat
/// it like every other pipeline stage.
pub struct ShadingLayer;

impl ShadingLayer {
    pub fn forward(&self, normal: &Tensor, sh: &Tensor) -> Tensor {
        let batch = sh.borrow().shape[0];

        // [0,1] -> direction components in [-1,1]
        let two = RawTensor::constant(2.0, &[1]);
        let one = RawTensor::constant(1.0, &[1]);
        let n = normal.elem_mul(&two).sub(&one);

        let nx = n.narrow(1, 0, 1);
        let ny = n.narrow(1, 1, 1);
        let nz = n.narrow(1, 2, 1);

        let scale = |t: &Tensor, v: f32| t.elem_mul(&RawTensor::constant(v, &[1]));

        let mut channels = Vec::with_capacity(3);
        for ch in 0..3 {
            // [B, 1] coefficient reshaped to broadcast over [B, 1, H, W]
            let l = |k: usize| {
                sh.narrow(1, ch * 9 + k, 1).reshape(&[batch, 1, 1, 1])
            };

            let ambient = scale(&l(0), C4);
            let linear = scale(
                &l(1).elem_mul(&ny)
                    .add(&l(2).elem_mul(&nz))
                    .add(&l(3).elem_mul(&nx)),
                2.0 * C2,
            );
            let cross = scale(
                &l(4).elem_mul(&nx).elem_mul(&ny)
                    .add(&l(5).elem_mul(&ny).elem_mul(&nz))
                    .add(&l(7).elem_mul(&nx).elem_mul(&nz)),
                2.0 * C1,
            );
            let zonal = scale(&l(6).elem_mul(&nz).elem_mul(&nz), C3)
                .sub(&scale(&l(6), C5));
            let sectoral = scale(
                &l(8).elem_mul(&nx.elem_mul(&nx).sub(&ny.elem_mul(&ny))),
                C1,
            );

            channels.push(ambient.add(&linear).add(&cross).add(&zonal).add(&sectoral));
        }

        RawTensor::concat(&channels, 1)
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }
}

/// Final composition: `reconstruction = shading * albedo`, per pixel.
///
/// Albedo must already be denormalized to `[0, 1]`.
pub struct ReconstructionLayer;

impl ReconstructionLayer {
    pub fn forward(&self, shading: &Tensor, albedo: &Tensor) -> Tensor {
        shading.elem_mul(albedo)
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_trunk_preserves_resolution() {
        let trunk = FeatureTrunk::new(8);
        let x = RawTensor::randn(&[2, 3, 8, 8]);
        let y = trunk.forward(&x);
        assert_eq!(y.borrow().shape, vec![2, 8, 8, 8]);
    }

    #[test]
    fn test_residual_block_with_zero_weights_is_identity() {
        let stack = ResidualStack::new(4, 2);
        for p in stack.parameters() {
            let mut t = p.borrow_mut();
            for v in t.data.iter_mut() {
                *v = 0.0;
            }
        }
        let x = RawTensor::randn(&[1, 4, 3, 3]);
        let y = stack.forward(&x);
        assert_eq!(y.borrow().data, x.borrow().data);
    }

    #[test]
    fn test_generator_output_in_unit_range() {
        let generator = GeneratorHead::new(8);
        let x = RawTensor::randn(&[1, 8, 4, 4]);
        let y = generator.forward(&x);
        let b = y.borrow();
        assert_eq!(b.shape, vec![1, 3, 4, 4]);
        assert!(b.data.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_light_estimator_output_shape() {
        let estimator = LightEstimator::new(24, 8);
        let x = RawTensor::randn(&[2, 24, 4, 4]);
        let y = estimator.forward(&x);
        assert_eq!(y.borrow().shape, vec![2, 27]);
    }

    #[test]
    fn test_shading_ambient_only_is_uniform() {
        // Only the L00 coefficient set, one per channel: shading must be
        // constant C4 * L00 regardless of the normal direction.
        let mut coeffs = vec![0.0f32; 27];
        coeffs[0] = 1.0;
        coeffs[9] = 2.0;
        coeffs[18] = 3.0;
        let sh = RawTensor::new(coeffs, &[1, 27], false);
        let normal = RawTensor::rand(&[1, 3, 2, 2]);

        let shading = ShadingLayer.forward(&normal, &sh);
        let b = shading.borrow();
        assert_eq!(b.shape, vec![1, 3, 2, 2]);
        for i in 0..4 {
            assert_relative_eq!(b.data[i], C4, epsilon = 1e-5);
            assert_relative_eq!(b.data[4 + i], 2.0 * C4, epsilon = 1e-5);
            assert_relative_eq!(b.data[8 + i], 3.0 * C4, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_shading_gradient_flows_to_sh() {
        let sh = RawTensor::randn(&[1, 27]);
        sh.borrow_mut().requires_grad = true;
        let normal = RawTensor::rand(&[1, 3, 2, 2]);
        let loss = ShadingLayer.forward(&normal, &sh).sum();
        loss.backward();
        assert!(sh.grad().is_some());
    }

    #[test]
    fn test_reconstruction_is_elementwise_product() {
        let shading = RawTensor::new(vec![0.5, 1.0], &[1, 1, 1, 2], false);
        let albedo = RawTensor::new(vec![0.4, 0.8], &[1, 1, 1, 2], false);
        let recon = ReconstructionLayer.forward(&shading, &albedo);
        assert_eq!(recon.borrow().data, vec![0.2, 0.8]);
    }

    #[test]
    fn test_state_dict_round_trip_restores_weights() {
        let trunk = FeatureTrunk::new(4);
        let mut other = FeatureTrunk::new(4);
        other.load_state_dict(&trunk.state_dict());
        for (a, b) in trunk.parameters().iter().zip(other.parameters()) {
            assert_eq!(a.borrow().data, b.borrow().data);
        }
    }
}
