use crate::data::transforms::denormalize;
use crate::device::Device;
use crate::error::{Result, SfsError};
use crate::io::StateDict;
use crate::model::{
    FeatureTrunk, GeneratorHead, LightEstimator, ReconstructionLayer, ResidualStack,
    ShadingLayer, FEATURE_CHANNELS,
};
use crate::nn::Module;
use crate::tensor::{RawTensor, Tensor};

/// Residual blocks per branch refiner.
pub const RESIDUAL_BLOCKS: usize = 2;

/// Output of one forward pass, shapes matching the ground-truth batch.
///
/// `normal` and `albedo` are in the network range `[-1, 1]`; `shading` and
/// `reconstruction` are in display range, built from denormalized inputs.
pub struct Prediction {
    pub normal: Tensor,
    pub albedo: Tensor,
    pub sh: Tensor,
    pub shading: Tensor,
    pub reconstruction: Tensor,
}

/// The full decomposition network: trunk, two refiner/generator branches,
/// light estimator, and the closed-form shading/reconstruction stages.
///
/// Stateless across calls; `forward` is a pure composition and safe to call
/// repeatedly on independent inputs.
pub struct DecompositionPipeline {
    trunk: FeatureTrunk,
    normal_residual: ResidualStack,
    albedo_residual: ResidualStack,
    normal_generator: GeneratorHead,
    albedo_generator: GeneratorHead,
    light_estimator: LightEstimator,
    shading: ShadingLayer,
    reconstruction: ReconstructionLayer,
}

impl Default for DecompositionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl DecompositionPipeline {
    pub fn new() -> Self {
        Self::with_channels(FEATURE_CHANNELS, RESIDUAL_BLOCKS)
    }

    /// Build with a custom trunk width. Small widths keep tests fast.
    pub fn with_channels(features: usize, residual_blocks: usize) -> Self {
        DecompositionPipeline {
            trunk: FeatureTrunk::new(features),
            normal_residual: ResidualStack::new(features, residual_blocks),
            albedo_residual: ResidualStack::new(features, residual_blocks),
            normal_generator: GeneratorHead::new(features),
            albedo_generator: GeneratorHead::new(features),
            light_estimator: LightEstimator::new(3 * features, features),
            shading: ShadingLayer,
            reconstruction: ReconstructionLayer,
        }
    }

    /// One forward pass: masked face `[B, 3, H, W]` to the full prediction
    /// tuple. Fails fast on a malformed input instead of letting a tensor
    /// op panic deep in the stack.
    pub fn forward(&self, masked_face: &Tensor) -> Result<Prediction> {
        {
            let input = masked_face.borrow();
            if input.shape.len() != 4 || input.shape[1] != 3 {
                return Err(SfsError::ShapeMismatch {
                    context: "pipeline input",
                    expected: vec![input.shape.first().copied().unwrap_or(0), 3, 0, 0],
                    actual: input.shape.clone(),
                });
            }
        }

        let features = self.trunk.forward(masked_face);

        let normal_features = self.normal_residual.forward(&features);
        let albedo_features = self.albedo_residual.forward(&features);

        let normal = self.normal_generator.forward(&normal_features);
        let albedo = self.albedo_generator.forward(&albedo_features);

        // channel fusion feeding the light estimator, fixed order
        let fused = RawTensor::concat(&[features, normal_features, albedo_features], 1);
        let sh = self.light_estimator.forward(&fused);

        // shading and reconstruction operate in display range
        let shading = self.shading.forward(&denormalize(&normal), &sh);
        let reconstruction = self.reconstruction.forward(&shading, &denormalize(&albedo));

        Ok(Prediction {
            normal,
            albedo,
            sh,
            shading,
            reconstruction,
        })
    }

    /// Every trainable parameter across all stages, for optimizer
    /// registration. The shading and reconstruction stages contribute none.
    pub fn parameters(&self) -> Vec<Tensor> {
        let mut params = self.trunk.parameters();
        params.extend(self.normal_residual.parameters());
        params.extend(self.albedo_residual.parameters());
        params.extend(self.normal_generator.parameters());
        params.extend(self.albedo_generator.parameters());
        params.extend(self.light_estimator.parameters());
        params.extend(self.shading.parameters());
        params.extend(self.reconstruction.parameters());
        params
    }

    pub fn zero_grad(&self) {
        for p in self.parameters() {
            p.borrow_mut().grad = None;
        }
    }

    pub fn to_device(&self, device: Device) {
        for p in self.parameters() {
            p.borrow_mut().device = device;
        }
    }

    /// Checkpoint hook: full state of all trainable stages.
    pub fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        let mut merge = |prefix: &str, sub: StateDict| {
            for (key, value) in sub {
                state.insert(format!("{prefix}.{key}"), value);
            }
        };
        merge("trunk", self.trunk.state_dict());
        merge("normal_residual", self.normal_residual.state_dict());
        merge("albedo_residual", self.albedo_residual.state_dict());
        merge("normal_generator", self.normal_generator.state_dict());
        merge("albedo_generator", self.albedo_generator.state_dict());
        merge("light_estimator", self.light_estimator.state_dict());
        state
    }

    pub fn load_state_dict(&mut self, state: &StateDict) {
        let extract = |prefix: &str| {
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
        };
        self.trunk.load_state_dict(&extract("trunk"));
        self.normal_residual.load_state_dict(&extract("normal_residual"));
        self.albedo_residual.load_state_dict(&extract("albedo_residual"));
        self.normal_generator.load_state_dict(&extract("normal_generator"));
        self.albedo_generator.load_state_dict(&extract("albedo_generator"));
        self.light_estimator.load_state_dict(&extract("light_estimator"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_shapes() {
        let pipeline = DecompositionPipeline::with_channels(4, 1);
        let face = RawTensor::rand(&[2, 3, 8, 8]);
        let pred = pipeline.forward(&face).unwrap();

        assert_eq!(pred.normal.borrow().shape, vec![2, 3, 8, 8]);
        assert_eq!(pred.albedo.borrow().shape, vec![2, 3, 8, 8]);
        assert_eq!(pred.sh.borrow().shape, vec![2, 27]);
        assert_eq!(pred.shading.borrow().shape, vec![2, 3, 8, 8]);
        assert_eq!(pred.reconstruction.borrow().shape, vec![2, 3, 8, 8]);
    }

    #[test]
    fn test_forward_rejects_wrong_channel_count() {
        let pipeline = DecompositionPipeline::with_channels(4, 1);
        let bad = RawTensor::rand(&[1, 1, 8, 8]);
        assert!(matches!(
            pipeline.forward(&bad),
            Err(SfsError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_shading_and_recon_receive_display_range_inputs() {
        // Generator outputs live in [-1,1]; the shading/reconstruction
        // inputs must be the denormalized [0,1] versions. The product of
        // two [0,1]-denormalized maps with bounded shading coefficients
        // stays well away from the raw [-1,1] extremes of a tanh output,
        // so check the denormalized albedo path directly.
        let pipeline = DecompositionPipeline::with_channels(4, 1);
        let face = RawTensor::rand(&[1, 3, 4, 4]);
        let pred = pipeline.forward(&face).unwrap();

        let albedo = pred.albedo.borrow();
        let denorm: Vec<f32> = albedo.data.iter().map(|v| (v + 1.0) / 2.0).collect();
        assert!(denorm.iter().all(|v| (0.0..=1.0).contains(v)));

        // reconstruction = shading * denorm(albedo), elementwise
        let shading = pred.shading.borrow();
        let recon = pred.reconstruction.borrow();
        for i in 0..recon.data.len() {
            let expected = shading.data[i] * denorm[i];
            assert!((recon.data[i] - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_parameters_cover_all_stages() {
        let pipeline = DecompositionPipeline::with_channels(4, 1);
        // trunk: 2 convs (w+b), each branch: 1 block of 2 convs (w+b),
        // generators: 1 conv (w+b) each, light estimator: conv + linear (w+b)
        let expected = 2 * 2 + 2 * (2 * 2) + 2 * 2 + 2 * 2;
        assert_eq!(pipeline.parameters().len(), expected);
    }

    #[test]
    fn test_state_dict_round_trip() {
        let pipeline = DecompositionPipeline::with_channels(4, 1);
        let mut other = DecompositionPipeline::with_channels(4, 1);
        other.load_state_dict(&pipeline.state_dict());
        for (a, b) in pipeline.parameters().iter().zip(other.parameters()) {
            assert_eq!(a.borrow().data, b.borrow().data);
        }
    }
}
