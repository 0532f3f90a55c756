use crate::data::transforms::denormalize;
use crate::data::Batch;
use crate::pipeline::Prediction;
use crate::tensor::{RawTensor, Tensor, TensorOps};

/// Mean absolute error over all elements, as a scalar graph node.
pub fn l1_loss(prediction: &Tensor, target: &Tensor) -> Tensor {
    prediction.sub(target).abs().mean()
}

/// Mean squared error over all elements, as a scalar graph node.
pub fn mse_loss(prediction: &Tensor, target: &Tensor) -> Tensor {
    let diff = prediction.sub(target);
    diff.elem_mul(&diff).mean()
}

/// Per-term weights for the composite objective.
#[derive(Debug, Clone, Copy)]
pub struct LossWeights {
    pub recon: f32,
    pub normal: f32,
    pub albedo: f32,
    pub sh: f32,
}

impl Default for LossWeights {
    fn default() -> Self {
        LossWeights {
            recon: 0.5,
            normal: 0.5,
            albedo: 0.5,
            sh: 0.1,
        }
    }
}

/// The four supervised terms plus their weighted sum, detached from the
/// graph for accumulation and reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct LossBreakdown {
    pub total: f32,
    pub normal: f32,
    pub albedo: f32,
    pub sh: f32,
    pub recon: f32,
}

/// Compute the four supervised losses for one batch and combine them.
///
/// Normal, albedo and reconstruction use L1; the SH coefficients use MSE.
/// The reconstruction target is the denormalized masked face, matching the
/// display-range output of the reconstruction stage. Returns the in-graph
/// total (for backward) alongside the detached breakdown.
pub fn batch_loss(
    prediction: &Prediction,
    batch: &Batch,
    masked_face: &Tensor,
    weights: &LossWeights,
) -> (Tensor, LossBreakdown) {
    let normal_loss = l1_loss(&prediction.normal, &batch.normal);
    let albedo_loss = l1_loss(&prediction.albedo, &batch.albedo);
    let sh_loss = mse_loss(&prediction.sh, &batch.sh);

    // Shading works in display range, so the target face must too.
    let recon_target = denormalize(masked_face);
    let recon_loss = l1_loss(&prediction.reconstruction, &recon_target);

    let weigh = |t: &Tensor, w: f32| t.elem_mul(&RawTensor::constant(w, &[1]));
    let total = weigh(&recon_loss, weights.recon)
        .add(&weigh(&normal_loss, weights.normal))
        .add(&weigh(&albedo_loss, weights.albedo))
        .add(&weigh(&sh_loss, weights.sh));

    let breakdown = LossBreakdown {
        total: total.item(),
        normal: normal_loss.item(),
        albedo: albedo_loss.item(),
        sh: sh_loss.item(),
        recon: recon_loss.item(),
    };

    (total, breakdown)
}

/// The fixed-weight combination, on plain numbers.
///
/// Kept separate so the invariant is testable without building a graph.
pub fn weighted_total(weights: &LossWeights, breakdown: &LossBreakdown) -> f32 {
    weights.recon * breakdown.recon
        + weights.normal * breakdown.normal
        + weights.albedo * breakdown.albedo
        + weights.sh * breakdown.sh
}
