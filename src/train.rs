use std::fs;
use std::path::PathBuf;

use crate::autograd::no_grad;
use crate::data::transforms::apply_mask;
use crate::data::DataLoader;
use crate::device::Device;
use crate::error::Result;
use crate::io::{save_debug_image, DumpKind};
use crate::loss::{batch_loss, LossBreakdown, LossWeights};
use crate::nn::Adam;
use crate::pipeline::DecompositionPipeline;
use crate::tensor::TensorOps;
use crate::utils::ProgressBar;

/// Run configuration for the training entry point.
pub struct TrainConfig {
    pub num_epochs: usize,
    pub use_accelerator: bool,
    pub log_path: PathBuf,
    pub debug_batch_index: usize,
    pub learning_rate: f32,
    pub weights: LossWeights,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            num_epochs: 10,
            use_accelerator: false,
            log_path: PathBuf::from("./metadata/"),
            debug_batch_index: 5,
            learning_rate: 0.001,
            weights: LossWeights::default(),
        }
    }
}

/// Running loss sums for one epoch, divided out at epoch end.
#[derive(Debug, Default, Clone, Copy)]
pub struct EpochStats {
    total: f64,
    normal: f64,
    albedo: f64,
    sh: f64,
    recon: f64,
    batches: usize,
}

/// Mean of each loss term over one pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochSummary {
    pub total: f32,
    pub normal: f32,
    pub albedo: f32,
    pub sh: f32,
    pub recon: f32,
}

impl EpochStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, breakdown: &LossBreakdown) {
        self.total += f64::from(breakdown.total);
        self.normal += f64::from(breakdown.normal);
        self.albedo += f64::from(breakdown.albedo);
        self.sh += f64::from(breakdown.sh);
        self.recon += f64::from(breakdown.recon);
        self.batches += 1;
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Mean over the recorded batches. Zero batches yields zero means.
    pub fn mean(&self) -> EpochSummary {
        let n = if self.batches == 0 {
            1.0
        } else {
            self.batches as f64
        };
        EpochSummary {
            total: (self.total / n) as f32,
            normal: (self.normal / n) as f32,
            albedo: (self.albedo / n) as f32,
            sh: (self.sh / n) as f32,
            recon: (self.recon / n) as f32,
        }
    }
}

impl std::fmt::Display for EpochSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Total Loss: {:.6}, Normal Loss: {:.6}, Albedo Loss: {:.6}, SH Loss: {:.6}, Recon Loss: {:.6}",
            self.total, self.normal, self.albedo, self.sh, self.recon
        )
    }
}

/// Train the pipeline for `config.num_epochs` passes over `train_loader`,
/// validating against `val_loader` after every epoch.
///
/// Every batch: mask the face, run the forward pass, compute the weighted
/// loss, backpropagate, and take one Adam step. Errors inside a batch abort
/// the run; optimizer state is not recoverable mid-epoch.
///
/// Returns the per-epoch (train, validation) summaries.
pub fn train(
    pipeline: &mut DecompositionPipeline,
    train_loader: &mut DataLoader,
    val_loader: &mut DataLoader,
    config: &TrainConfig,
) -> Result<Vec<(EpochSummary, EpochSummary)>> {
    let device = Device::for_run(config.use_accelerator)?;
    pipeline.to_device(device);
    fs::create_dir_all(&config.log_path)?;
    println!("Training on {device}");

    let mut optimizer = Adam::with_lr(pipeline.parameters(), config.learning_rate);
    let mut history = Vec::with_capacity(config.num_epochs);

    for epoch in 1..=config.num_epochs {
        let mut stats = EpochStats::new();
        let mut progress = ProgressBar::new(train_loader.num_batches(), &format!("epoch {epoch}"));

        train_loader.reset();
        for batch in train_loader.by_ref() {
            let masked_face = apply_mask(&batch.face, &batch.mask);
            let prediction = pipeline.forward(&masked_face)?;
            let (total, breakdown) =
                batch_loss(&prediction, &batch, &masked_face, &config.weights);

            optimizer.zero_grad();
            total.backward();
            optimizer.step();

            stats.record(&breakdown);
            progress.step(breakdown.total);
        }
        progress.finish();

        let train_summary = stats.mean();
        println!("Epoch: {epoch} - {train_summary}");

        let val_summary = evaluate(pipeline, val_loader, epoch, config)?;
        println!("Validation  - {val_summary}");

        // TODO: wire per-epoch checkpointing through io::save_state_dict
        // once a retention policy is decided.

        history.push((train_summary, val_summary));
    }

    Ok(history)
}

/// Evaluation pass: same losses as training, gradient tracking disabled,
/// no parameter updates.
///
/// At `config.debug_batch_index` the first sample's predicted normal,
/// albedo, face and shading are written to `config.log_path` as
/// `val_{epoch}_{index}_{kind}.png`, with the mask applied. Normal and
/// albedo dumps are denormalized; face and shading are already in display
/// range.
pub fn evaluate(
    pipeline: &DecompositionPipeline,
    loader: &mut DataLoader,
    epoch: usize,
    config: &TrainConfig,
) -> Result<EpochSummary> {
    no_grad(|| {
        let mut stats = EpochStats::new();

        loader.reset();
        let mut bix = 0usize;
        for batch in loader.by_ref() {
            let masked_face = apply_mask(&batch.face, &batch.mask);
            let prediction = pipeline.forward(&masked_face)?;
            let (_, breakdown) =
                batch_loss(&prediction, &batch, &masked_face, &config.weights);

            if bix == config.debug_batch_index {
                let stem = format!("val_{epoch}_{bix}");
                let dumps = [
                    (DumpKind::Normal, &prediction.normal),
                    (DumpKind::Albedo, &prediction.albedo),
                    (DumpKind::Face, &prediction.reconstruction),
                    (DumpKind::Shading, &prediction.shading),
                ];
                for (kind, tensor) in dumps {
                    let path = config
                        .log_path
                        .join(format!("{stem}_{}.png", kind.label()));
                    save_debug_image(tensor, 0, Some(&batch.mask), kind.denormalize(), &path)?;
                }
            }

            stats.record(&breakdown);
            bix += 1;
        }

        Ok(stats.mean())
    })
}
