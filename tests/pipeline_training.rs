//! End-to-end checks of the decomposition training pipeline.

use sfsnet::data::transforms::apply_mask;
use sfsnet::data::{DataLoader, FaceDataset};
use sfsnet::loss::{batch_loss, LossWeights};
use sfsnet::pipeline::{DecompositionPipeline, Prediction};
use sfsnet::train::{evaluate, train, TrainConfig};
use sfsnet::{RawTensor, TensorOps};

/// Deterministic dataset: ramp-valued images, checkerboard-ish mask.
fn fixed_dataset(num_samples: usize, h: usize, w: usize) -> FaceDataset {
    let image_size = 3 * h * w;
    let ramp = |n: usize, phase: f32| -> Vec<f32> {
        (0..n)
            .map(|i| ((i as f32 * 0.37 + phase).sin()) * 0.9)
            .collect()
    };

    let face = ramp(num_samples * image_size, 0.0);
    let normal = ramp(num_samples * image_size, 1.0);
    let albedo = ramp(num_samples * image_size, 2.0);
    let sh: Vec<f32> = (0..num_samples * 27).map(|i| (i % 9) as f32 * 0.05).collect();

    let mut mask = vec![0.0f32; num_samples * h * w];
    for (i, m) in mask.iter_mut().enumerate() {
        if i % 3 != 0 {
            *m = 1.0;
        }
    }

    FaceDataset::new(face, mask, normal, albedo, sh, h, w).unwrap()
}

fn quiet_config(dir: &str) -> TrainConfig {
    TrainConfig {
        num_epochs: 1,
        log_path: std::env::temp_dir().join(dir),
        debug_batch_index: usize::MAX,
        ..TrainConfig::default()
    }
}

#[test]
fn masked_input_zeroes_excluded_pixels() {
    let mut loader = DataLoader::new(fixed_dataset(2, 4, 4), 2, false);
    let batch = loader.next().unwrap();
    let masked = apply_mask(&batch.face, &batch.mask);

    let masked_b = masked.borrow();
    let mask_b = batch.mask.borrow();
    let plane = 4 * 4;
    for s in 0..2 {
        for c in 0..3 {
            for p in 0..plane {
                if mask_b.data[s * plane + p] == 0.0 {
                    assert_eq!(masked_b.data[(s * 3 + c) * plane + p], 0.0);
                }
            }
        }
    }
}

#[test]
fn losses_vanish_when_predictions_equal_ground_truth() {
    let mut loader = DataLoader::new(fixed_dataset(1, 4, 4), 1, false);
    let batch = loader.next().unwrap();
    let masked = apply_mask(&batch.face, &batch.mask);

    // An identity-like pipeline: predictions exactly match ground truth.
    let prediction = Prediction {
        normal: batch.normal.clone(),
        albedo: batch.albedo.clone(),
        sh: batch.sh.clone(),
        shading: RawTensor::ones(&[1, 3, 4, 4]),
        reconstruction: RawTensor::zeros(&[1, 3, 4, 4]),
    };

    let (_, breakdown) = batch_loss(&prediction, &batch, &masked, &LossWeights::default());
    assert_eq!(breakdown.normal, 0.0);
    assert_eq!(breakdown.albedo, 0.0);
    assert_eq!(breakdown.sh, 0.0);
}

#[test]
fn training_is_deterministic_from_identical_state() {
    let template = DecompositionPipeline::with_channels(4, 1);
    let snapshot = template.state_dict();

    let run = |state: &sfsnet::io::StateDict| -> Vec<Vec<f32>> {
        let mut pipeline = DecompositionPipeline::with_channels(4, 1);
        pipeline.load_state_dict(state);
        let mut train_loader = DataLoader::new(fixed_dataset(4, 8, 8), 2, false);
        let mut val_loader = DataLoader::new(fixed_dataset(2, 8, 8), 2, false);
        let config = quiet_config("sfsnet_determinism");
        train(&mut pipeline, &mut train_loader, &mut val_loader, &config).unwrap();
        pipeline
            .parameters()
            .iter()
            .map(|p| p.borrow().data.clone())
            .collect()
    };

    let first = run(&snapshot);
    let second = run(&snapshot);
    assert_eq!(first, second);
}

#[test]
fn training_reduces_loss_on_fixed_data() {
    let mut pipeline = DecompositionPipeline::with_channels(4, 1);
    let mut train_loader = DataLoader::new(fixed_dataset(4, 8, 8), 2, false);
    let mut val_loader = DataLoader::new(fixed_dataset(2, 8, 8), 2, false);
    let config = TrainConfig {
        num_epochs: 5,
        learning_rate: 0.01,
        ..quiet_config("sfsnet_loss_curve")
    };

    let history = train(&mut pipeline, &mut train_loader, &mut val_loader, &config).unwrap();
    assert_eq!(history.len(), 5);

    let first = history.first().unwrap().0.total;
    let last = history.last().unwrap().0.total;
    assert!(
        last < first,
        "training loss did not decrease: {first} -> {last}"
    );
}

#[test]
fn evaluation_writes_named_debug_artifacts() {
    let pipeline = DecompositionPipeline::with_channels(4, 1);
    let mut loader = DataLoader::new(fixed_dataset(2, 8, 8), 1, false);
    let log_path = std::env::temp_dir().join("sfsnet_artifacts");
    let _ = std::fs::remove_dir_all(&log_path);
    std::fs::create_dir_all(&log_path).unwrap();

    let config = TrainConfig {
        log_path: log_path.clone(),
        debug_batch_index: 1,
        ..TrainConfig::default()
    };

    evaluate(&pipeline, &mut loader, 3, &config).unwrap();

    for kind in ["normal", "albedo", "face", "shading"] {
        let path = log_path.join(format!("val_3_1_{kind}.png"));
        assert!(path.exists(), "missing artifact {}", path.display());
    }
}

#[test]
fn gradients_reach_every_parameter() {
    let pipeline = DecompositionPipeline::with_channels(4, 1);
    let mut loader = DataLoader::new(fixed_dataset(1, 8, 8), 1, false);
    let batch = loader.next().unwrap();
    let masked = apply_mask(&batch.face, &batch.mask);

    let prediction = pipeline.forward(&masked).unwrap();
    let (total, _) = batch_loss(&prediction, &batch, &masked, &LossWeights::default());
    total.backward();

    for p in pipeline.parameters() {
        assert!(p.borrow().grad.is_some());
    }

    pipeline.zero_grad();
    for p in pipeline.parameters() {
        assert!(p.borrow().grad.is_none());
    }
}
