use sfsnet::data::transforms::synthetic_dataset;
use sfsnet::data::DataLoader;
use sfsnet::pipeline::DecompositionPipeline;
use sfsnet::train::{train, TrainConfig};

fn main() {
    println!("=== Face decomposition training (synthetic data) ===\n");

    // Small synthetic dataset; real runs load rendered face crops with
    // ground-truth normals, albedo and SH lighting instead.
    let train_ds = synthetic_dataset(64, 32, 32);
    let val_ds = synthetic_dataset(16, 32, 32);
    println!(
        "Train samples: {}, validation samples: {}",
        train_ds.len(),
        val_ds.len()
    );

    let mut train_loader = DataLoader::new(train_ds, 8, true);
    let mut val_loader = DataLoader::new(val_ds, 8, false);

    let mut pipeline = DecompositionPipeline::new();
    println!(
        "Pipeline parameters: {}",
        pipeline
            .parameters()
            .iter()
            .map(|p| p.borrow().data.len())
            .sum::<usize>()
    );

    let config = TrainConfig {
        num_epochs: 3,
        debug_batch_index: 1,
        ..TrainConfig::default()
    };

    match train(&mut pipeline, &mut train_loader, &mut val_loader, &config) {
        Ok(history) => {
            let (first, _) = history.first().expect("at least one epoch");
            let (last, _) = history.last().expect("at least one epoch");
            println!(
                "\nDone. Train loss {:.4} -> {:.4} over {} epochs.",
                first.total,
                last.total,
                history.len()
            );
            println!("Debug dumps written to {}", config.log_path.display());
        }
        Err(e) => {
            eprintln!("Training failed: {e}");
            std::process::exit(1);
        }
    }
}
