use std::env;
use std::path::PathBuf;

use rfnn::data::{load_images, load_labels, LoadSettings};
use rfnn::prelude::*;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// `mnist <data-dir> [network.json] [train.json]`
///
/// `data-dir` holds the four standard MNIST IDX files.
fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut args = env::args().skip(1);
    let dir = PathBuf::from(args.next().unwrap_or_else(|| "data".to_string()));
    let network_config = match args.next() {
        Some(path) => NetworkConfig::from_json_file(path)?,
        None => NetworkConfig {
            layers: vec![
                LayerConfig::input(784),
                LayerConfig::regular(30, Activation::Sigmoid, WeightInit::WeightedGaussian),
                LayerConfig::softmax(10, WeightInit::WeightedGaussian),
            ],
            cost: Cost::CrossEntropy,
            numeric_policy: NumericPolicy::Lenient,
            seed: Some(42),
        },
    };
    let train_config = match args.next() {
        Some(path) => TrainConfig::from_json_file(path)?,
        None => TrainConfig {
            sgd: SgdConfig::new(0.5, 5.0 / 60_000.0 * 10.0, 10),
            epochs: 30,
            parallel: Some(ParallelConfig::new(Consistency::Strict, None)),
            eval_count: 0,
            plot_path: Some("mnist_training.png".to_string()),
            csv_path: Some("mnist_training.csv".to_string()),
        },
    };

    let settings = LoadSettings::default();
    let train_images = load_images(dir.join("train-images-idx3-ubyte"), settings)?;
    let train_labels = load_labels(dir.join("train-labels-idx1-ubyte"), settings.max_items)?;
    let test_images = load_images(dir.join("t10k-images-idx3-ubyte"), settings)?;
    let test_labels = load_labels(dir.join("t10k-labels-idx1-ubyte"), settings.max_items)?;
    info!(train = train_images.len(), test = test_images.len(), "dataset loaded");

    let mut network = network_config.build()?;
    println!("{}", network.summary());

    let history = Trainer::new(train_config)
        .with_validation(&test_images, &test_labels)
        .train(&mut network, &train_images, &train_labels)?;

    let eval = network.evaluate_parallel(&test_images, &test_labels, 0)?;
    println!(
        "\ntest accuracy: {:.4}  cost: {:.5}  misclassified: {}",
        eval.accuracy,
        eval.average_cost,
        eval.misclassified.len()
    );
    if let Some(best) = history.best_accuracy() {
        println!("best epoch: {} ({:.4})", best.epoch, best.accuracy);
    }

    Ok(())
}
