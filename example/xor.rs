use rfnn::prelude::*;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let inputs = vec![
        array![[0.], [0.]],
        array![[0.], [1.]],
        array![[1.], [0.]],
        array![[1.], [1.]],
    ];
    let labels = vec![0, 1, 1, 0];

    let mut network = Network::builder()
        .input(2)
        .regular(2, Activation::Sigmoid, WeightInit::Gaussian)
        .regular(1, Activation::Sigmoid, WeightInit::Gaussian)
        .cost(Cost::Quadratic)
        .seed(1)
        .build()?;

    println!("{}", network.summary());

    let config = TrainConfig {
        sgd: SgdConfig::new(2.0, 0.0, 1),
        epochs: 2000,
        ..Default::default()
    };
    let history = Trainer::new(config).train(&mut network, &inputs, &labels)?;

    let eval = network.evaluate(&inputs, &labels, 0)?;
    println!(
        "\naccuracy: {:.2}  cost: {:.5}  misclassified: {:?}",
        eval.accuracy, eval.average_cost, eval.misclassified
    );
    if let Some(best) = history.best_accuracy() {
        println!("best epoch: {} ({:.2})", best.epoch, best.accuracy);
    }
    for x in &inputs {
        println!("{} -> {}", x.t(), network.predict(x)?);
    }

    Ok(())
}
