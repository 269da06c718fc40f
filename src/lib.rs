pub mod config;
pub mod core;
pub mod error;
pub mod history;
pub mod models;
pub mod prelude;
pub mod trainer;

// Re-export types
pub use config::{NetworkConfig, TrainConfig};
pub use core::{Activation, Consistency, Cost, InitContext, LayerKind, NumericPolicy, ParallelConfig, SgdConfig, WeightInit};
pub use error::{NNError, Result};
pub use models::{EvaluationResult, Network};
pub use trainer::Trainer;

pub mod data {
    pub mod idx;

    pub use idx::{load_images, load_labels, parse_images, parse_labels, LoadSettings};
}

pub mod plot {
    pub mod training_curves;

    pub use training_curves::{history_ranges, push_history, ChartSink, PlotSink, Series};
}
