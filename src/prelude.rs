pub use serde::{Deserialize, Serialize};

pub use ndarray::*;
pub use ndarray_rand::rand_distr::Uniform;
pub use ndarray_rand::RandomExt;

pub use crate::config::{LayerConfig, NetworkConfig, TrainConfig};
pub use crate::error::*;
pub use crate::history::{EpochRecord, TrainingHistory};
pub use crate::models::{EvaluationResult, Network, NetworkBuilder};
pub use crate::trainer::Trainer;

// Internal re-exports
pub use crate::core::{
    encode_targets, one_hot, predicted_label, softmax, Activation, Consistency, Cost, InitContext, Layer, LayerKind, NumericPolicy,
    ParallelConfig, SgdConfig, WeightInit,
};
