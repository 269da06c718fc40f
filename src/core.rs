// src/core.rs
pub mod activations;
pub mod init;
pub mod layers;
pub mod losses;
pub mod normalization;
pub mod optimizers;

// Re-export commonly used items
pub use activations::{softmax, Activation};
pub use init::{InitContext, WeightInit};
pub use layers::{Layer, LayerKind};
pub use losses::{encode_targets, one_hot, predicted_label, Cost, NumericPolicy};
pub use normalization::Normalization;
pub use optimizers::{Consistency, ParallelConfig, SgdConfig};
