//! Serializable descriptions of a network topology and a training run.
//!
//! Both can be read from JSON so drivers keep hyperparameters out of code:
//!
//! ```json
//! {
//!   "layers": [
//!     { "kind": "Input", "units": 784 },
//!     { "kind": "Regular", "units": 30, "activation": "Sigmoid" },
//!     { "kind": "Softmax", "units": 10 }
//!   ],
//!   "cost": "CrossEntropy",
//!   "seed": 7
//! }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::prelude::*;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct LayerConfig {
    pub kind: LayerKind,
    pub units: usize,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default)]
    pub init: WeightInit,
}

impl LayerConfig {
    pub fn input(units: usize) -> Self {
        Self {
            kind: LayerKind::Input,
            units,
            activation: Activation::None,
            init: WeightInit::Zeros,
        }
    }

    pub fn regular(units: usize, activation: Activation, init: WeightInit) -> Self {
        Self {
            kind: LayerKind::Regular,
            units,
            activation,
            init,
        }
    }

    pub fn softmax(units: usize, init: WeightInit) -> Self {
        Self {
            kind: LayerKind::Softmax,
            units,
            activation: Activation::None,
            init,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct NetworkConfig {
    pub layers: Vec<LayerConfig>,
    #[serde(default)]
    pub cost: Cost,
    #[serde(default)]
    pub numeric_policy: NumericPolicy,
    /// Seed for weight initialization; `None` draws from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl NetworkConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn build(&self) -> Result<Network> {
        let mut ctx = match self.seed {
            Some(seed) => InitContext::seeded(seed),
            None => InitContext::from_entropy(),
        };
        self.build_with(&mut ctx)
    }

    pub fn build_with(&self, ctx: &mut InitContext) -> Result<Network> {
        let mut network = Network::new(self.cost);
        network.set_numeric_policy(self.numeric_policy);
        for layer in &self.layers {
            match layer.kind {
                LayerKind::Input => network.add_input_layer(layer.units)?,
                kind => network.add_layer(kind, layer.units, layer.activation, layer.init, ctx)?,
            }
        }
        if network.len() < 2 {
            return Err(NNError::EmptyModel);
        }
        Ok(network)
    }
}

/// Everything a [`Trainer`] needs besides the data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrainConfig {
    #[serde(flatten)]
    pub sgd: SgdConfig,
    pub epochs: usize,
    /// Runs `psgd` when set, `sgd` otherwise.
    pub parallel: Option<ParallelConfig>,
    /// Evaluate at most this many validation examples per epoch; 0 means all.
    pub eval_count: usize,
    pub plot_path: Option<String>,
    pub csv_path: Option<String>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            sgd: SgdConfig::default(),
            epochs: 30,
            parallel: None,
            eval_count: 0,
            plot_path: None,
            csv_path: None,
        }
    }
}

impl TrainConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.sgd.validate()?;
        if let Some(parallel) = &self.parallel {
            parallel.worker_count()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn train_config_defaults_fill_missing_fields() {
        let config: TrainConfig = serde_json::from_str(r#"{ "eta": 3.0, "epochs": 5 }"#).unwrap();
        assert_eq!(config.sgd.eta, 3.0);
        assert_eq!(config.sgd.batch_size, 10);
        assert_eq!(config.epochs, 5);
        assert!(config.parallel.is_none());
    }

    #[test]
    fn parallel_section_parses() {
        let config: TrainConfig = serde_json::from_str(
            r#"{ "batch_size": 4, "parallel": { "consistency": "Relaxed", "workers": 3 } }"#,
        )
        .unwrap();
        let parallel = config.parallel.unwrap();
        assert_eq!(parallel.consistency, Consistency::Relaxed);
        assert_eq!(parallel.workers, Some(3));
        assert_eq!(config.sgd.batch_size, 4);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config: TrainConfig = serde_json::from_str(r#"{ "batch_size": 0 }"#).unwrap();
        assert!(matches!(config.validate(), Err(NNError::InvalidConfig(_))));
    }

    #[test]
    fn network_config_builds_topology() {
        let config: NetworkConfig = serde_json::from_str(
            r#"{
                "layers": [
                    { "kind": "Input", "units": 4 },
                    { "kind": "Regular", "units": 3, "activation": "Relu", "init": "Gaussian" },
                    { "kind": "Softmax", "units": 2 }
                ],
                "cost": "CrossEntropy",
                "seed": 11
            }"#,
        )
        .unwrap();
        let network = config.build().unwrap();
        assert_eq!(network.len(), 3);
        assert_eq!(network.cost(), Cost::CrossEntropy);
        assert_eq!(network.layer(2).unwrap().weights().dim(), (2, 3));
        assert_eq!(config.build().unwrap().layer(1).unwrap().weights(), network.layer(1).unwrap().weights());
    }

    #[test]
    fn network_config_without_output_layer_is_empty() {
        let config = NetworkConfig {
            layers: vec![LayerConfig::input(3)],
            ..Default::default()
        };
        assert!(matches!(config.build(), Err(NNError::EmptyModel)));
    }
}
