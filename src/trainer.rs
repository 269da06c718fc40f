//! Epoch loop around [`Network::sgd`] / [`Network::psgd`].

use std::time::Instant;

use tracing::{info, warn};

use crate::plot::{history_ranges, push_history, ChartSink, PlotSink};
use crate::prelude::*;

/// Runs a [`TrainConfig`] against a network, evaluating after every epoch.
pub struct Trainer<'a> {
    config: TrainConfig,
    validation: Option<(&'a [Array2<f64>], &'a [u8])>,
    plot_sink: Option<&'a mut dyn PlotSink>,
}

impl<'a> Trainer<'a> {
    pub fn new(config: TrainConfig) -> Self {
        Self {
            config,
            validation: None,
            plot_sink: None,
        }
    }

    /// Evaluate on these examples instead of the training set.
    pub fn with_validation(mut self, inputs: &'a [Array2<f64>], labels: &'a [u8]) -> Self {
        self.validation = Some((inputs, labels));
        self
    }

    /// Receives the accuracy and cost curves after every epoch.
    pub fn with_plot_sink(mut self, sink: &'a mut dyn PlotSink) -> Self {
        self.plot_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn train(&mut self, network: &mut Network, inputs: &[Array2<f64>], labels: &[u8]) -> Result<TrainingHistory> {
        self.config.validate()?;
        network.check_trainable()?;
        if let Some((val_inputs, val_labels)) = self.validation {
            if val_inputs.len() != val_labels.len() {
                return Err(NNError::LengthMismatch {
                    inputs: val_inputs.len(),
                    labels: val_labels.len(),
                });
            }
        }
        if !network.has_exact_output_gradient() {
            warn!(
                cost = ?network.cost(),
                output = ?network.layers().last().map(Layer::kind),
                "output layer and cost do not give an exact gradient"
            );
        }

        info!(
            epochs = self.config.epochs,
            eta = self.config.sgd.eta,
            lambda = self.config.sgd.lambda,
            batch_size = self.config.sgd.batch_size,
            parallel = ?self.config.parallel,
            examples = inputs.len(),
            "training started"
        );

        let mut fallback = ChartSink::new("Training progress");
        let mut sink: Option<&mut dyn PlotSink> = match self.plot_sink.as_deref_mut() {
            Some(sink) => Some(sink),
            None if self.config.plot_path.is_some() => Some(&mut fallback),
            None => None,
        };

        let mut history = TrainingHistory::default();
        for epoch in 1..=self.config.epochs {
            let start = Instant::now();
            match &self.config.parallel {
                Some(parallel) => network.psgd(inputs, labels, &self.config.sgd, parallel)?,
                None => network.sgd(inputs, labels, &self.config.sgd)?,
            }
            let elapsed_ms = start.elapsed().as_millis() as u64;

            let (eval_inputs, eval_labels) = self.validation.unwrap_or((inputs, labels));
            let result = match self.config.parallel {
                Some(_) => network.evaluate_parallel(eval_inputs, eval_labels, self.config.eval_count)?,
                None => network.evaluate(eval_inputs, eval_labels, self.config.eval_count)?,
            };
            info!(
                epoch,
                accuracy = result.accuracy,
                cost = result.average_cost,
                misclassified = result.misclassified.len(),
                elapsed_ms,
                "epoch complete"
            );
            history.push(EpochRecord {
                epoch,
                accuracy: result.accuracy,
                average_cost: result.average_cost,
                misclassified: result.misclassified.len(),
                elapsed_ms,
            });
            if let Some(sink) = sink.as_deref_mut() {
                push_history(&history, sink);
            }
        }

        if let (Some(path), Some(sink)) = (&self.config.plot_path, sink) {
            let (x_range, y_range) = history_ranges(&history);
            sink.render(x_range, y_range, path)?;
        }
        if let Some(path) = &self.config.csv_path {
            history.write_csv(path)?;
            info!(path = path.as_str(), "history written");
        }
        Ok(history)
    }
}
