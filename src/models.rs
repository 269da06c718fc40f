use std::ops::Range;

use rayon::prelude::*;
use tracing::trace;

use crate::core::optimizers::Step;
use crate::prelude::*;

mod parallel;

/// Outcome of [`Network::evaluate`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    /// Fraction of correctly classified examples, in [0, 1].
    pub accuracy: f64,
    pub average_cost: f64,
    /// Indices of misclassified examples, ascending.
    pub misclassified: Vec<usize>,
}

/// Thread-local record of one forward pass: Z, A and dA per layer.
#[derive(Debug, Clone, Default)]
pub(crate) struct ForwardTrace {
    pub z: Vec<Array2<f64>>,
    pub a: Vec<Array2<f64>>,
    pub da: Vec<Array2<f64>>,
}

impl ForwardTrace {
    #[cfg(test)]
    pub fn output(&self) -> Option<&Array2<f64>> {
        self.a.last()
    }
}

/// A feedforward network: one input layer followed by regular/softmax layers.
#[derive(Debug, Clone)]
pub struct Network {
    layers: Vec<Layer>,
    cost: Cost,
    numeric_policy: NumericPolicy,
}

impl Network {
    pub fn new(cost: Cost) -> Self {
        Self {
            layers: Vec::new(),
            cost,
            numeric_policy: NumericPolicy::default(),
        }
    }

    pub fn builder() -> NetworkBuilder {
        NetworkBuilder::default()
    }

    pub fn add_input_layer(&mut self, units: usize) -> Result<()> {
        if !self.layers.is_empty() {
            return Err(NNError::InvalidLayerConfiguration(
                "Only one input layer supported".to_string(),
            ));
        }
        self.layers.push(Layer::input(units)?);
        Ok(())
    }

    pub fn add_layer(
        &mut self,
        kind: LayerKind,
        units: usize,
        activation: Activation,
        init: WeightInit,
        ctx: &mut InitContext,
    ) -> Result<()> {
        if kind == LayerKind::Input {
            return self.add_input_layer(units);
        }
        let prev = self.layers.last().ok_or_else(|| {
            NNError::InvalidLayerConfiguration(
                "There should be at least one layer in the network before adding a regular layer \
                 (impossible to deduce matrix dimensions)"
                    .to_string(),
            )
        })?;
        let layer = Layer::new(kind, units, prev.units(), activation, init, ctx)?;
        self.layers.push(layer);
        Ok(())
    }

    pub fn add_regular_layer(
        &mut self,
        units: usize,
        activation: Activation,
        init: WeightInit,
        ctx: &mut InitContext,
    ) -> Result<()> {
        self.add_layer(LayerKind::Regular, units, activation, init, ctx)
    }

    pub fn add_softmax_layer(&mut self, units: usize, init: WeightInit, ctx: &mut InitContext) -> Result<()> {
        self.add_layer(LayerKind::Softmax, units, Activation::None, init, ctx)
    }

    pub fn set_cost(&mut self, cost: Cost) {
        self.cost = cost;
    }

    pub fn cost(&self) -> Cost {
        self.cost
    }

    pub fn set_numeric_policy(&mut self, policy: NumericPolicy) {
        self.numeric_policy = policy;
    }

    pub fn numeric_policy(&self) -> NumericPolicy {
        self.numeric_policy
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Replaces the weights and bias of layer `index`; shapes must match.
    pub fn set_parameters(&mut self, index: usize, weights: Array2<f64>, bias: Array2<f64>) -> Result<()> {
        let layer = self
            .layers
            .get_mut(index)
            .filter(|layer| layer.kind() != LayerKind::Input)
            .ok_or_else(|| NNError::InvalidLayerConfiguration(format!("no trainable layer at index {}", index)))?;
        if weights.dim() != layer.weights().dim() || bias.dim() != layer.bias().dim() {
            return Err(NNError::LayerShapeMismatch(format!(
                "expected W {:?} and b {:?}, got {:?} and {:?}",
                layer.weights().dim(),
                layer.bias().dim(),
                weights.dim(),
                bias.dim()
            )));
        }
        *layer.weights_mut() = weights;
        *layer.bias_mut() = bias;
        Ok(())
    }

    pub fn output_units(&self) -> usize {
        self.layers.last().map_or(0, Layer::units)
    }

    /// Whether `cost.gradient ⊙ dA` of the output layer is the true gradient
    /// w.r.t. its weighted input. Holds for softmax with cross-entropy and for
    /// regular layers with quadratic cost; any other pairing trains on a
    /// distorted gradient.
    pub fn has_exact_output_gradient(&self) -> bool {
        matches!(
            (self.layers.last().map(Layer::kind), self.cost),
            (Some(LayerKind::Softmax), Cost::CrossEntropy) | (Some(LayerKind::Regular), Cost::Quadratic)
        )
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(Layer::parameter_count).sum()
    }

    pub fn summary(&self) -> String {
        let mut res = "\nNetwork\n".to_string();
        res.push_str("-------------------------------------------------------------\n");
        res.push_str("Layer (Type)\t\t Output shape\t\t No.of params\n");
        for layer in self.layers.iter() {
            res.push_str(&format!(
                "{:?} ({:?})\t\t  (None, {})\t\t  {}\n",
                layer.kind(),
                layer.activation(),
                layer.units(),
                layer.parameter_count()
            ));
        }
        res.push_str("-------------------------------------------------------------\n");
        res.push_str(&format!("Cost: {:?} ({:?})\n", self.cost, self.numeric_policy));
        res.push_str(&format!("Total params: {}\n", self.parameter_count()));
        res
    }

    pub(crate) fn check_trainable(&self) -> Result<()> {
        if self.layers.len() < 2 {
            return Err(NNError::EmptyModel);
        }
        Ok(())
    }

    /// Forward pass over a batch (features × batch), updating every layer's
    /// Z, A and dA. Returns the output activations (output units × batch).
    pub fn feedforward(&mut self, input: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_trainable()?;
        self.layers[0].set_input(input)?;
        for i in 1..self.layers.len() {
            let (done, rest) = self.layers.split_at_mut(i);
            let prev = &done[i - 1];
            let layer = &mut rest[0];
            layer.compute_weighted_sum(prev.output())?;
            layer.compute_activations();
            layer.compute_activation_derivatives();
        }
        Ok(self.layers[self.layers.len() - 1].output().clone())
    }

    /// Forward pass that leaves the layers untouched and records Z, A and dA
    /// into `trace`.
    pub(crate) fn forward_trace(layers: &[Layer], input: &Array2<f64>, trace: &mut ForwardTrace) -> Result<()> {
        trace.z.clear();
        trace.a.clear();
        trace.da.clear();
        for layer in layers {
            let z = match trace.a.last() {
                Some(prev) => layer.weighted_sum(prev)?,
                None => layer.weighted_sum(input)?,
            };
            trace.a.push(layer.activations(&z));
            trace.da.push(layer.activation_derivatives(&z));
            trace.z.push(z);
        }
        Ok(())
    }

    /// Side-effect-free forward pass.
    pub fn predict(&self, input: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_trainable()?;
        let mut a = self.layers[0].weighted_sum(input)?;
        for layer in &self.layers[1..] {
            let z = layer.weighted_sum(&a)?;
            a = layer.activations(&z);
        }
        Ok(a)
    }

    /// Accumulates ∇W and ∇b for the batch of the last `feedforward` call.
    pub fn backprop(&mut self, labels: &[u8]) -> Result<()> {
        self.check_trainable()?;
        let batch = self.layers[0].output().ncols();
        if labels.is_empty() || batch != labels.len() {
            return Err(NNError::MissingForwardPass(format!(
                "cached batch has {} columns, got {} labels",
                batch,
                labels.len()
            )));
        }
        let target = encode_targets(labels, self.output_units())?;
        let gradients = {
            let a: Vec<&Array2<f64>> = self.layers.iter().map(Layer::output).collect();
            let da: Vec<&Array2<f64>> = self.layers.iter().map(Layer::activation_derivative).collect();
            layer_gradients(&self.layers, &a, &da, &target, self.cost)?
        };
        for (layer, (grad_w, delta)) in self.layers[1..].iter_mut().zip(gradients) {
            layer.accumulate(&grad_w, &delta);
        }
        Ok(())
    }

    /// Applies the accumulated gradients: optional L2 decay, then descent on
    /// W and b, then clears the accumulators.
    pub fn update_weights(&mut self, eta: f64, lambda: f64, batch_size: usize) -> Result<()> {
        let config = SgdConfig::new(eta, lambda, batch_size);
        config.validate()?;
        self.apply_step(config.step(batch_size));
        Ok(())
    }

    fn apply_step(&mut self, step: Step) {
        for layer in self.layers.iter_mut().skip(1) {
            layer.apply_update(step);
        }
    }

    /// Classification accuracy, average cost and misclassified indices over
    /// the first `count` examples (0 means all).
    pub fn evaluate(&mut self, inputs: &[Array2<f64>], labels: &[u8], count: usize) -> Result<EvaluationResult> {
        let range = eval_range(inputs, labels, count)?;
        let mut tally = Tally::default();
        for i in 0..range {
            let output = self.feedforward(&batch_matrix(&inputs[i..i + 1])?)?;
            tally.record(i, self.score(&output, labels[i])?);
        }
        Ok(tally.finish(range))
    }

    /// Same result as [`Network::evaluate`], computed with the side-effect-free
    /// forward pass on the rayon pool.
    pub fn evaluate_parallel(&self, inputs: &[Array2<f64>], labels: &[u8], count: usize) -> Result<EvaluationResult> {
        let range = eval_range(inputs, labels, count)?;
        let scores: Vec<(bool, f64)> = (0..range)
            .into_par_iter()
            .map(|i| {
                let output = self.predict(&batch_matrix(&inputs[i..i + 1])?)?;
                self.score(&output, labels[i])
            })
            .collect::<Result<Vec<_>>>()?;
        let mut tally = Tally::default();
        for (i, score) in scores.into_iter().enumerate() {
            tally.record(i, score);
        }
        Ok(tally.finish(range))
    }

    fn score(&self, output: &Array2<f64>, label: u8) -> Result<(bool, f64)> {
        let target = encode_targets(&[label], self.output_units())?;
        let cost = self.cost.value(output, &target, self.numeric_policy)?;
        Ok((predicted_label(output.column(0)) == label as usize, cost))
    }

    /// One epoch of serial mini-batch SGD over the examples in order.
    pub fn sgd(&mut self, inputs: &[Array2<f64>], labels: &[u8], config: &SgdConfig) -> Result<()> {
        config.validate()?;
        self.check_trainable()?;
        check_lengths(inputs, labels)?;
        for range in batch_ranges(inputs.len(), config.batch_size) {
            trace!(start = range.start, end = range.end, "serial batch");
            let x = batch_matrix(&inputs[range.clone()])?;
            self.feedforward(&x)?;
            self.backprop(&labels[range.clone()])?;
            self.apply_step(config.step(range.len()));
        }
        Ok(())
    }
}

/// Per-layer `(∇W, δ)` for one batch, aligned with `layers[1..]`.
///
/// `a` and `da` hold every layer's activations and activation derivatives,
/// the input layer included.
pub(crate) fn layer_gradients(
    layers: &[Layer],
    a: &[&Array2<f64>],
    da: &[&Array2<f64>],
    target: &Array2<f64>,
    cost: Cost,
) -> Result<Vec<(Array2<f64>, Array2<f64>)>> {
    let last = layers.len() - 1;
    let mut gradients = Vec::with_capacity(last);
    let mut delta = cost.gradient(a[last], target)? * da[last];
    for l in (1..=last).rev() {
        let grad_w = delta.dot(&a[l - 1].t());
        let next = if l > 1 {
            Some(layers[l].weights().t().dot(&delta) * da[l - 1])
        } else {
            None
        };
        gradients.push((grad_w, delta));
        match next {
            Some(d) => delta = d,
            None => break,
        }
    }
    gradients.reverse();
    Ok(gradients)
}

#[derive(Default)]
struct Tally {
    correct: usize,
    cost: f64,
    misclassified: Vec<usize>,
}

impl Tally {
    fn record(&mut self, index: usize, (hit, cost): (bool, f64)) {
        if hit {
            self.correct += 1;
        } else {
            self.misclassified.push(index);
        }
        self.cost += cost;
    }

    fn finish(self, count: usize) -> EvaluationResult {
        let n = count.max(1) as f64;
        EvaluationResult {
            accuracy: self.correct as f64 / n,
            average_cost: self.cost / n,
            misclassified: self.misclassified,
        }
    }
}

fn check_lengths(inputs: &[Array2<f64>], labels: &[u8]) -> Result<()> {
    if inputs.len() != labels.len() {
        return Err(NNError::LengthMismatch {
            inputs: inputs.len(),
            labels: labels.len(),
        });
    }
    if inputs.is_empty() {
        return Err(NNError::InvalidInputShape("no training examples".to_string()));
    }
    Ok(())
}

fn eval_range(inputs: &[Array2<f64>], labels: &[u8], count: usize) -> Result<usize> {
    if inputs.len() != labels.len() {
        return Err(NNError::LengthMismatch {
            inputs: inputs.len(),
            labels: labels.len(),
        });
    }
    Ok(if count == 0 { inputs.len() } else { count.min(inputs.len()) })
}

/// Example index ranges of consecutive mini-batches; the last one may be short.
pub(crate) fn batch_ranges(examples: usize, batch_size: usize) -> Vec<Range<usize>> {
    (0..examples)
        .step_by(batch_size.max(1))
        .map(|start| start..(start + batch_size).min(examples))
        .collect()
}

/// Stacks examples as columns of one (features × batch) matrix. Examples that
/// are not column vectors are flattened row-major.
pub(crate) fn batch_matrix(examples: &[Array2<f64>]) -> Result<Array2<f64>> {
    let features = examples.first().map_or(0, |x| x.len());
    let mut batch = Array2::zeros((features, examples.len()));
    for (mut column, example) in batch.columns_mut().into_iter().zip(examples) {
        if example.len() != features {
            return Err(NNError::InvalidInputShape(format!(
                "example with {} features in a batch of {}-feature examples",
                example.len(),
                features
            )));
        }
        for (dst, &src) in column.iter_mut().zip(example.iter()) {
            *dst = src;
        }
    }
    Ok(batch)
}

/// Fluent construction of a [`Network`] with a seeded init context.
#[derive(Debug, Clone, Default)]
pub struct NetworkBuilder {
    config: NetworkConfig,
}

impl NetworkBuilder {
    pub fn input(mut self, units: usize) -> Self {
        self.config.layers.push(LayerConfig::input(units));
        self
    }

    pub fn regular(mut self, units: usize, activation: Activation, init: WeightInit) -> Self {
        self.config.layers.push(LayerConfig::regular(units, activation, init));
        self
    }

    pub fn softmax(mut self, units: usize, init: WeightInit) -> Self {
        self.config.layers.push(LayerConfig::softmax(units, init));
        self
    }

    pub fn cost(mut self, cost: Cost) -> Self {
        self.config.cost = cost;
        self
    }

    pub fn numeric_policy(mut self, policy: NumericPolicy) -> Self {
        self.config.numeric_policy = policy;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<Network> {
        self.config.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn small_network(seed: u64) -> Network {
        Network::builder()
            .input(3)
            .regular(4, Activation::Sigmoid, WeightInit::Gaussian)
            .regular(2, Activation::Sigmoid, WeightInit::Gaussian)
            .seed(seed)
            .build()
            .unwrap()
    }

    #[test]
    fn construction_errors() {
        let mut ctx = InitContext::seeded(0);
        let mut net = Network::new(Cost::Quadratic);
        assert!(net
            .add_regular_layer(3, Activation::Sigmoid, WeightInit::Zeros, &mut ctx)
            .is_err());
        net.add_input_layer(2).unwrap();
        assert!(net.add_input_layer(2).is_err());
        assert!(net.feedforward(&Array2::zeros((2, 1))).is_err());
        net.add_regular_layer(3, Activation::Sigmoid, WeightInit::Zeros, &mut ctx).unwrap();
        assert_eq!(net.layer(1).unwrap().units_in_previous(), 2);
    }

    #[test]
    fn feedforward_shape_and_purity() {
        let mut net = small_network(1);
        let x = array![[0.1, 0.2, 0.3, 0.4, 0.5], [1.0, 0.0, 1.0, 0.0, 1.0], [-0.5, 0.5, -0.5, 0.5, 0.0]];
        let before: Vec<Array2<f64>> = net.layers().iter().map(|l| l.weights().clone()).collect();
        let out = net.feedforward(&x).unwrap();
        assert_eq!(out.dim(), (2, 5));
        assert_eq!(out, net.predict(&x).unwrap());
        for (layer, w) in net.layers().iter().zip(before) {
            assert_eq!(layer.weights(), &w);
            assert!(layer.nabla_w().iter().all(|&g| g == 0.0));
        }
    }

    #[test]
    fn forward_trace_matches_feedforward() {
        let mut net = small_network(2);
        let x = array![[0.3], [0.1], [0.9]];
        net.feedforward(&x).unwrap();
        let mut trace = ForwardTrace::default();
        Network::forward_trace(net.layers(), &x, &mut trace).unwrap();
        for (layer, (a, da)) in net.layers().iter().zip(trace.a.iter().zip(&trace.da)) {
            assert_eq!(layer.output(), a);
            assert_eq!(layer.activation_derivative(), da);
        }
        assert_eq!(trace.output().unwrap(), net.layer(2).unwrap().output());
    }

    #[test]
    fn backprop_requires_matching_forward() {
        let mut net = small_network(3);
        assert!(matches!(net.backprop(&[0]), Err(NNError::MissingForwardPass(_))));
        net.feedforward(&Array2::zeros((3, 2))).unwrap();
        assert!(net.backprop(&[0]).is_err());
        assert!(matches!(net.backprop(&[0, 2]), Err(NNError::InvalidLabel { .. })));
        net.backprop(&[0, 1]).unwrap();
        assert_eq!(net.layer(2).unwrap().nabla_b().dim(), (2, 2));
    }

    #[test]
    fn update_clears_accumulators() {
        let mut net = small_network(4);
        net.feedforward(&array![[1.0], [0.0], [1.0]]).unwrap();
        net.backprop(&[1]).unwrap();
        let before = net.layer(1).unwrap().weights().clone();
        net.update_weights(0.5, 0.0, 1).unwrap();
        assert_ne!(net.layer(1).unwrap().weights(), &before);
        for layer in &net.layers()[1..] {
            assert!(layer.nabla_w().iter().all(|&g| g == 0.0));
            assert!(layer.nabla_b().iter().all(|&g| g == 0.0));
        }
        assert!(net.update_weights(0.5, 0.0, 0).is_err());
    }

    #[test]
    fn batch_helpers() {
        let ranges = batch_ranges(7, 3);
        assert_eq!(ranges, vec![0..3, 3..6, 6..7]);
        let m = batch_matrix(&[array![[1.0], [2.0]], array![[3.0, 4.0]]]).unwrap();
        assert_eq!(m, array![[1.0, 3.0], [2.0, 4.0]]);
        assert!(batch_matrix(&[array![[1.0], [2.0]], array![[3.0]]]).is_err());
    }

    #[test]
    fn exact_pairings() {
        let mut net = small_network(5);
        assert!(net.has_exact_output_gradient());
        net.set_cost(Cost::CrossEntropy);
        assert!(!net.has_exact_output_gradient());
        let softmax = Network::builder()
            .input(2)
            .softmax(3, WeightInit::Zeros)
            .cost(Cost::CrossEntropy)
            .build()
            .unwrap();
        assert!(softmax.has_exact_output_gradient());
    }
}
