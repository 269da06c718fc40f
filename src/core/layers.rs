use crate::prelude::*;
use crate::core::activations::softmax;
use crate::core::optimizers::{apply_sgd_step, Step};
use tracing::debug;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// Holds the external input; owns no parameters.
    Input,
    /// Elementwise activation of `W·x + b`.
    Regular,
    /// Column-wise softmax of `W·x + b`.
    ///
    /// Reports a derivative of one, so backprop is only exact when paired with
    /// [`Cost::CrossEntropy`], whose gradient `a - y` already is the combined
    /// softmax/cross-entropy gradient w.r.t. the logits.
    Softmax,
}

/// One layer of a feedforward network.
///
/// Parameters (`W`, `b`) change only in the update step. The caches (`Z`, `A`,
/// `dA`) and gradient accumulators (`∇W`, `∇b`) are per-call state; the
/// `&self` methods ([`Layer::weighted_sum`], [`Layer::activations`],
/// [`Layer::activation_derivatives`]) never touch them, which is what parallel
/// workers use.
#[derive(Debug, Clone)]
pub struct Layer {
    kind: LayerKind,
    units: usize,
    units_in_previous: usize,
    activation: Activation,
    w: Array2<f64>,
    b: Array2<f64>,
    z: Array2<f64>,
    a: Array2<f64>,
    da: Array2<f64>,
    nabla_w: Array2<f64>,
    nabla_b: Array2<f64>,
}

impl Layer {
    pub fn input(units: usize) -> Result<Self> {
        if units == 0 {
            return Err(NNError::InvalidLayerConfiguration(
                "Input layer must have at least one unit".to_string(),
            ));
        }
        Ok(Self {
            kind: LayerKind::Input,
            units,
            units_in_previous: 0,
            activation: Activation::None,
            w: Array2::zeros((0, 0)),
            b: Array2::zeros((0, 0)),
            z: Array2::zeros((0, 0)),
            a: Array2::zeros((0, 0)),
            da: Array2::zeros((0, 0)),
            nabla_w: Array2::zeros((0, 0)),
            nabla_b: Array2::zeros((0, 0)),
        })
    }

    /// Builds a parameterized (regular or softmax) layer fed by `units_in_previous` units.
    pub fn new(
        kind: LayerKind,
        units: usize,
        units_in_previous: usize,
        activation: Activation,
        init: WeightInit,
        ctx: &mut InitContext,
    ) -> Result<Self> {
        if units == 0 || units_in_previous == 0 {
            return Err(NNError::InvalidLayerConfiguration(
                "Layer dimensions must be greater than 0".to_string(),
            ));
        }
        match kind {
            LayerKind::Input => {
                return Err(NNError::InvalidLayerConfiguration(
                    "Input layers carry no weights, use Layer::input".to_string(),
                ))
            }
            LayerKind::Softmax if activation != Activation::None => {
                return Err(NNError::InvalidLayerConfiguration(format!(
                    "Softmax layers apply softmax themselves, got activation {:?}",
                    activation
                )))
            }
            _ => (),
        }
        let w = ctx.fill(init, units, units_in_previous, units_in_previous)?;
        let b = ctx.fill(init, units, 1, units_in_previous)?;
        Ok(Self {
            kind,
            units,
            units_in_previous,
            activation,
            nabla_w: Array2::zeros(w.raw_dim()),
            nabla_b: Array2::zeros((units, 0)),
            w,
            b,
            z: Array2::zeros((0, 0)),
            a: Array2::zeros((0, 0)),
            da: Array2::zeros((0, 0)),
        })
    }

    /// Copy of the layer's definition and parameters with empty caches and
    /// zeroed accumulators.
    pub fn detached(&self) -> Self {
        Self {
            kind: self.kind,
            units: self.units,
            units_in_previous: self.units_in_previous,
            activation: self.activation,
            w: self.w.clone(),
            b: self.b.clone(),
            z: Array2::zeros((0, 0)),
            a: Array2::zeros((0, 0)),
            da: Array2::zeros((0, 0)),
            nabla_w: Array2::zeros(self.nabla_w.raw_dim()),
            nabla_b: Array2::zeros((self.nabla_b.nrows(), 0)),
        }
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn units_in_previous(&self) -> usize {
        self.units_in_previous
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn parameter_count(&self) -> usize {
        self.w.len() + self.b.len()
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.w
    }

    pub fn bias(&self) -> &Array2<f64> {
        &self.b
    }

    pub(crate) fn weights_mut(&mut self) -> &mut Array2<f64> {
        &mut self.w
    }

    pub(crate) fn bias_mut(&mut self) -> &mut Array2<f64> {
        &mut self.b
    }

    pub fn nabla_w(&self) -> &Array2<f64> {
        &self.nabla_w
    }

    pub fn nabla_b(&self) -> &Array2<f64> {
        &self.nabla_b
    }

    /// Z of the last forward call.
    pub fn weighted_input(&self) -> &Array2<f64> {
        &self.z
    }

    /// A of the last forward call.
    pub fn output(&self) -> &Array2<f64> {
        &self.a
    }

    /// dA of the last forward call.
    pub fn activation_derivative(&self) -> &Array2<f64> {
        &self.da
    }

    /// `W·input + b`, the bias broadcast over every batch column.
    /// The input layer passes its input through.
    pub fn weighted_sum(&self, input: &Array2<f64>) -> Result<Array2<f64>> {
        if self.kind == LayerKind::Input {
            if input.nrows() != self.units {
                return Err(NNError::InvalidInputShape(format!(
                    "input layer has {} units, got {} rows",
                    self.units,
                    input.nrows()
                )));
            }
            return Ok(input.clone());
        }
        if input.nrows() != self.w.ncols() {
            return Err(NNError::LayerShapeMismatch(format!(
                "weights are {:?}, input has {} rows",
                self.w.dim(),
                input.nrows()
            )));
        }
        Ok(self.w.dot(input) + &self.b)
    }

    pub fn activations(&self, z: &Array2<f64>) -> Array2<f64> {
        match self.kind {
            LayerKind::Input => z.clone(),
            LayerKind::Regular => self.activation.forward(z),
            LayerKind::Softmax => softmax(z),
        }
    }

    pub fn activation_derivatives(&self, z: &Array2<f64>) -> Array2<f64> {
        match self.kind {
            LayerKind::Input | LayerKind::Softmax => Array2::ones(z.raw_dim()),
            LayerKind::Regular => self.activation.backward(z),
        }
    }

    /// Stores the external input as this layer's Z and A.
    pub fn set_input(&mut self, input: &Array2<f64>) -> Result<()> {
        self.compute_weighted_sum(input)?;
        self.a = self.z.clone();
        self.da = Array2::ones(self.z.raw_dim());
        Ok(())
    }

    pub fn compute_weighted_sum(&mut self, input: &Array2<f64>) -> Result<()> {
        self.z = self.weighted_sum(input)?;
        Ok(())
    }

    /// Fills A from the stored Z.
    pub fn compute_activations(&mut self) {
        self.a = self.activations(&self.z);
    }

    /// Fills dA from the stored Z.
    pub fn compute_activation_derivatives(&mut self) {
        self.da = self.activation_derivatives(&self.z);
    }

    /// Adds one batch worth of gradients: `grad_w` shaped like W, `delta`
    /// with one column per example.
    ///
    /// When the batch width changes, bias gradients still pending are summed
    /// into the first column of the resized accumulator so ∇b keeps covering
    /// the same examples as ∇W.
    pub(crate) fn accumulate(&mut self, grad_w: &Array2<f64>, delta: &Array2<f64>) {
        if self.nabla_b.dim() != delta.dim() {
            debug!(
                from = ?self.nabla_b.dim(),
                to = ?delta.dim(),
                "resizing bias gradient accumulator"
            );
            let mut resized = Array2::<f64>::zeros(delta.raw_dim());
            if self.nabla_b.iter().any(|&g| g != 0.0) && resized.ncols() > 0 {
                resized
                    .column_mut(0)
                    .assign(&self.nabla_b.sum_axis(Axis(1)));
            }
            self.nabla_b = resized;
        }
        self.nabla_w += grad_w;
        self.nabla_b += delta;
    }

    pub(crate) fn clear_gradients(&mut self) {
        self.nabla_w.fill(0.0);
        self.nabla_b.fill(0.0);
    }

    pub(crate) fn apply_update(&mut self, step: Step) {
        if self.kind == LayerKind::Input {
            return;
        }
        apply_sgd_step(&mut self.w, &mut self.b, &self.nabla_w, &self.nabla_b, step);
        self.clear_gradients();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn debug_layer(kind: LayerKind, activation: Activation) -> Layer {
        let mut ctx = InitContext::seeded(0);
        Layer::new(kind, 2, 3, activation, WeightInit::SequentialDebug, &mut ctx).unwrap()
    }

    #[test]
    fn shapes_follow_units() {
        let layer = debug_layer(LayerKind::Regular, Activation::Sigmoid);
        assert_eq!(layer.weights().dim(), (2, 3));
        assert_eq!(layer.bias().dim(), (2, 1));
        assert_eq!(layer.nabla_w().dim(), (2, 3));
        assert_eq!(layer.parameter_count(), 8);
    }

    #[test]
    fn weighted_sum_broadcasts_bias() {
        // W = [[0,1,2],[3,4,5]], b = [[6],[7]]
        let layer = debug_layer(LayerKind::Regular, Activation::Linear);
        let x = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let z = layer.weighted_sum(&x).unwrap();
        assert_eq!(z, array![[8.0, 9.0], [15.0, 16.0]]);
    }

    #[test]
    fn mismatched_input_is_an_error() {
        let layer = debug_layer(LayerKind::Regular, Activation::Linear);
        let x = array![[1.0], [2.0]];
        assert!(matches!(layer.weighted_sum(&x), Err(NNError::LayerShapeMismatch(_))));
        let input = Layer::input(3).unwrap();
        assert!(input.weighted_sum(&x).is_err());
    }

    #[test]
    fn mutating_and_explicit_forms_agree() {
        let mut layer = debug_layer(LayerKind::Regular, Activation::Tanh);
        let x = array![[0.1], [-0.2], [0.05]];
        let z = layer.weighted_sum(&x).unwrap();
        layer.compute_weighted_sum(&x).unwrap();
        layer.compute_activations();
        layer.compute_activation_derivatives();
        assert_eq!(layer.weighted_input(), &z);
        assert_eq!(layer.output(), &layer.activations(&z));
        assert_eq!(layer.activation_derivative(), &layer.activation_derivatives(&z));
    }

    #[test]
    fn softmax_layer_has_unit_derivative() {
        let layer = debug_layer(LayerKind::Softmax, Activation::None);
        let z = array![[1.0, -3.0], [2.0, 4.0]];
        assert_eq!(layer.activation_derivatives(&z), Array2::<f64>::ones((2, 2)));
        let a = layer.activations(&z);
        assert!((a.column(0).sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn invalid_constructions() {
        let mut ctx = InitContext::seeded(0);
        assert!(Layer::input(0).is_err());
        assert!(Layer::new(LayerKind::Regular, 0, 3, Activation::Relu, WeightInit::Zeros, &mut ctx).is_err());
        assert!(Layer::new(LayerKind::Input, 2, 3, Activation::None, WeightInit::Zeros, &mut ctx).is_err());
        assert!(Layer::new(LayerKind::Softmax, 2, 3, Activation::Sigmoid, WeightInit::Zeros, &mut ctx).is_err());
    }

    #[test]
    fn accumulators_resize_and_clear() {
        let mut layer = debug_layer(LayerKind::Regular, Activation::Linear);
        let gw = Array2::ones((2, 3));
        layer.accumulate(&gw, &Array2::ones((2, 4)));
        layer.accumulate(&gw, &Array2::ones((2, 4)));
        assert_eq!(layer.nabla_w()[[1, 2]], 2.0);
        assert_eq!(layer.nabla_b().dim(), (2, 4));
        layer.clear_gradients();
        layer.accumulate(&gw, &Array2::ones((2, 1)));
        assert_eq!(layer.nabla_b(), &Array2::<f64>::ones((2, 1)));
        layer.clear_gradients();
        assert!(layer.nabla_w().iter().all(|&g| g == 0.0));
        assert!(layer.nabla_b().iter().all(|&g| g == 0.0));
    }

    #[test]
    fn bias_gradients_survive_a_batch_width_change() {
        let mut layer = debug_layer(LayerKind::Regular, Activation::Linear);
        let gw = Array2::ones((2, 3));
        layer.accumulate(&gw, &array![[1.0, 2.0], [3.0, 4.0]]);
        layer.accumulate(&gw, &array![[5.0], [6.0]]);
        assert_eq!(layer.nabla_w()[[0, 0]], 2.0);
        assert_eq!(layer.nabla_b(), &array![[8.0], [13.0]]);

        let bias = layer.bias().clone();
        layer.apply_update(SgdConfig::new(1.0, 0.0, 1).step(1));
        assert_eq!(layer.bias(), &(&bias - &array![[8.0], [13.0]]));
    }

    #[test]
    fn detached_copy_keeps_parameters_only() {
        let mut layer = debug_layer(LayerKind::Regular, Activation::Linear);
        layer.compute_weighted_sum(&Array2::ones((3, 2))).unwrap();
        let copy = layer.detached();
        assert_eq!(copy.weights(), layer.weights());
        assert_eq!(copy.weighted_input().len(), 0);
    }
}
