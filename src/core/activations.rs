use crate::prelude::*;

const LEAKY_SLOPE: f64 = 0.001;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    /// Identity. Used by input and softmax layers, whose transform is fixed by the layer kind.
    #[default]
    None,
    Linear,
    Sigmoid,
    Relu,
    LeakyRelu,
    Tanh,
}

impl Activation {
    pub fn value(&self, x: f64) -> f64 {
        match self {
            Self::None | Self::Linear => x,
            Self::Sigmoid => sigmoid(x),
            Self::Relu => x.max(0.0),
            Self::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    LEAKY_SLOPE * x
                }
            }
            Self::Tanh => x.tanh(),
        }
    }

    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            Self::None | Self::Linear => 1.0,
            Self::Sigmoid => {
                let s = sigmoid(x);
                s * (1.0 - s)
            }
            Self::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::LeakyRelu => {
                if x > 0.0 {
                    1.0
                } else {
                    LEAKY_SLOPE
                }
            }
            Self::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
        }
    }

    pub fn forward(&self, z: &Array2<f64>) -> Array2<f64> {
        z.mapv(|z| self.value(z))
    }

    pub fn backward(&self, z: &Array2<f64>) -> Array2<f64> {
        z.mapv(|z| self.derivative(z))
    }
}

// exp(-x) saturates to inf for very negative x, which still yields 0.0 here
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Column-wise softmax: every column of `z` is one example's score vector.
///
/// The column maximum is subtracted before exponentiation so large scores
/// cannot overflow.
pub fn softmax(z: &Array2<f64>) -> Array2<f64> {
    let mut out = z.clone();
    for mut column in out.columns_mut() {
        let max = column.fold(f64::NEG_INFINITY, |m, &x| m.max(x));
        column.mapv_inplace(|x| (x - max).exp());
        let sum = column.sum();
        column.mapv_inplace(|x| x / sum);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn scalar_values() {
        assert!((Activation::Sigmoid.value(0.0) - 0.5).abs() < 1e-12);
        assert_eq!(Activation::Relu.value(-1.0), 0.0);
        assert_eq!(Activation::Relu.value(2.0), 2.0);
        assert_eq!(Activation::LeakyRelu.value(-2.0), -0.002);
        assert!(Activation::Tanh.value(0.0).abs() < 1e-12);
        assert_eq!(Activation::Linear.value(5.0), 5.0);
        assert_eq!(Activation::None.value(-3.0), -3.0);
    }

    #[test]
    fn scalar_derivatives() {
        assert!((Activation::Sigmoid.derivative(0.0) - 0.25).abs() < 1e-12);
        assert_eq!(Activation::Relu.derivative(-1.0), 0.0);
        assert_eq!(Activation::Relu.derivative(2.0), 1.0);
        assert_eq!(Activation::LeakyRelu.derivative(-1.0), LEAKY_SLOPE);
        assert!((Activation::Tanh.derivative(0.0) - 1.0).abs() < 1e-12);
        assert_eq!(Activation::Linear.derivative(5.0), 1.0);
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let h = 1e-6;
        for act in [Activation::Sigmoid, Activation::Tanh, Activation::Linear] {
            for &x in &[-2.0, -0.3, 0.7, 1.9] {
                let numeric = (act.value(x + h) - act.value(x - h)) / (2.0 * h);
                assert!((numeric - act.derivative(x)).abs() < 1e-6, "{:?} at {}", act, x);
            }
        }
    }

    #[test]
    fn sigmoid_saturates_without_nan() {
        assert_eq!(Activation::Sigmoid.value(-1000.0), 0.0);
        assert_eq!(Activation::Sigmoid.value(1000.0), 1.0);
        assert_eq!(Activation::Sigmoid.derivative(-1000.0), 0.0);
    }

    #[test]
    fn softmax_is_column_wise() {
        let z = array![[1.0, 1000.0], [2.0, 1000.0], [3.0, -1000.0]];
        let s = softmax(&z);
        for column in s.columns() {
            assert!((column.sum() - 1.0).abs() < 1e-12);
        }
        assert!((s[[0, 1]] - 0.5).abs() < 1e-12);
        assert!(s[[2, 1]] < 1e-300);
        assert!(s[[2, 0]] > s[[1, 0]] && s[[1, 0]] > s[[0, 0]]);
    }
}
