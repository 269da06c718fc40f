use crate::prelude::*;

/// Mini-batch SGD hyperparameters.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct SgdConfig {
    /// Learning rate η.
    pub eta: f64,
    /// L2 regularization coefficient λ; zero disables weight decay.
    pub lambda: f64,
    pub batch_size: usize,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            eta: 0.5,
            lambda: 0.0,
            batch_size: 10,
        }
    }
}

impl SgdConfig {
    pub fn new(eta: f64, lambda: f64, batch_size: usize) -> Self {
        Self { eta, lambda, batch_size }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(NNError::InvalidConfig("batch size must be greater than 0".to_string()));
        }
        if !self.eta.is_finite() || !self.lambda.is_finite() {
            return Err(NNError::InvalidConfig(format!(
                "eta ({}) and lambda ({}) must be finite",
                self.eta, self.lambda
            )));
        }
        Ok(())
    }

    /// Step coefficients for one update over `batch_size` accumulated examples.
    pub(crate) fn step(&self, batch_size: usize) -> Step {
        let n = batch_size as f64;
        Step {
            rate: self.eta / n,
            decay: if self.lambda != 0.0 {
                Some(1.0 - self.eta * self.lambda / n)
            } else {
                None
            },
        }
    }
}

/// How parallel workers publish their updates to the shared weights.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consistency {
    /// Updates are serialized by a mutex: every update is applied whole and
    /// none is lost. Only the interleaving order varies between runs.
    #[default]
    Strict,
    /// Hogwild!-style updates without a lock. Each element is read and written
    /// atomically, but a read-modify-write racing with another worker's may
    /// overwrite it, so some gradient contributions are lost. SGD tolerates
    /// this noise; in exchange workers never wait on each other.
    Relaxed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ParallelConfig {
    pub consistency: Consistency,
    /// Worker threads; `None` uses the available hardware parallelism.
    pub workers: Option<usize>,
}

impl ParallelConfig {
    pub fn new(consistency: Consistency, workers: Option<usize>) -> Self {
        Self { consistency, workers }
    }

    pub fn worker_count(&self) -> Result<usize> {
        match self.workers {
            Some(0) => Err(NNError::InvalidConfig("worker count must be greater than 0".to_string())),
            Some(n) => Ok(n),
            None => Ok(std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Step {
    pub rate: f64,
    pub decay: Option<f64>,
}

impl Step {
    /// New value of one weight. The serial and the parallel update both go
    /// through here so they stay bit-identical.
    #[inline]
    pub fn weight(&self, w: f64, grad: f64) -> f64 {
        let w = match self.decay {
            Some(decay) => w * decay,
            None => w,
        };
        self.descend(w, grad)
    }

    #[inline]
    pub fn descend(&self, p: f64, grad: f64) -> f64 {
        p - self.rate * grad
    }
}

/// Applies one SGD step to a layer's parameters in place.
///
/// `nabla_b` holds one column per accumulated example; they are subtracted
/// from the bias one column at a time.
pub(crate) fn apply_sgd_step(
    weights: &mut Array2<f64>,
    bias: &mut Array2<f64>,
    nabla_w: &Array2<f64>,
    nabla_b: &Array2<f64>,
    step: Step,
) {
    Zip::from(weights)
        .and(nabla_w)
        .for_each(|w, &g| *w = step.weight(*w, g));
    for grad in nabla_b.columns() {
        Zip::from(bias.column_mut(0))
            .and(grad)
            .for_each(|b, &g| *b = step.descend(*b, g));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn plain_step_without_decay() {
        let mut w = array![[1.0, 2.0]];
        let mut b = array![[0.5]];
        let step = SgdConfig::new(1.0, 0.0, 2).step(2);
        assert_eq!(step.decay, None);
        apply_sgd_step(&mut w, &mut b, &array![[2.0, 4.0]], &array![[1.0, 3.0]], step);
        assert_eq!(w, array![[0.0, 0.0]]);
        assert_eq!(b, array![[-1.5]]);
    }

    #[test]
    fn decay_shrinks_weights_not_biases() {
        let mut w = array![[2.0]];
        let mut b = array![[2.0]];
        let step = SgdConfig::new(0.5, 0.4, 1).step(1);
        apply_sgd_step(&mut w, &mut b, &array![[0.0]], &array![[0.0]], step);
        assert!((w[[0, 0]] - 2.0 * 0.8).abs() < 1e-12);
        assert_eq!(b[[0, 0]], 2.0);
    }

    #[test]
    fn validation() {
        assert!(SgdConfig::new(0.1, 0.0, 0).validate().is_err());
        assert!(SgdConfig::new(f64::NAN, 0.0, 1).validate().is_err());
        assert!(SgdConfig::default().validate().is_ok());
        assert!(ParallelConfig::new(Consistency::Strict, Some(0)).worker_count().is_err());
        assert!(ParallelConfig::default().worker_count().unwrap() >= 1);
    }
}
