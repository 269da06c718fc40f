use crate::prelude::*;
use ndarray_rand::rand_distr::Normal;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightInit {
    Zeros,
    /// N(0, 1)
    Gaussian,
    /// N(0, 1/√fan_in)
    #[default]
    WeightedGaussian,
    /// U[0, 1)
    Uniform,
    /// 0, 1, 2, ... drawn from the context counter in row-major order.
    SequentialDebug,
}

/// Randomness source for weight initialization.
///
/// Every initialization call borrows a context explicitly, so two networks
/// built from contexts with the same seed get the same weights.
#[derive(Debug, Clone)]
pub struct InitContext {
    rng: StdRng,
    counter: u64,
}

impl InitContext {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            counter: 0,
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            counter: 0,
        }
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Fills a fresh `rows × cols` matrix. `fan_in` only matters for
    /// [`WeightInit::WeightedGaussian`].
    pub fn fill(&mut self, init: WeightInit, rows: usize, cols: usize, fan_in: usize) -> Result<Array2<f64>> {
        Ok(match init {
            WeightInit::Zeros => Array2::zeros((rows, cols)),
            WeightInit::Gaussian => Array2::random_using((rows, cols), normal(1.0)?, &mut self.rng),
            WeightInit::WeightedGaussian => {
                if fan_in == 0 {
                    return Err(NNError::InvalidLayerConfiguration(
                        "weighted gaussian initialization needs a fan-in greater than 0".to_string(),
                    ));
                }
                let std_dev = 1.0 / (fan_in as f64).sqrt();
                Array2::random_using((rows, cols), normal(std_dev)?, &mut self.rng)
            }
            WeightInit::Uniform => Array2::random_using((rows, cols), Uniform::new(0.0, 1.0), &mut self.rng),
            WeightInit::SequentialDebug => Array2::from_shape_fn((rows, cols), |_| {
                let value = self.counter as f64;
                self.counter += 1;
                value
            }),
        })
    }
}

impl Default for InitContext {
    fn default() -> Self {
        Self::from_entropy()
    }
}

fn normal(std_dev: f64) -> Result<Normal<f64>> {
    Normal::new(0.0, std_dev)
        .map_err(|e| NNError::InvalidLayerConfiguration(format!("normal distribution: {}", e)))
}
