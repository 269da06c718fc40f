use crate::prelude::*;
use tracing::warn;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cost {
    #[default]
    Quadratic,
    CrossEntropy,
}

/// How cross-entropy treats terms that evaluate to NaN or infinity
/// (outputs of exactly 0 or 1).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumericPolicy {
    /// Non-finite terms are clamped to zero before summation.
    #[default]
    Lenient,
    /// A non-finite term aborts the computation with an error.
    Strict,
}

impl Cost {
    pub fn value(
        &self,
        output: &Array2<f64>,
        target: &Array2<f64>,
        policy: NumericPolicy,
    ) -> Result<f64> {
        check_shapes(output, target)?;
        match self {
            Self::Quadratic => Ok(0.5 * (output - target).mapv(|d| d * d).sum()),
            Self::CrossEntropy => cross_entropy(output, target, policy),
        }
    }

    /// Gradient of the cost w.r.t. the network output.
    ///
    /// Both costs return `output - target`. For quadratic cost this is exact.
    /// For cross-entropy it is the combined gradient w.r.t. the softmax logits,
    /// which is why a softmax layer reports a derivative of one.
    pub fn gradient(&self, output: &Array2<f64>, target: &Array2<f64>) -> Result<Array2<f64>> {
        check_shapes(output, target)?;
        Ok(output - target)
    }
}

fn check_shapes(output: &Array2<f64>, target: &Array2<f64>) -> Result<()> {
    if output.shape() != target.shape() {
        return Err(NNError::InvalidOutputShape(format!(
            "Prediction shape {:?} doesn't match target shape {:?}",
            output.shape(),
            target.shape()
        )));
    }
    Ok(())
}

fn cross_entropy(output: &Array2<f64>, target: &Array2<f64>, policy: NumericPolicy) -> Result<f64> {
    let mut cost = 0.0;
    let mut clamped = 0usize;
    for (&o, &t) in output.iter().zip(target.iter()) {
        let term = t * o.ln() + (1.0 - t) * (1.0 - o).ln();
        if term.is_finite() {
            cost -= term;
            continue;
        }
        match policy {
            NumericPolicy::Lenient => clamped += 1,
            NumericPolicy::Strict => {
                return Err(NNError::ComputationError(format!(
                    "cross-entropy term is {} (output {}, target {})",
                    if term.is_nan() { "NaN" } else { "infinite" },
                    o,
                    t
                )))
            }
        }
    }
    if clamped > 0 {
        warn!(clamped, "clamped non-finite cross-entropy terms to zero");
    }
    Ok(cost)
}

/// One-hot target matrix (units × labels.len()), one column per label.
pub fn one_hot(labels: &[u8], units: usize) -> Result<Array2<f64>> {
    let mut target = Array2::zeros((units, labels.len()));
    for (col, &label) in labels.iter().enumerate() {
        let label = label as usize;
        if label >= units {
            return Err(NNError::InvalidLabel { label, units });
        }
        target[[label, col]] = 1.0;
    }
    Ok(target)
}

/// Target matrix for `labels` against an output layer of `units` units.
///
/// A single output unit is a binary classifier and is trained towards the
/// label itself (0 or 1); wider layers get [`one_hot`] columns.
pub fn encode_targets(labels: &[u8], units: usize) -> Result<Array2<f64>> {
    if units != 1 {
        return one_hot(labels, units);
    }
    let mut target = Array2::zeros((1, labels.len()));
    for (col, &label) in labels.iter().enumerate() {
        if label > 1 {
            return Err(NNError::InvalidLabel {
                label: label as usize,
                units: 2,
            });
        }
        target[[0, col]] = f64::from(label);
    }
    Ok(target)
}

/// Class predicted by one output column: the first maximal row, or for a
/// single unit whether it reaches 0.5.
pub fn predicted_label(column: ArrayView1<f64>) -> usize {
    if column.len() == 1 {
        return usize::from(column[0] >= 0.5);
    }
    column
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, max), (i, &x)| if x > max { (i, x) } else { (best, max) })
        .0
}
