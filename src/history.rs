use std::path::Path;

use csv::Writer;

use crate::prelude::*;

/// Metrics recorded at one epoch boundary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EpochRecord {
    /// 1-based epoch number.
    pub epoch: usize,
    pub accuracy: f64,
    pub average_cost: f64,
    pub misclassified: usize,
    pub elapsed_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn push(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn epoch_axis(&self) -> Vec<f64> {
        self.epochs.iter().map(|r| r.epoch as f64).collect()
    }

    pub fn accuracies(&self) -> Vec<f64> {
        self.epochs.iter().map(|r| r.accuracy).collect()
    }

    pub fn costs(&self) -> Vec<f64> {
        self.epochs.iter().map(|r| r.average_cost).collect()
    }

    pub fn best_accuracy(&self) -> Option<&EpochRecord> {
        self.epochs
            .iter()
            .max_by(|a, b| a.accuracy.total_cmp(&b.accuracy))
    }

    /// Writes one CSV row per epoch, with a header.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut wtr = Writer::from_path(path)?;
        for record in &self.epochs {
            wtr.serialize(record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}
