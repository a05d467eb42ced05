//! Running metrics for the training driver
//!
//! - Running averages of every MDD loss component
//! - Target-domain accuracy from predicted vs. held-out labels

use serde::{Deserialize, Serialize};

use crate::training::loss::LossValues;

/// Running mean of a scalar
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// Current average, 0.0 before the first value
    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }
}

/// Running averages of the MDD loss decomposition
#[derive(Debug, Clone, Default)]
pub struct LossMeter {
    total: RunningAverage,
    classifier: RunningAverage,
    transfer: RunningAverage,
    adv_src: RunningAverage,
    adv_tgt: RunningAverage,
}

impl LossMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, values: &LossValues) {
        self.total.add(values.total);
        self.classifier.add(values.classifier);
        self.transfer.add(values.transfer);
        self.adv_src.add(values.adv_src);
        self.adv_tgt.add(values.adv_tgt);
    }

    /// Averages since the last reset
    pub fn averages(&self) -> LossValues {
        LossValues {
            total: self.total.average(),
            classifier: self.classifier.average(),
            transfer: self.transfer.average(),
            adv_src: self.adv_src.average(),
            adv_tgt: self.adv_tgt.average(),
        }
    }

    pub fn count(&self) -> usize {
        self.total.count()
    }

    pub fn reset(&mut self) {
        self.total.reset();
        self.classifier.reset();
        self.transfer.reset();
        self.adv_src.reset();
        self.adv_tgt.reset();
    }
}

/// Accuracy tracker for evaluation passes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccuracyTracker {
    correct: usize,
    total: usize,
}

impl AccuracyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch of predictions
    pub fn add_batch(&mut self, predictions: &[usize], ground_truth: &[usize]) {
        for (pred, gt) in predictions.iter().zip(ground_truth.iter()) {
            self.total += 1;
            if pred == gt {
                self.correct += 1;
            }
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.total > 0 {
            self.correct as f64 / self.total as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.total
    }
}
