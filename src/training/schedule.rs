//! Gradient-reversal coefficient schedule
//!
//! The reversal strength ramps from `low_value` towards `high_value` along a
//! sigmoid in training progress:
//!
//! ```text
//! coeff = 2 (high - low) / (1 + exp(-alpha * iter_num / max_iter)) - (high - low) + low
//! ```
//!
//! At `iter_num = 0` the coefficient is exactly `low_value`; it never
//! decreases as `iter_num` grows and saturates at `high_value`.

use serde::{Deserialize, Serialize};

use crate::utils::error::{MddError, Result};

/// Bound on `|alpha * iter_num / max_iter|` before exponentiation.
///
/// `exp(-60)` is far below f64 resolution around 1.0, so the clamp does not
/// change any representable coefficient.
const MAX_EXPONENT: f64 = 60.0;

/// Reversal coefficient for a given point in training.
pub fn coefficient(iter_num: u64, alpha: f64, low_value: f64, high_value: f64, max_iter: f64) -> f64 {
    let span = high_value - low_value;
    let progress = (alpha * iter_num as f64 / max_iter).clamp(-MAX_EXPONENT, MAX_EXPONENT);
    2.0 * span / (1.0 + (-progress).exp()) - span + low_value
}

/// Schedule parameters as they appear in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Starting value of the iteration counter
    pub iter_num: u64,
    /// Steepness of the ramp
    pub alpha: f64,
    /// Coefficient at iteration 0
    pub low_value: f64,
    /// Asymptotic coefficient
    pub high_value: f64,
    /// Iteration count that `alpha` is measured against
    pub max_iter: f64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            iter_num: 0,
            alpha: 1.0,
            low_value: 0.0,
            high_value: 0.1,
            max_iter: 1000.0,
        }
    }
}

impl ScheduleConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.max_iter.is_finite() && self.max_iter > 0.0) {
            return Err(MddError::Config(format!(
                "schedule.max_iter must be a positive finite number, got {}",
                self.max_iter
            )));
        }

        for (name, value) in [
            ("alpha", self.alpha),
            ("low_value", self.low_value),
            ("high_value", self.high_value),
        ] {
            if !value.is_finite() {
                return Err(MddError::Config(format!(
                    "schedule.{} must be finite, got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }
}

/// Schedule state at one point in training.
///
/// A copy of this is what a gradient-reversal node captures on the forward
/// pass, so later advances never leak into an earlier backward pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub iter_num: u64,
    pub alpha: f64,
    pub low_value: f64,
    pub high_value: f64,
    pub max_iter: f64,
}

impl ScheduleState {
    pub fn coefficient(&self) -> f64 {
        coefficient(
            self.iter_num,
            self.alpha,
            self.low_value,
            self.high_value,
            self.max_iter,
        )
    }
}

impl From<ScheduleConfig> for ScheduleState {
    fn from(config: ScheduleConfig) -> Self {
        Self {
            iter_num: config.iter_num,
            alpha: config.alpha,
            low_value: config.low_value,
            high_value: config.high_value,
            max_iter: config.max_iter,
        }
    }
}

/// Owner of the mutable schedule counter.
///
/// Nothing advances it implicitly: the training path calls [`advance`]
/// right before the forward pass whose reversal it parameterizes.
///
/// [`advance`]: GrlScheduler::advance
#[derive(Debug, Clone)]
pub struct GrlScheduler {
    state: ScheduleState,
}

impl GrlScheduler {
    pub fn new(config: ScheduleConfig) -> Self {
        Self {
            state: config.into(),
        }
    }

    /// Increment the counter and return the state to use for this forward pass
    pub fn advance(&mut self) -> ScheduleState {
        self.state.iter_num = self.state.iter_num.saturating_add(1);
        self.state
    }

    /// Current state without advancing
    pub fn state(&self) -> ScheduleState {
        self.state
    }

    pub fn iter_num(&self) -> u64 {
        self.state.iter_num
    }

    /// Coefficient for the current state
    pub fn coefficient(&self) -> f64 {
        self.state.coefficient()
    }
}

impl Default for GrlScheduler {
    fn default() -> Self {
        Self::new(ScheduleConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_zero_is_low_value() {
        for (low, high) in [(0.0, 0.1), (0.05, 0.5), (-0.3, 0.7), (0.2, 0.2)] {
            assert_eq!(coefficient(0, 1.0, low, high, 1000.0), low);
            assert_eq!(coefficient(0, 10.0, low, high, 3.0), low);
        }
    }

    #[test]
    fn test_monotonic_non_decreasing() {
        let mut previous = coefficient(0, 1.0, 0.0, 0.1, 1000.0);
        for iter in (1..200_000).step_by(97) {
            let current = coefficient(iter, 1.0, 0.0, 0.1, 1000.0);
            assert!(current >= previous, "iter {}: {} < {}", iter, current, previous);
            previous = current;
        }
    }

    #[test]
    fn test_limit_is_high_value() {
        let far = coefficient(10_000_000, 1.0, 0.0, 0.1, 1000.0);
        assert!((far - 0.1).abs() < 1e-12);

        let far = coefficient(50_000, 10.0, 0.25, 0.75, 100.0);
        assert!((far - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_huge_iteration_counts_stay_finite() {
        let coeff = coefficient(u64::MAX, 1.0, 0.0, 0.1, 1.0);
        assert!(coeff.is_finite());
        assert!((coeff - 0.1).abs() < 1e-12);

        // Negative alpha drives the exponent the other way; still finite.
        let coeff = coefficient(u64::MAX, -1.0, 0.0, 0.1, 1.0);
        assert!(coeff.is_finite());
    }

    #[test]
    fn test_midpoint_value() {
        // alpha * iter / max_iter = 1 -> sigmoid(1)
        let sigmoid = 1.0 / (1.0 + (-1.0f64).exp());
        let expected = 2.0 * 0.1 * sigmoid - 0.1;
        assert!((coefficient(1000, 1.0, 0.0, 0.1, 1000.0) - expected).abs() < 1e-15);
    }

    #[test]
    fn test_scheduler_advance_and_state() {
        let mut scheduler = GrlScheduler::default();
        assert_eq!(scheduler.iter_num(), 0);
        assert_eq!(scheduler.coefficient(), 0.0);

        let state = scheduler.advance();
        assert_eq!(state.iter_num, 1);
        assert_eq!(scheduler.iter_num(), 1);

        // Reading does not advance
        let _ = scheduler.state();
        let _ = scheduler.coefficient();
        assert_eq!(scheduler.iter_num(), 1);
    }

    #[test]
    fn test_captured_state_is_independent_of_later_advances() {
        let mut scheduler = GrlScheduler::default();
        let captured = scheduler.advance();
        let captured_coeff = captured.coefficient();

        for _ in 0..500 {
            scheduler.advance();
        }

        assert_eq!(captured.coefficient(), captured_coeff);
        assert!(scheduler.coefficient() > captured_coeff);
    }

    #[test]
    fn test_config_validation() {
        assert!(ScheduleConfig::default().validate().is_ok());

        let bad = ScheduleConfig {
            max_iter: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = ScheduleConfig {
            alpha: f64::NAN,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_starting_iteration_is_respected() {
        let scheduler = GrlScheduler::new(ScheduleConfig {
            iter_num: 250,
            ..Default::default()
        });
        assert_eq!(scheduler.iter_num(), 250);
        assert_eq!(
            scheduler.coefficient(),
            coefficient(250, 1.0, 0.0, 0.1, 1000.0)
        );
    }
}
