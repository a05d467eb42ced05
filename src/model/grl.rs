//! Scheduled gradient reversal
//!
//! Forward: identity. Backward: the incoming gradient is multiplied by
//! `-coeff`, where `coeff` comes from the schedule state captured when the
//! forward pass ran.
//!
//! On burn's autodiff graph the operator is expressed as
//!
//! ```text
//! y = detach(x) + (x - detach(x)) * (-coeff)
//! ```
//!
//! `x - detach(x)` is exactly zero for finite `x`, so `y` equals `x` bit for
//! bit, and the only path from `y` back to `x` runs through the `-coeff`
//! scale. For infinite or NaN entries the difference is NaN; those entries
//! are zeroed, so they pass through unchanged and receive no gradient.

use burn::tensor::{backend::Backend, Tensor};

use crate::training::schedule::ScheduleState;

/// Gradient-reversal node with its coefficient captured at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientReversal {
    coeff: f64,
}

impl GradientReversal {
    pub fn new(coeff: f64) -> Self {
        Self { coeff }
    }

    /// Capture the coefficient for the given schedule state
    pub fn from_state(state: &ScheduleState) -> Self {
        Self::new(state.coefficient())
    }

    pub fn coeff(&self) -> f64 {
        self.coeff
    }

    pub fn forward<B: Backend, const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        let detached = input.clone().detach();
        let delta = input - detached.clone();
        let delta = delta.clone().mask_fill(delta.is_nan(), 0.0);
        detached + delta.mul_scalar(-self.coeff)
    }
}

impl From<&ScheduleState> for GradientReversal {
    fn from(state: &ScheduleState) -> Self {
        Self::from_state(state)
    }
}
