//! Training module for MDD domain adaptation
//!
//! This module provides:
//! - The gradient-reversal coefficient schedule
//! - MDD loss assembly (classification plus margin disparity terms)
//! - The training facade tying network, schedule and loss together

pub mod loss;
pub mod mdd;
pub mod schedule;

// Re-export main types for convenience
pub use loss::{LossValues, MddLoss, MddLossOutput};
pub use mdd::{Mdd, ParamGroup};
pub use schedule::{GrlScheduler, ScheduleConfig, ScheduleState};

/// Default base learning rate for the CLI driver
pub const DEFAULT_LEARNING_RATE: f64 = 0.004;
