//! Model module for the MDD network using the Burn framework
//!
//! This module provides:
//! - A backbone registry (ResNet-18, a small ConvNet, an MLP over features)
//! - The scheduled gradient-reversal operator
//! - The domain-adversarial network with its two classifier heads
//! - Model configuration and hyperparameters

pub mod backbone;
pub mod config;
pub mod grl;
pub mod network;

// Re-export main types for convenience
pub use backbone::{Backbone, BackboneConfig, BackboneKind};
pub use config::{LrMultipliers, MddConfig};
pub use grl::GradientReversal;
pub use network::{MddNet, MddOutput, SubNetwork};

/// Default dropout rate for the bottleneck and heads
pub const DEFAULT_DROPOUT: f64 = 0.5;
