//! # MDD Domain Adaptation
//!
//! Unsupervised domain adaptation with Margin Disparity Discrepancy, built on
//! the Burn framework.
//!
//! Labeled *source* rows and unlabeled *target* rows share a label space. A
//! shared feature extractor feeds two classifier heads: the primary head learns
//! the source labels, the adversarial head sits behind a scheduled
//! gradient-reversal operator and is pushed to agree with the primary head's
//! pseudo-labels on source rows and to disagree with them on target rows.
//!
//! ## Modules
//!
//! - `backend`: CPU (NdArray) and optional CUDA backend selection
//! - `dataset`: Source/target batches and a synthetic shifted-blobs task
//! - `model`: Backbones, gradient reversal and the two-head network
//! - `training`: Coefficient schedule, MDD loss and the training facade
//! - `utils`: Errors, logging, metrics and config loading
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mdd_adapt::backend::{default_device, TrainingBackend};
//! use mdd_adapt::model::MddConfig;
//! use mdd_adapt::training::Mdd;
//!
//! let device = default_device();
//! let mut mdd = Mdd::<TrainingBackend>::new(&MddConfig::features(16, 3), &device)?;
//! mdd.set_train(true);
//!
//! // First labels.len() rows of `inputs` are source rows
//! let loss = mdd.compute_loss(inputs, labels)?;
//! mdd.step(&mut optimizer, 0.004, &loss)?;
//! ```

pub mod backend;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::{Domain, DomainBatch, DomainBatcher, DomainItem, ShiftedBlobs, ShiftedBlobsConfig};
pub use model::{BackboneKind, GradientReversal, MddConfig, MddNet, MddOutput, SubNetwork};
pub use training::{GrlScheduler, LossValues, Mdd, MddLoss, MddLossOutput, ParamGroup, ScheduleConfig};
pub use utils::error::{MddError, Result};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
