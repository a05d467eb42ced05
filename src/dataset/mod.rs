//! Dataset module for two-domain data handling
//!
//! This module provides:
//! - Source/target batches that keep the source-first row order explicit
//! - A batcher from flat samples to tensors
//! - A synthetic shifted-blobs dataset for exercising adaptation end to end

pub mod batch;
pub mod synthetic;

// Re-export main types for convenience
pub use batch::{Domain, DomainBatch, DomainBatcher, DomainItem, FeatureBatch};
pub use synthetic::{ShiftedBlobs, ShiftedBlobsConfig};
