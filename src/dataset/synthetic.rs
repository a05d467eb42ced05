//! Synthetic two-domain data
//!
//! Class-conditional Gaussian blobs. Both domains share the class centers; the
//! target domain scales every sample and then shifts it by a fixed offset, so a
//! classifier fit on source rows alone degrades on target rows.

use burn::data::dataset::Dataset;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::batch::{Domain, DomainItem};
use crate::utils::error::{MddError, Result};

/// Parameters of the blob generator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftedBlobsConfig {
    pub num_classes: usize,
    pub input_dim: usize,
    pub samples_per_class: usize,
    /// Scale of the class centers
    pub separation: f32,
    /// Per-sample noise standard deviation
    pub spread: f32,
    /// Offset added to every target feature
    pub shift: f32,
    /// Factor applied to target samples before the offset
    pub scale: f32,
    pub seed: u64,
}

impl Default for ShiftedBlobsConfig {
    fn default() -> Self {
        Self {
            num_classes: 3,
            input_dim: 16,
            samples_per_class: 64,
            separation: 3.0,
            spread: 1.0,
            shift: 1.5,
            scale: 1.25,
            seed: 42,
        }
    }
}

impl ShiftedBlobsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_classes == 0 || self.input_dim == 0 || self.samples_per_class == 0 {
            return Err(MddError::Config(
                "num_classes, input_dim and samples_per_class must be greater than 0".to_string(),
            ));
        }
        if !(self.spread.is_finite() && self.spread >= 0.0) {
            return Err(MddError::Config(format!(
                "spread must be a non-negative finite number, got {}",
                self.spread
            )));
        }
        if !(self.separation.is_finite() && self.shift.is_finite() && self.scale.is_finite()) {
            return Err(MddError::Config(
                "separation, shift and scale must be finite".to_string(),
            ));
        }
        Ok(())
    }

    /// Class centers, identical for both domains
    fn centers(&self) -> Vec<Vec<f32>> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        (0..self.num_classes)
            .map(|_| {
                (0..self.input_dim)
                    .map(|_| {
                        let z: f32 = StandardNormal.sample(&mut rng);
                        z * self.separation
                    })
                    .collect()
            })
            .collect()
    }
}

/// One domain's worth of blob samples
#[derive(Debug, Clone)]
pub struct ShiftedBlobs {
    items: Vec<DomainItem>,
    input_dim: usize,
    domain: Domain,
}

impl ShiftedBlobs {
    /// Generate the samples of one domain, shuffled
    pub fn generate(config: &ShiftedBlobsConfig, domain: Domain) -> Result<Self> {
        config.validate()?;

        let centers = config.centers();
        let domain_seed = match domain {
            Domain::Source => config.seed.wrapping_add(1),
            Domain::Target => config.seed.wrapping_add(2),
        };
        let mut rng = ChaCha8Rng::seed_from_u64(domain_seed);

        let mut items = Vec::with_capacity(config.num_classes * config.samples_per_class);
        for (label, center) in centers.iter().enumerate() {
            for _ in 0..config.samples_per_class {
                let features = center
                    .iter()
                    .map(|&c| {
                        let noise: f32 = StandardNormal.sample(&mut rng);
                        let x = c + noise * config.spread;
                        match domain {
                            Domain::Source => x,
                            Domain::Target => x * config.scale + config.shift,
                        }
                    })
                    .collect();

                items.push(DomainItem {
                    features,
                    label,
                    domain,
                });
            }
        }
        items.shuffle(&mut rng);

        debug!(
            "Generated {} {:?} samples ({} classes, {} dims)",
            items.len(),
            domain,
            config.num_classes,
            config.input_dim
        );

        Ok(Self {
            items,
            input_dim: config.input_dim,
            domain,
        })
    }

    /// Source and target datasets from the same configuration
    pub fn pair(config: &ShiftedBlobsConfig) -> Result<(Self, Self)> {
        Ok((
            Self::generate(config, Domain::Source)?,
            Self::generate(config, Domain::Target)?,
        ))
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn items(&self) -> &[DomainItem] {
        &self.items
    }

    /// Items `[start, start + count)`, wrapping around the end
    pub fn window(&self, start: usize, count: usize) -> Vec<DomainItem> {
        if self.items.is_empty() {
            return Vec::new();
        }
        (0..count)
            .map(|offset| self.items[(start + offset) % self.items.len()].clone())
            .collect()
    }
}

impl Dataset<DomainItem> for ShiftedBlobs {
    fn get(&self, index: usize) -> Option<DomainItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}
