//! Model Configuration Module
//!
//! Defines the serializable configuration for the MDD network, the
//! gradient-reversal schedule and the per-sub-network learning-rate
//! multipliers.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::backbone::{BackboneConfig, BackboneKind};
use crate::model::network::SubNetwork;
use crate::model::DEFAULT_DROPOUT;
use crate::training::schedule::ScheduleConfig;
use crate::utils::error::{MddError, Result};

/// Configuration for the MDD network and its training facade
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MddConfig {
    /// Backbone architecture from the registry
    pub base_net: BackboneKind,

    /// Whether a bottleneck layer sits between backbone and heads
    pub use_bottleneck: bool,

    /// Output width of the bottleneck layer
    pub bottleneck_width: usize,

    /// Hidden width of both classifier heads
    pub width: usize,

    /// Number of classes shared by source and target
    pub class_num: usize,

    /// Input channels for convolutional backbones
    pub input_channels: usize,

    /// Flattened input width for the MLP backbone
    pub input_dim: usize,

    /// Hidden width of the MLP backbone
    pub mlp_hidden_dim: usize,

    /// Dropout rate in the bottleneck and heads
    pub dropout: f64,

    /// Gradient-reversal coefficient schedule
    pub schedule: ScheduleConfig,

    /// Whether to place the model on an accelerator
    pub use_gpu: bool,

    /// Weight of the source adversarial term in the transfer loss
    pub src_weight: f64,

    /// Learning-rate multipliers per sub-network
    pub lr_multipliers: LrMultipliers,
}

impl Default for MddConfig {
    fn default() -> Self {
        Self {
            base_net: BackboneKind::ResNet18,
            use_bottleneck: true,
            bottleneck_width: 1024,
            width: 1024,
            class_num: 31,
            input_channels: 3,
            input_dim: 2048,
            mlp_hidden_dim: 256,
            dropout: DEFAULT_DROPOUT,
            schedule: ScheduleConfig::default(),
            use_gpu: false,
            src_weight: 3.0,
            lr_multipliers: LrMultipliers::default(),
        }
    }
}

impl MddConfig {
    /// Create a configuration for a given backbone and class count
    pub fn new(base_net: BackboneKind, class_num: usize) -> Self {
        Self {
            base_net,
            class_num,
            ..Default::default()
        }
    }

    /// Small configuration over pre-extracted feature vectors
    ///
    /// Inputs are expected as `[batch, 1, 1, input_dim]`.
    pub fn features(input_dim: usize, class_num: usize) -> Self {
        Self {
            base_net: BackboneKind::Mlp,
            input_channels: 1,
            input_dim,
            mlp_hidden_dim: 64,
            bottleneck_width: 32,
            width: 32,
            class_num,
            ..Default::default()
        }
    }

    /// Builder-style setter for the bottleneck switch
    pub fn with_bottleneck(mut self, use_bottleneck: bool) -> Self {
        self.use_bottleneck = use_bottleneck;
        self
    }

    /// Builder-style setter for the schedule
    pub fn with_schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule = schedule;
        self
    }

    /// Backbone construction parameters
    pub fn backbone_config(&self) -> BackboneConfig {
        BackboneConfig::new(self.base_net)
            .with_in_channels(self.input_channels)
            .with_input_dim(self.input_dim)
            .with_hidden_dim(self.mlp_hidden_dim)
    }

    /// Width of the features the heads consume
    pub fn feature_dim(&self) -> usize {
        if self.use_bottleneck {
            self.bottleneck_width
        } else {
            self.backbone_config().output_dim()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.class_num == 0 {
            return Err(MddError::Config("class_num must be greater than 0".to_string()));
        }

        if self.width == 0 {
            return Err(MddError::Config("width must be greater than 0".to_string()));
        }

        if self.use_bottleneck && self.bottleneck_width == 0 {
            return Err(MddError::Config(
                "bottleneck_width must be greater than 0 when the bottleneck is enabled".to_string(),
            ));
        }

        if self.input_channels == 0 {
            return Err(MddError::Config("input_channels must be greater than 0".to_string()));
        }

        if self.base_net == BackboneKind::Mlp && (self.input_dim == 0 || self.mlp_hidden_dim == 0) {
            return Err(MddError::Config(
                "input_dim and mlp_hidden_dim must be greater than 0 for the MLP backbone".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(MddError::Config("dropout must be in range [0.0, 1.0)".to_string()));
        }

        if !(self.src_weight.is_finite() && self.src_weight >= 0.0) {
            return Err(MddError::Config(format!(
                "src_weight must be a non-negative finite number, got {}",
                self.src_weight
            )));
        }

        self.lr_multipliers.validate()?;
        self.schedule.validate()
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Learning-rate multiplier for each sub-network
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LrMultipliers {
    pub backbone: f64,
    pub bottleneck: f64,
    pub classifier: f64,
    pub classifier_adv: f64,
}

impl Default for LrMultipliers {
    fn default() -> Self {
        Self {
            backbone: 0.1,
            bottleneck: 1.0,
            classifier: 1.0,
            classifier_adv: 1.0,
        }
    }
}

impl LrMultipliers {
    pub fn get(&self, sub_network: SubNetwork) -> f64 {
        match sub_network {
            SubNetwork::Backbone => self.backbone,
            SubNetwork::Bottleneck => self.bottleneck,
            SubNetwork::Classifier => self.classifier,
            SubNetwork::ClassifierAdv => self.classifier_adv,
        }
    }

    fn validate(&self) -> Result<()> {
        for sub_network in SubNetwork::ALL {
            let value = self.get(sub_network);
            if !(value.is_finite() && value >= 0.0) {
                return Err(MddError::Config(format!(
                    "learning-rate multiplier for {} must be a non-negative finite number, got {}",
                    sub_network, value
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = MddConfig::default();
        assert_eq!(config.base_net, BackboneKind::ResNet18);
        assert!(config.use_bottleneck);
        assert_eq!(config.class_num, 31);
        assert_eq!(config.src_weight, 3.0);
        assert_eq!(config.schedule.high_value, 0.1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_lr_multipliers() {
        let multipliers = LrMultipliers::default();
        assert_eq!(multipliers.get(SubNetwork::Backbone), 0.1);
        assert_eq!(multipliers.get(SubNetwork::Bottleneck), 1.0);
        assert_eq!(multipliers.get(SubNetwork::Classifier), 1.0);
        assert_eq!(multipliers.get(SubNetwork::ClassifierAdv), 1.0);
    }

    #[test]
    fn test_feature_dim_follows_bottleneck_switch() {
        let config = MddConfig::features(16, 3);
        assert_eq!(config.feature_dim(), config.bottleneck_width);

        let config = config.with_bottleneck(false);
        assert_eq!(config.feature_dim(), config.mlp_hidden_dim);

        let config = MddConfig::new(BackboneKind::ResNet18, 10).with_bottleneck(false);
        assert_eq!(config.feature_dim(), 512);
    }

    #[test]
    fn test_invalid_configs() {
        let mut config = MddConfig::default();
        config.class_num = 0;
        assert!(config.validate().is_err());

        let mut config = MddConfig::default();
        config.dropout = 1.0;
        assert!(config.validate().is_err());

        let mut config = MddConfig::default();
        config.src_weight = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = MddConfig::default();
        config.lr_multipliers.backbone = -0.1;
        assert!(config.validate().is_err());

        let mut config = MddConfig::default();
        config.schedule.max_iter = -5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mdd.json");

        let mut config = MddConfig::features(8, 4);
        config.schedule.alpha = 10.0;
        config.lr_multipliers.backbone = 0.0;
        config.save(&path).unwrap();

        let loaded = MddConfig::load(&path).unwrap();
        assert_eq!(loaded.base_net, BackboneKind::Mlp);
        assert_eq!(loaded.input_dim, 8);
        assert_eq!(loaded.class_num, 4);
        assert_eq!(loaded.schedule.alpha, 10.0);
        assert_eq!(loaded.lr_multipliers.backbone, 0.0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MddConfig =
            serde_json::from_str(r#"{ "base_net": "MLP", "class_num": 5 }"#).unwrap();
        assert_eq!(config.base_net, BackboneKind::Mlp);
        assert_eq!(config.class_num, 5);
        assert_eq!(config.width, 1024);
        assert_eq!(config.schedule.max_iter, 1000.0);
    }

    #[test]
    fn test_load_invalid_json_is_serialization_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(MddConfig::load(&path), Err(MddError::Serialization(_))));
    }
}
