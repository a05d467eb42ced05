//! Domain-adversarial MDD network
//!
//! ```text
//! inputs -> backbone -> [bottleneck] -> features -+-> classifier -----> outputs -> softmax
//!                                                 |
//!                                                 +-> GRL -> classifier_adv -> outputs_adv
//! ```
//!
//! The reversal operator is passed in by the caller, so the network itself
//! holds no schedule state.

use std::fmt;

use burn::{
    config::Config,
    module::{list_param_ids, Module, ParamId},
    nn::{
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, Linear, LinearConfig, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};
use tracing::debug;

use crate::backend::ensure_accelerator;
use crate::model::backbone::Backbone;
use crate::model::config::MddConfig;
use crate::model::grl::GradientReversal;
use crate::utils::error::Result as MddResult;

/// Standard deviation of the bottleneck weights
const BOTTLENECK_WEIGHT_STD: f64 = 0.005;

/// Initial bottleneck bias
const BOTTLENECK_BIAS: f64 = 0.1;

/// Standard deviation of the classifier head weights
const HEAD_WEIGHT_STD: f64 = 0.01;

/// The four trainable parts of the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubNetwork {
    Backbone,
    Bottleneck,
    Classifier,
    ClassifierAdv,
}

impl SubNetwork {
    pub const ALL: [SubNetwork; 4] = [
        SubNetwork::Backbone,
        SubNetwork::Bottleneck,
        SubNetwork::Classifier,
        SubNetwork::ClassifierAdv,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SubNetwork::Backbone => "backbone",
            SubNetwork::Bottleneck => "bottleneck",
            SubNetwork::Classifier => "classifier",
            SubNetwork::ClassifierAdv => "classifier_adv",
        }
    }
}

impl fmt::Display for SubNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for the bottleneck layer
#[derive(Config, Debug)]
pub struct BottleneckConfig {
    pub d_input: usize,
    pub d_output: usize,
    #[config(default = "0.5")]
    pub dropout: f64,
}

impl BottleneckConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Bottleneck<B> {
        let mut linear = LinearConfig::new(self.d_input, self.d_output)
            .with_initializer(Initializer::Normal {
                mean: 0.0,
                std: BOTTLENECK_WEIGHT_STD,
            })
            .init(device);
        linear.bias = Some(
            Initializer::Constant {
                value: BOTTLENECK_BIAS,
            }
            .init([self.d_output], device),
        );

        Bottleneck {
            linear,
            bn: BatchNormConfig::new(self.d_output).init(device),
            relu: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Linear, BatchNorm, ReLU, Dropout
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    pub linear: Linear<B>,
    pub bn: BatchNorm<B>,
    relu: Relu,
    dropout: Dropout,
}

impl<B: Backend> Bottleneck<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.dropout.forward(x)
    }
}

/// Configuration for a classifier head
#[derive(Config, Debug)]
pub struct ClassifierHeadConfig {
    pub d_input: usize,
    pub width: usize,
    pub num_classes: usize,
    #[config(default = "0.5")]
    pub dropout: f64,
}

impl ClassifierHeadConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ClassifierHead<B> {
        let initializer = Initializer::Normal {
            mean: 0.0,
            std: HEAD_WEIGHT_STD,
        };

        let mut fc1 = LinearConfig::new(self.d_input, self.width)
            .with_initializer(initializer.clone())
            .init(device);
        fc1.bias = Some(Initializer::Zeros.init([self.width], device));

        let mut fc2 = LinearConfig::new(self.width, self.num_classes)
            .with_initializer(initializer)
            .init(device);
        fc2.bias = Some(Initializer::Zeros.init([self.num_classes], device));

        ClassifierHead {
            fc1,
            relu: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc2,
        }
    }
}

/// Linear, ReLU, Dropout, Linear
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pub fc1: Linear<B>,
    relu: Relu,
    dropout: Dropout,
    pub fc2: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.fc1.forward(x);
        let x = self.relu.forward(x);
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }
}

/// Everything one forward pass produces
#[derive(Debug, Clone)]
pub struct MddOutput<B: Backend> {
    /// `[batch, feature_dim]`
    pub features: Tensor<B, 2>,
    /// Primary logits, `[batch, class_num]`
    pub outputs: Tensor<B, 2>,
    /// Softmax of the primary logits
    pub softmax_outputs: Tensor<B, 2>,
    /// Adversarial logits computed behind the reversal operator
    pub outputs_adv: Tensor<B, 2>,
}

/// Backbone, optional bottleneck and the two classifier heads
#[derive(Module, Debug)]
pub struct MddNet<B: Backend> {
    pub backbone: Backbone<B>,
    pub bottleneck: Option<Bottleneck<B>>,
    pub classifier: ClassifierHead<B>,
    pub classifier_adv: ClassifierHead<B>,
    class_num: usize,
}

impl<B: Backend> MddNet<B> {
    /// Build the network described by `config` on `device`
    pub fn new(config: &MddConfig, device: &B::Device) -> MddResult<Self> {
        config.validate()?;
        ensure_accelerator(config.use_gpu)?;

        let backbone = config.backbone_config().init(device);

        let (bottleneck, feature_dim) = if config.use_bottleneck {
            let bottleneck = BottleneckConfig::new(backbone.output_dim(), config.bottleneck_width)
                .with_dropout(config.dropout)
                .init(device);
            (Some(bottleneck), config.bottleneck_width)
        } else {
            (None, backbone.output_dim())
        };

        let head = ClassifierHeadConfig::new(feature_dim, config.width, config.class_num)
            .with_dropout(config.dropout);

        debug!(
            "Built MDD network: backbone {} ({} features), bottleneck {}, heads {} -> {} -> {}",
            config.base_net,
            backbone.output_dim(),
            config.use_bottleneck,
            feature_dim,
            config.width,
            config.class_num
        );

        Ok(Self {
            backbone,
            bottleneck,
            classifier: head.init(device),
            classifier_adv: head.init(device),
            class_num: config.class_num,
        })
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `inputs` - `[batch, channels, height, width]`, source rows first
    /// * `grl` - reversal operator captured for this pass
    pub fn forward(&self, inputs: Tensor<B, 4>, grl: &GradientReversal) -> MddOutput<B> {
        let features = self.backbone.forward(inputs);
        let features = match &self.bottleneck {
            Some(bottleneck) => bottleneck.forward(features),
            None => features,
        };

        let features_adv = grl.forward(features.clone());
        let outputs_adv = self.classifier_adv.forward(features_adv);
        let outputs = self.classifier.forward(features.clone());
        let softmax_outputs = softmax(outputs.clone(), 1);

        debug!(
            "MDD forward: features {:?}, outputs {:?}, grl coeff {:.6}",
            features.dims(),
            outputs.dims(),
            grl.coeff()
        );

        MddOutput {
            features,
            outputs,
            softmax_outputs,
            outputs_adv,
        }
    }

    /// Parameter ids belonging to one sub-network
    pub fn param_ids(&self, sub_network: SubNetwork) -> Vec<ParamId> {
        match sub_network {
            SubNetwork::Backbone => list_param_ids(&self.backbone),
            SubNetwork::Bottleneck => list_param_ids(&self.bottleneck),
            SubNetwork::Classifier => list_param_ids(&self.classifier),
            SubNetwork::ClassifierAdv => list_param_ids(&self.classifier_adv),
        }
    }

    pub fn class_num(&self) -> usize {
        self.class_num
    }

    pub fn has_bottleneck(&self) -> bool {
        self.bottleneck.is_some()
    }
}
