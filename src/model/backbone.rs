//! Feature-extractor backbones
//!
//! A backbone maps an input batch `[batch, channels, height, width]` to a
//! feature matrix `[batch, output_dim]`. Backbones are looked up by name from a
//! small registry ([`BackboneKind`]):
//!
//! - `ResNet18`: residual network, 512 features
//! - `ConvNet`: four conv blocks with global pooling, 256 features
//! - `MLP`: two dense layers over the flattened input, for pre-extracted
//!   feature vectors fed as `[batch, 1, 1, dim]`

use std::fmt;
use std::str::FromStr;

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

use crate::utils::error::{MddError, Result as MddResult};

/// ResNet-18 feature width
pub const RESNET18_FEATURES: usize = 512;

/// Filters in the first ConvNet block; the last block has eight times as many
const CONVNET_BASE_FILTERS: usize = 32;

/// Pooled conv blocks in the ConvNet backbone
const CONVNET_BLOCKS: usize = 4;

/// Registry of available backbone architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackboneKind {
    ResNet18,
    ConvNet,
    #[serde(rename = "MLP")]
    Mlp,
}

impl BackboneKind {
    pub const ALL: [BackboneKind; 3] = [BackboneKind::ResNet18, BackboneKind::ConvNet, BackboneKind::Mlp];

    /// Registry name
    pub fn name(&self) -> &'static str {
        match self {
            BackboneKind::ResNet18 => "ResNet18",
            BackboneKind::ConvNet => "ConvNet",
            BackboneKind::Mlp => "MLP",
        }
    }
}

impl fmt::Display for BackboneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackboneKind {
    type Err = MddError;

    fn from_str(s: &str) -> MddResult<Self> {
        BackboneKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| MddError::UnknownBackbone(s.to_string()))
    }
}

/// Configuration for building a backbone
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// Which architecture to build
    pub kind: BackboneKind,

    /// Input channels for the convolutional backbones
    #[config(default = "3")]
    pub in_channels: usize,

    /// Flattened input width for the MLP backbone
    #[config(default = "2048")]
    pub input_dim: usize,

    /// Hidden and output width of the MLP backbone
    #[config(default = "256")]
    pub hidden_dim: usize,
}

impl BackboneConfig {
    /// Width of the feature vector the backbone will produce
    pub fn output_dim(&self) -> usize {
        match self.kind {
            BackboneKind::ResNet18 => RESNET18_FEATURES,
            BackboneKind::ConvNet => CONVNET_BASE_FILTERS << (CONVNET_BLOCKS - 1),
            BackboneKind::Mlp => self.hidden_dim,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Backbone<B> {
        match self.kind {
            BackboneKind::ResNet18 => Backbone::ResNet18(ResNet18::new(self.in_channels, device)),
            BackboneKind::ConvNet => Backbone::ConvNet(ConvNet::new(self.in_channels, device)),
            BackboneKind::Mlp => Backbone::Mlp(Mlp::new(self.input_dim, self.hidden_dim, device)),
        }
    }
}

/// Backbone selected from the registry
#[derive(Module, Debug)]
pub enum Backbone<B: Backend> {
    ResNet18(ResNet18<B>),
    ConvNet(ConvNet<B>),
    Mlp(Mlp<B>),
}

impl<B: Backend> Backbone<B> {
    /// `[batch, channels, height, width]` -> `[batch, output_dim]`
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            Backbone::ResNet18(model) => model.forward(input),
            Backbone::ConvNet(model) => model.forward(input),
            Backbone::Mlp(model) => model.forward(input),
        }
    }

    pub fn output_dim(&self) -> usize {
        match self {
            Backbone::ResNet18(_) => RESNET18_FEATURES,
            Backbone::ConvNet(model) => model.output_dim,
            Backbone::Mlp(model) => model.output_dim,
        }
    }

    /// Smallest height and width the backbone can reduce without reaching zero
    pub fn min_spatial(&self) -> usize {
        match self {
            // Each block halves the map with an unpadded 2x2 pool
            Backbone::ConvNet(_) => 1 << CONVNET_BLOCKS,
            // Every strided stage is padded, so any non-empty map survives
            Backbone::ResNet18(_) | Backbone::Mlp(_) => 1,
        }
    }

    /// Reject inputs the backbone cannot consume, before any compute happens
    pub fn check_input(&self, dims: [usize; 4]) -> MddResult<()> {
        let [_, channels, height, width] = dims;
        match self {
            Backbone::ResNet18(ResNet18 { in_channels, .. })
            | Backbone::ConvNet(ConvNet { in_channels, .. }) => {
                if channels != *in_channels {
                    return Err(MddError::ShapeMismatch(format!(
                        "backbone expects {} input channels, got {}",
                        in_channels, channels
                    )));
                }

                let min = self.min_spatial();
                if height < min || width < min {
                    return Err(MddError::ShapeMismatch(format!(
                        "backbone needs inputs of at least {}x{}, got {}x{}",
                        min, min, height, width
                    )));
                }
            }
            Backbone::Mlp(model) => {
                let flat = channels * height * width;
                if flat != model.input_dim {
                    return Err(MddError::ShapeMismatch(format!(
                        "MLP backbone expects {} input features, got {} ({}x{}x{})",
                        model.input_dim, flat, channels, height, width
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Conv2d, BatchNorm, ReLU and an optional 2x2 max pool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
    relu: Relu,
    pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, with_pool: bool, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        let pool = if with_pool {
            Some(MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init())
        } else {
            None
        };

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            pool,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);

        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// Small convolutional feature extractor
///
/// Four pooled conv blocks (32 -> 64 -> 128 -> 256 filters), then global
/// average pooling.
#[derive(Module, Debug)]
pub struct ConvNet<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    global_pool: AdaptiveAvgPool2d,
    in_channels: usize,
    output_dim: usize,
}

impl<B: Backend> ConvNet<B> {
    pub fn new(in_channels: usize, device: &B::Device) -> Self {
        let base = CONVNET_BASE_FILTERS;
        let widths: Vec<usize> = std::iter::once(in_channels)
            .chain((0..CONVNET_BLOCKS).map(|block| base << block))
            .collect();

        let blocks = widths
            .windows(2)
            .map(|pair| ConvBlock::new(pair[0], pair[1], true, device))
            .collect();

        Self {
            blocks,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            in_channels,
            output_dim: base << (CONVNET_BLOCKS - 1),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self
            .blocks
            .iter()
            .fold(input, |x, block| block.forward(x));

        // [B, C, 1, 1] -> [B, C]
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }
}

/// Projection shortcut for residual blocks that change shape
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Two 3x3 convolutions with an identity (or projected) shortcut
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    downsample: Option<Downsample<B>>,
    activation: Relu,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let conv2 = Conv2dConfig::new([out_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);

        let downsample = if stride != 1 || in_channels != out_channels {
            Some(Downsample::new(in_channels, out_channels, stride, device))
        } else {
            None
        };

        Self {
            conv1,
            bn1: BatchNormConfig::new(out_channels).init(device),
            conv2,
            bn2: BatchNormConfig::new(out_channels).init(device),
            downsample,
            activation: Relu::new(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.conv1.forward(input);
        let x = self.bn1.forward(x);
        let x = self.activation.forward(x);
        let x = self.conv2.forward(x);
        let x = self.bn2.forward(x);

        self.activation.forward(x + identity)
    }
}

/// ResNet-18 without its classification layer
///
/// - Stem: 7x7 conv, stride 2, then 3x3 max pool, stride 2
/// - Four stages of two basic blocks (64, 128, 256, 512 channels)
/// - Global average pooling
#[derive(Module, Debug)]
pub struct ResNet18<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    maxpool: MaxPool2d,
    blocks: Vec<BasicBlock<B>>,
    avgpool: AdaptiveAvgPool2d,
    activation: Relu,
    in_channels: usize,
}

impl<B: Backend> ResNet18<B> {
    pub fn new(in_channels: usize, device: &B::Device) -> Self {
        let conv1 = Conv2dConfig::new([in_channels, 64], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        // (in, out, stride) for each block
        let layout = [
            (64, 64, 1),
            (64, 64, 1),
            (64, 128, 2),
            (128, 128, 1),
            (128, 256, 2),
            (256, 256, 1),
            (256, 512, 2),
            (512, 512, 1),
        ];
        let blocks = layout
            .iter()
            .map(|&(input, output, stride)| BasicBlock::new(input, output, stride, device))
            .collect();

        Self {
            conv1,
            bn1: BatchNormConfig::new(64).init(device),
            maxpool,
            blocks,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            activation: Relu::new(),
            in_channels,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(input);
        let x = self.bn1.forward(x);
        let x = self.activation.forward(x);
        let x = self.maxpool.forward(x);

        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));

        let x = self.avgpool.forward(x);
        let [batch, channels, _, _] = x.dims();
        x.reshape([batch, channels])
    }
}

/// Dense feature extractor over flattened inputs
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    pub input: Linear<B>,
    pub hidden: Linear<B>,
    activation: Relu,
    input_dim: usize,
    output_dim: usize,
}

impl<B: Backend> Mlp<B> {
    pub fn new(input_dim: usize, hidden_dim: usize, device: &B::Device) -> Self {
        Self {
            input: LinearConfig::new(input_dim, hidden_dim).init(device),
            hidden: LinearConfig::new(hidden_dim, hidden_dim).init(device),
            activation: Relu::new(),
            input_dim,
            output_dim: hidden_dim,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch, channels, height, width] = input.dims();
        let x = input.reshape([batch, channels * height * width]);

        let x = self.activation.forward(self.input.forward(x));
        self.activation.forward(self.hidden.forward(x))
    }
}
