//! ResNet feature extractor for the hybrid stem.
//!
//! Only the first three residual stages are built. The stage outputs serve
//! as skip connections for the decoder cascade, and the deepest map at
//! 1/16 scale replaces the raw image as input to the patch embedding.
//! Derived from torchvision.models.resnet.ResNet

use core::f64::consts::SQRT_2;

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
};

/// Multi-scale output of the feature extractor.
///
/// `skips` is ordered the way the decoder consumes it: coarsest and
/// deepest-channeled first.
#[derive(Debug, Clone)]
pub struct HybridFeatures<B: Backend> {
    /// Skip maps at 1/8 (512ch), 1/4 (256ch) and 1/2 (64ch) scale.
    pub skips: [Tensor<B, 4>; 3],
    /// Deepest map at 1/16 scale with 1024 channels.
    pub deepest: Tensor<B, 4>,
}

/// Configuration for the ResNet feature extractor.
#[derive(Config, Debug)]
pub struct ResNetEncoderConfig {
    /// Number of bottleneck blocks per stage.
    #[config(default = "[3, 4, 6]")]
    depths: [usize; 3],
}

impl ResNetEncoderConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> ResNetEncoder<B> {
        // 3x3 maxpool, stride=2, padding=1
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        ResNetEncoder {
            root: RootBlock::new(3, 64, device),
            maxpool,
            layer1: LayerBlock::new(self.depths[0], 64, 256, 1, device),
            layer2: LayerBlock::new(self.depths[1], 256, 512, 2, device),
            layer3: LayerBlock::new(self.depths[2], 512, 1024, 2, device),
        }
    }
}

/// Three-stage bottleneck ResNet producing the skip set and the deepest
/// feature map.
#[derive(Module, Debug)]
pub struct ResNetEncoder<B: Backend> {
    root: RootBlock<B>,
    maxpool: MaxPool2d,
    layer1: LayerBlock<B>,
    layer2: LayerBlock<B>,
    layer3: LayerBlock<B>,
}

impl<B: Backend> ResNetEncoder<B> {
    /// Forward pass returning the intermediate maps required downstream.
    ///
    /// # Arguments
    ///
    /// * `input` - Image tensor of shape `[batch, 3, size, size]`.
    pub fn forward(&self, input: Tensor<B, 4>) -> HybridFeatures<B> {
        // Root output is tapped before pooling so the finest skip keeps
        // 1/2 resolution.
        let root = self.root.forward(input);

        let pooled = self.maxpool.forward(root.clone());
        let stage1 = self.layer1.forward(pooled);
        let stage2 = self.layer2.forward(stage1.clone());
        let deepest = self.layer3.forward(stage2.clone());

        HybridFeatures {
            skips: [stage2, stage1, root],
            deepest,
        }
    }
}

/// First conv block: conv + bn + relu
#[derive(Module, Debug)]
struct RootBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> RootBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &Device<B>) -> Self {
        let initializer = Initializer::KaimingNormal {
            gain: SQRT_2,
            fan_out_only: true,
        };

        // 7x7 conv, stride=2, padding=3
        let conv = Conv2dConfig::new([in_channels, out_channels], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .with_initializer(initializer)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv.forward(input);
        let out = self.bn.forward(out);
        self.relu.forward(out)
    }
}

/// A sequence of bottleneck blocks forming one residual stage.
#[derive(Module, Debug)]
struct LayerBlock<B: Backend> {
    blocks: Vec<Bottleneck<B>>,
}

impl<B: Backend> LayerBlock<B> {
    fn new(
        num_blocks: usize,
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        device: &Device<B>,
    ) -> Self {
        let blocks = (0..num_blocks)
            .map(|b| {
                if b == 0 {
                    // Downsampling is handled by the first block of the stage.
                    Bottleneck::new(in_channels, out_channels, stride, device)
                } else {
                    Bottleneck::new(out_channels, out_channels, 1, device)
                }
            })
            .collect();

        Self { blocks }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks
            .iter()
            .fold(input, |x, block| block.forward(x))
    }
}

/// ResNet bottleneck residual block.
///
/// **NOTE:** Following common practice, the stride for downsampling sits on
/// the 3x3 convolution rather than the leading 1x1. This variant is known
/// as ResNet V1.5.
#[derive(Module, Debug)]
struct Bottleneck<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    relu: Relu,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    conv3: Conv2d<B>,
    bn3: BatchNorm<B, 2>,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> Bottleneck<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &Device<B>) -> Self {
        let width = out_channels / 4;
        let initializer = Initializer::KaimingNormal {
            gain: SQRT_2,
            fan_out_only: true,
        };

        // conv1x1
        let conv1 = Conv2dConfig::new([in_channels, width], [1, 1])
            .with_bias(false)
            .with_initializer(initializer.clone())
            .init(device);
        let bn1 = BatchNormConfig::new(width).init(device);

        // conv3x3
        let conv2 = Conv2dConfig::new([width, width], [3, 3])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .with_initializer(initializer.clone())
            .init(device);
        let bn2 = BatchNormConfig::new(width).init(device);

        // conv1x1
        let conv3 = Conv2dConfig::new([width, out_channels], [1, 1])
            .with_bias(false)
            .with_initializer(initializer)
            .init(device);
        let bn3 = BatchNormConfig::new(out_channels).init(device);

        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| Downsample::new(in_channels, out_channels, stride, device));

        Self {
            conv1,
            bn1,
            relu: Relu::new(),
            conv2,
            bn2,
            conv3,
            bn3,
            downsample,
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = input.clone();

        let out = self.conv1.forward(input);
        let out = self.bn1.forward(out);
        let out = self.relu.forward(out);
        let out = self.conv2.forward(out);
        let out = self.bn2.forward(out);
        let out = self.relu.forward(out);
        let out = self.conv3.forward(out);
        let out = self.bn3.forward(out);

        // Skip connection
        let out = match &self.downsample {
            Some(downsample) => out + downsample.forward(identity),
            None => out + identity,
        };

        self.relu.forward(out)
    }
}

/// Projection shortcut for blocks that change resolution or channels.
#[derive(Module, Debug)]
struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &Device<B>) -> Self {
        let initializer = Initializer::KaimingNormal {
            gain: SQRT_2,
            fan_out_only: true,
        };

        // conv1x1
        let conv = Conv2dConfig::new([in_channels, out_channels], [1, 1])
            .with_stride([stride, stride])
            .with_bias(false)
            .with_initializer(initializer)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv.forward(input);
        self.bn.forward(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_resnet_encoder_forward() {
        let device = Default::default();
        let model = ResNetEncoderConfig::new().init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::random(
            [1, 3, 64, 64],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let features = model.forward(input);

        assert_eq!(features.skips[0].dims(), [1, 512, 8, 8]); // 64/8 = 8
        assert_eq!(features.skips[1].dims(), [1, 256, 16, 16]); // 64/4 = 16
        assert_eq!(features.skips[2].dims(), [1, 64, 32, 32]); // 64/2 = 32
        assert_eq!(features.deepest.dims(), [1, 1024, 4, 4]); // 64/16 = 4
    }
}
