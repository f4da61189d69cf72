//! Decoder cascade and segmentation head.
//!
//! The cascade takes the encoded feature map back up in resolution, one
//! 2x bilinear upsample per stage, fusing skip connections where they
//! exist. The head projects to per-class logits and optionally upsamples
//! to the label's native resolution.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

use crate::error::{TransUnetError, TransUnetResult};

/// A convolution followed by batch normalization and ReLU.
#[derive(Config, Debug)]
pub struct Conv2dReLUConfig {
    in_channels: usize,
    out_channels: usize,
    #[config(default = "3")]
    kernel_size: usize,
    #[config(default = "1")]
    padding: usize,
}

impl Conv2dReLUConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Conv2dReLU<B> {
        let conv = Conv2dConfig::new(
            [self.in_channels, self.out_channels],
            [self.kernel_size, self.kernel_size],
        )
        .with_padding(PaddingConfig2d::Explicit(self.padding, self.padding))
        .with_bias(false)
        .init(device);

        Conv2dReLU {
            conv,
            bn: BatchNormConfig::new(self.out_channels).init(device),
            relu: Relu::new(),
        }
    }
}

#[derive(Module, Debug)]
pub struct Conv2dReLU<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> Conv2dReLU<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        self.relu.forward(x)
    }
}

/// Configuration for one decoder stage.
#[derive(Config, Debug)]
pub struct DecoderBlockConfig {
    in_channels: usize,
    /// Channels contributed by the skip map, zero for a skip-free stage.
    skip_channels: usize,
    out_channels: usize,
}

impl DecoderBlockConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> DecoderBlock<B> {
        DecoderBlock {
            skip_channels: self.skip_channels,
            conv1: Conv2dReLUConfig::new(self.in_channels + self.skip_channels, self.out_channels)
                .init(device),
            conv2: Conv2dReLUConfig::new(self.out_channels, self.out_channels).init(device),
        }
    }
}

/// One upsample, fuse, refine step of the cascade.
#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    skip_channels: usize,
    conv1: Conv2dReLU<B>,
    conv2: Conv2dReLU<B>,
}

impl<B: Backend> DecoderBlock<B> {
    /// Upsamples by 2, concatenates the skip map when present, then
    /// applies two convolution transforms.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` when the skip map's spatial size differs
    /// from the upsampled map. Fusion never resizes silently.
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
        skip: Option<&Tensor<B, 4>>,
        stage: usize,
    ) -> TransUnetResult<Tensor<B, 4>> {
        let [_, _, h, w] = x.dims();
        let x = interpolate(
            x,
            [h * 2, w * 2],
            InterpolateOptions::new(InterpolateMode::Bilinear),
        );

        let x = match skip {
            Some(skip) => {
                let [_, _, sh, sw] = skip.dims();
                if (sh, sw) != (h * 2, w * 2) {
                    return Err(TransUnetError::ShapeMismatch {
                        stage: format!("decoder stage {stage}"),
                        expected: format!("skip map of {}x{}", h * 2, w * 2),
                        actual: format!("{sh}x{sw}"),
                    });
                }
                Tensor::cat(vec![x, skip.clone()], 1)
            }
            None => x,
        };

        let x = self.conv1.forward(x);
        Ok(self.conv2.forward(x))
    }

    /// Whether this stage was built to fuse a skip connection.
    #[must_use]
    pub const fn takes_skip(&self) -> bool {
        self.skip_channels > 0
    }
}

/// Configuration for the decoder cascade.
#[derive(Config, Debug)]
pub struct DecoderCupConfig {
    hidden_size: usize,
    /// Output channels per stage, coarsest first.
    channels: Vec<usize>,
    /// Skip channels per stage, zero marking a skip-free stage.
    skip_channels: Vec<usize>,
}

impl DecoderCupConfig {
    /// Width of the transition convolution applied before the stages.
    const HEAD_CHANNELS: usize = 512;

    pub fn init<B: Backend>(&self, device: &Device<B>) -> DecoderCup<B> {
        let conv_more = Conv2dReLUConfig::new(self.hidden_size, Self::HEAD_CHANNELS).init(device);

        let mut in_channels = Self::HEAD_CHANNELS;
        let blocks = self
            .channels
            .iter()
            .zip(&self.skip_channels)
            .map(|(&out, &skip)| {
                let block = DecoderBlockConfig::new(in_channels, skip, out).init(device);
                in_channels = out;
                block
            })
            .collect();

        DecoderCup { conv_more, blocks }
    }
}

/// The full upsample cascade, consuming skip maps in strict order.
#[derive(Module, Debug)]
pub struct DecoderCup<B: Backend> {
    conv_more: Conv2dReLU<B>,
    blocks: Vec<DecoderBlock<B>>,
}

impl<B: Backend> DecoderCup<B> {
    /// # Arguments
    ///
    /// * `x` - Encoded feature map of shape `[batch, hidden, grid, grid]`.
    /// * `skips` - Skip maps in consumption order, absent in skip-free
    ///   mode. Stage `i` fuses `skips[i]` iff it was built with skip
    ///   channels.
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
        skips: Option<&[Tensor<B, 4>; 3]>,
    ) -> TransUnetResult<Tensor<B, 4>> {
        let mut x = self.conv_more.forward(x);
        for (stage, block) in self.blocks.iter().enumerate() {
            let skip = if block.takes_skip() {
                skips.and_then(|skips| skips.get(stage))
            } else {
                None
            };
            x = block.forward(x, skip, stage)?;
        }

        Ok(x)
    }
}

/// Configuration for the segmentation head.
#[derive(Config, Debug)]
pub struct SegmentationHeadConfig {
    in_channels: usize,
    filters: usize,
    #[config(default = "1")]
    kernel_size: usize,
    #[config(default = "1")]
    upsampling_factor: usize,
}

impl SegmentationHeadConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SegmentationHead<B> {
        let conv = Conv2dConfig::new(
            [self.in_channels, self.filters],
            [self.kernel_size, self.kernel_size],
        )
        .with_padding(PaddingConfig2d::Explicit(
            self.kernel_size / 2,
            self.kernel_size / 2,
        ))
        .init(device);

        SegmentationHead {
            in_channels: self.in_channels,
            upsampling_factor: self.upsampling_factor,
            conv,
        }
    }
}

/// Final projection to per-class logits, with optional bilinear upsampling
/// to the label's native resolution.
#[derive(Module, Debug)]
pub struct SegmentationHead<B: Backend> {
    in_channels: usize,
    upsampling_factor: usize,
    conv: Conv2d<B>,
}

impl<B: Backend> SegmentationHead<B> {
    /// # Errors
    ///
    /// Returns `ShapeMismatch` when the incoming channel depth differs
    /// from the depth the head was built for.
    pub fn forward(&self, x: Tensor<B, 4>) -> TransUnetResult<Tensor<B, 4>> {
        let [_, c, h, w] = x.dims();
        if c != self.in_channels {
            return Err(TransUnetError::ShapeMismatch {
                stage: "segmentation head".to_string(),
                expected: format!("{} channels", self.in_channels),
                actual: format!("{c} channels"),
            });
        }

        let x = self.conv.forward(x);
        if self.upsampling_factor > 1 {
            Ok(interpolate(
                x,
                [h * self.upsampling_factor, w * self.upsampling_factor],
                InterpolateOptions::new(InterpolateMode::Bilinear),
            ))
        } else {
            Ok(x)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn skip_free_cascade_upsamples_every_stage() {
        let device = Default::default();
        let cup = DecoderCupConfig::new(16, vec![8, 4], vec![0, 0]).init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 4>::zeros([1, 16, 4, 4], &device);
        let out = cup.forward(x, None).unwrap();

        assert_eq!(out.dims(), [1, 4, 16, 16]);
    }

    #[test]
    fn mismatched_skip_is_rejected() {
        let device = Default::default();
        let block = DecoderBlockConfig::new(8, 4, 8).init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 4>::zeros([1, 8, 4, 4], &device);
        let skip = Tensor::<TestBackend, 4>::zeros([1, 4, 9, 9], &device);

        match block.forward(x, Some(&skip), 0) {
            Err(TransUnetError::ShapeMismatch { stage, .. }) => {
                assert_eq!(stage, "decoder stage 0");
            }
            _ => panic!("Expected ShapeMismatch error"),
        }
    }

    #[test]
    fn matching_skip_is_fused() {
        let device = Default::default();
        let block = DecoderBlockConfig::new(8, 4, 6).init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 4>::zeros([1, 8, 4, 4], &device);
        let skip = Tensor::<TestBackend, 4>::zeros([1, 4, 8, 8], &device);

        let out = block.forward(x, Some(&skip), 0).unwrap();
        assert_eq!(out.dims(), [1, 6, 8, 8]);
    }

    #[test]
    fn head_upsamples_only_when_asked() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::zeros([1, 8, 4, 4], &device);

        let head = SegmentationHeadConfig::new(8, 9)
            .with_upsampling_factor(4)
            .init::<TestBackend>(&device);
        assert_eq!(head.forward(x.clone()).unwrap().dims(), [1, 9, 16, 16]);

        let head = SegmentationHeadConfig::new(8, 9).init::<TestBackend>(&device);
        assert_eq!(head.forward(x).unwrap().dims(), [1, 9, 4, 4]);
    }

    #[test]
    fn head_rejects_wrong_channel_depth() {
        let device = Default::default();
        let head = SegmentationHeadConfig::new(8, 9).init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 4>::zeros([1, 5, 4, 4], &device);
        match head.forward(x) {
            Err(TransUnetError::ShapeMismatch { stage, .. }) => {
                assert_eq!(stage, "segmentation head");
            }
            _ => panic!("Expected ShapeMismatch error"),
        }
    }
}
