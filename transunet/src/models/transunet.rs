//! # TransUNet Model Implementation
//!
//! This module defines the main `TransUnet` model, which wires the stem,
//! the transformer encoder, the decoder cascade and the segmentation head
//! into one forward computation.
//!
//! ## Core Components
//!
//! - `TransUnetConfig`: A configuration struct to initialize the model.
//! - `TransUnet`: The main model struct orchestrating the forward pass.
//! - `StemModule`: The resolved hybrid/non-hybrid input branch.
//!
//! The two supported architectures differ only in the stem: a pure
//! transformer patchifies the raw image and runs the decoder skip-free,
//! while the hybrid variant runs a ResNet feature extractor whose stage
//! outputs become the decoder's skip connections.

use burn::prelude::*;

use super::{
    backbones::{ResNetEncoder, ResNetEncoderConfig},
    decoder::{DecoderCup, DecoderCupConfig, SegmentationHead, SegmentationHeadConfig},
    encoder::{
        Encoder, EncoderConfig, PatchEmbeddings, PatchEmbeddingsConfig, PositionEmbeddings,
        PositionEmbeddingsConfig,
    },
};
use crate::{
    config::{ModelConfig, Stem},
    error::TransUnetResult,
};

#[cfg(feature = "train")]
use crate::{
    losses::{CompositeLoss, CompositeLossConfig},
    training::{SegmentationBatch, SegmentationOutput},
};

#[cfg(feature = "train")]
use burn::{
    tensor::backend::AutodiffBackend,
    train::{TrainOutput, TrainStep, ValidStep},
};

/// Configuration for the `TransUnet` model.
#[derive(Config, Debug)]
pub struct TransUnetConfig {
    /// The detailed model configuration.
    config: ModelConfig,
    /// The loss function configuration.
    #[cfg(feature = "train")]
    #[config(default = "CompositeLossConfig::new()")]
    loss: CompositeLossConfig,
}

impl TransUnetConfig {
    /// Initializes a `TransUnet` model with the given configuration.
    ///
    /// # Arguments
    ///
    /// * `device` - The device to create the model on.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid. Validation runs
    /// before any parameter is allocated, so a bad shape combination never
    /// survives to a forward pass.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> TransUnetResult<TransUnet<B>> {
        let cfg = &self.config;
        cfg.validate()?;

        let patches = PatchEmbeddingsConfig::new(
            cfg.embedding_feature_size(),
            cfg.embedding_patch_size(),
            cfg.embedding_in_channels(),
            cfg.hidden_size,
        )
        .init(device)?;

        let stem = match cfg.stem {
            Stem::Patchify => StemModule::Patchify(patches),
            Stem::Resnet(_) => StemModule::Resnet(HybridStem {
                backbone: ResNetEncoderConfig::new().init(device),
                patches,
            }),
        };

        let position = PositionEmbeddingsConfig::new(cfg.n_patches(), cfg.hidden_size)
            .with_dropout(cfg.dropout)
            .init(device);

        let encoder = EncoderConfig::new(cfg.n_layers, cfg.hidden_size, cfg.n_heads, cfg.mlp_dim)
            .with_dropout(cfg.dropout)
            .init(device);

        let decoder = cfg.decoder.as_ref().map(|cascade| {
            DecoderCupConfig::new(
                cfg.hidden_size,
                cascade.channels.clone(),
                cfg.cascade_skip_channels(cascade),
            )
            .init(device)
        });

        // The head consumes the last decoder stage, or the reshaped
        // encoder output when no decoder is configured.
        let head_in_channels = cfg
            .decoder
            .as_ref()
            .and_then(|cascade| cascade.channels.last().copied())
            .unwrap_or(cfg.hidden_size);

        let head = SegmentationHeadConfig::new(head_in_channels, cfg.filters)
            .with_kernel_size(cfg.kernel_size)
            .with_upsampling_factor(cfg.upsampling_factor)
            .init(device);

        Ok(TransUnet {
            grid: cfg.token_grid(),
            hidden_size: cfg.hidden_size,
            stem,
            position,
            encoder,
            decoder,
            head,
            #[cfg(feature = "train")]
            loss: self.loss.init(),
        })
    }
}

/// Convolutional feature extractor in front of the patch embedding.
#[derive(Module, Debug)]
pub struct HybridStem<B: Backend> {
    backbone: ResNetEncoder<B>,
    patches: PatchEmbeddings<B>,
}

/// The resolved input branch of the network.
#[derive(Module, Debug)]
pub enum StemModule<B: Backend> {
    /// Patchify the raw image, no skip connections.
    Patchify(PatchEmbeddings<B>),
    /// ResNet features first, stage outputs become skip connections.
    Resnet(HybridStem<B>),
}

/// The main TransUNet model.
#[derive(Module, Debug)]
pub struct TransUnet<B: Backend> {
    /// Side length of the token grid.
    grid: usize,
    /// Width of the token embedding.
    hidden_size: usize,
    /// The input branch.
    stem: StemModule<B>,
    /// Learned position embeddings.
    position: PositionEmbeddings<B>,
    /// The transformer encoder stack.
    encoder: Encoder<B>,
    /// The decoder cascade, absent when the head runs on encoder output.
    decoder: Option<DecoderCup<B>>,
    /// The segmentation head.
    head: SegmentationHead<B>,
    /// The loss function for training.
    #[cfg(feature = "train")]
    loss: CompositeLoss<B>,
}

impl<B: Backend> TransUnet<B> {
    /// The main forward pass.
    ///
    /// # Arguments
    ///
    /// * `x` - Image tensor of shape `[batch, 3, image_size, image_size]`.
    ///
    /// # Returns
    ///
    /// A result containing the logit map of shape
    /// `[batch, filters, out_size, out_size]`.
    pub fn forward(&self, x: Tensor<B, 4>) -> TransUnetResult<Tensor<B, 4>> {
        let (tokens, skips) = match &self.stem {
            StemModule::Patchify(patches) => (patches.forward(x), None),
            StemModule::Resnet(stem) => {
                let features = stem.backbone.forward(x);
                (stem.patches.forward(features.deepest), Some(features.skips))
            }
        };

        let tokens = self.position.forward(tokens)?;
        let encoded = self.encoder.forward(tokens);

        // Back from sequence to square map.
        let [b, _, _] = encoded.dims();
        let x = encoded
            .swap_dims(1, 2)
            .reshape([b, self.hidden_size, self.grid, self.grid]);

        let x = match &self.decoder {
            Some(decoder) => decoder.forward(x, skips.as_ref())?,
            None => x,
        };

        self.head.forward(x)
    }

    /// Forward pass for training and validation.
    #[cfg(feature = "train")]
    pub fn forward_segmentation(
        &self,
        batch: SegmentationBatch<B>,
    ) -> TransUnetResult<SegmentationOutput<B>> {
        let logits = self.forward(batch.images)?;
        let loss = self.loss.forward(logits.clone(), batch.targets.clone());

        Ok(SegmentationOutput {
            loss,
            logits,
            target: batch.targets,
        })
    }
}

#[cfg(feature = "train")]
impl<B: AutodiffBackend> TrainStep<SegmentationBatch<B>, SegmentationOutput<B>> for TransUnet<B> {
    fn step(&self, batch: SegmentationBatch<B>) -> TrainOutput<SegmentationOutput<B>> {
        let item = self.forward_segmentation(batch).unwrap();
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

#[cfg(feature = "train")]
impl<B: Backend> ValidStep<SegmentationBatch<B>, SegmentationOutput<B>> for TransUnet<B> {
    fn step(&self, batch: SegmentationBatch<B>) -> SegmentationOutput<B> {
        self.forward_segmentation(batch).unwrap()
    }
}
