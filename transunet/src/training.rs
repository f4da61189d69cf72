//! Training integration for TransUNet.
//!
//! Defines the batch and output structures used by the Burn training
//! framework. Optimizer stepping, checkpointing and execution strategy are
//! the training loop's concern; this module only shapes the data that
//! crosses the boundary.

use burn::{
    prelude::*,
    tensor::Transaction,
    train::metric::{Adaptor, ItemLazy, LossInput},
};

/// A batch of images with their one-hot segmentation targets.
#[derive(Debug, Clone)]
pub struct SegmentationBatch<B: Backend> {
    /// Batched input images with shape [B, 3, H, W].
    pub images: Tensor<B, 4>,
    /// Batched one-hot targets with shape [B, n_classes, H, W].
    pub targets: Tensor<B, 4>,
}

/// Output structure for TransUNet training and validation steps.
#[derive(Debug, Clone)]
pub struct SegmentationOutput<B: Backend> {
    pub logits: Tensor<B, 4>,
    pub target: Tensor<B, 4>,
    pub loss: Tensor<B, 1>,
}

impl<B: Backend> ItemLazy for SegmentationOutput<B> {
    type ItemSync = Self;

    fn sync(self) -> Self::ItemSync {
        let transaction_result = Transaction::default()
            .register(self.logits)
            .register(self.target)
            .register(self.loss)
            .execute();

        let [logits, target, loss] = transaction_result.try_into().unwrap_or_else(|_| {
            panic!(
                "Failed to extract exactly 3 tensors from transaction. \
                     Expected: [logits, target, loss]. This indicates a programming error \
                     in SegmentationOutput::sync implementation."
            )
        });

        let device = &Default::default();

        Self {
            logits: Tensor::from_data(logits, device),
            target: Tensor::from_data(target, device),
            loss: Tensor::from_data(loss, device),
        }
    }
}

impl<B: Backend> Adaptor<LossInput<B>> for SegmentationOutput<B> {
    fn adapt(&self) -> LossInput<B> {
        LossInput::new(self.loss.clone())
    }
}
