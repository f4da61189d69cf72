//! Composite segmentation loss.
//!
//! Combines categorical cross-entropy computed from logits with a
//! per-class-weighted generalized Dice loss. Both terms reduce to a batch
//! scalar before being mixed.
//!
//! The Dice term carries two numeric guards: a class absent from a sample
//! would get an infinite `1/count^2` weight, which is clamped to a small
//! epsilon, and a degenerate sample whose weighted union vanishes would
//! produce a non-finite ratio, which is clamped to zero. Both guards are
//! silent and deterministic; they never propagate NaN or Inf into the
//! trained parameters.

use burn::{
    prelude::*,
    tensor::{
        activation::{log_softmax, softmax},
        backend::Backend,
        Tensor,
    },
};

/// Configuration for the composite loss function.
#[derive(Config, Debug)]
pub struct CompositeLossConfig {
    #[config(default = 0.5)]
    pub ce_weight: f32,
    #[config(default = 0.5)]
    pub dice_weight: f32,
    #[config(default = 1e-6)]
    pub epsilon: f32,
}

/// Cross-entropy plus generalized Dice, weighted per class.
///
/// A state-free pure function over `(logits, one-hot target)` pairs; the
/// module only carries its mixing weights.
#[derive(Module, Debug)]
pub struct CompositeLoss<B: Backend> {
    pub ce_weight: f32,
    pub dice_weight: f32,
    pub epsilon: f32,
    _phantom: std::marker::PhantomData<B>,
}

impl CompositeLossConfig {
    /// Initialize a new composite loss function with the given configuration.
    pub const fn init<B: Backend>(&self) -> CompositeLoss<B> {
        CompositeLoss {
            ce_weight: self.ce_weight,
            dice_weight: self.dice_weight,
            epsilon: self.epsilon,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<B: Backend> Default for CompositeLoss<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> CompositeLoss<B> {
    /// Create a new composite loss function with default configuration.
    pub fn new() -> Self {
        CompositeLossConfig::new().init()
    }

    /// Calculate the combined loss.
    ///
    /// # Arguments
    /// * `logits` - Unnormalized per-class scores with shape [N, C, H, W]
    /// * `target` - One-hot ground truth with shape [N, C, H, W]
    ///
    /// # Returns
    /// Scalar loss tensor
    pub fn forward(&self, logits: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1> {
        self.assertions(&logits, &target);

        let ce = self.cross_entropy_loss(logits.clone(), target.clone());
        let dice = self.generalized_dice_loss(logits, target);

        ce * self.ce_weight + dice * self.dice_weight
    }

    /// Input validation
    fn assertions(&self, logits: &Tensor<B, 4>, target: &Tensor<B, 4>) {
        assert_eq!(
            logits.shape(),
            target.shape(),
            "Logits and target must have the same shape. Got logits: {:?}, target: {:?}",
            logits.shape(),
            target.shape()
        );
    }

    /// Categorical cross-entropy computed from logits.
    ///
    /// Uses `log_softmax` rather than a softmax-then-log pair, which keeps
    /// the computation stable for large-magnitude logits.
    pub fn cross_entropy_loss(&self, logits: Tensor<B, 4>, target: Tensor<B, 4>) -> Tensor<B, 1> {
        let log_probs = log_softmax(logits, 1);

        (-(target * log_probs).sum_dim(1)).mean()
    }

    /// Generalized Dice loss with inverse-square class weighting.
    ///
    /// # Arguments
    /// * `logits` - Unnormalized per-class scores with shape [N, C, H, W]
    /// * `target` - One-hot ground truth with shape [N, C, H, W]
    pub fn generalized_dice_loss(
        &self,
        logits: Tensor<B, 4>,
        target: Tensor<B, 4>,
    ) -> Tensor<B, 1> {
        let [b, c, h, w] = logits.dims();

        // [b, c, h*w]
        let probs: Tensor<B, 3> = softmax(logits, 1).reshape([b, c, h * w]);
        let target: Tensor<B, 3> = target.reshape([b, c, h * w]);

        // [b, c]
        // Count how many pixels of each class are present in each sample.
        // A zero count makes the inverse-square weight infinite, so those
        // entries get a fixed epsilon instead.
        let counts = target.clone().sum_dim(2).reshape([b, c]);
        let absent = counts.clone().equal_elem(0.0);
        let weights = counts.powf_scalar(-2.0).mask_fill(absent, self.epsilon);

        let intersection = (target.clone() * probs.clone()).sum_dim(2).reshape([b, c]);
        let union_sum = (target + probs).sum_dim(2).reshape([b, c]);

        // [b]
        let numerator = (weights.clone() * intersection).sum_dim(1).reshape([b]);
        let denominator = (weights * union_sum).sum_dim(1).reshape([b]);

        // A vanishing denominator means the sample had no mass at all;
        // its ratio is not finite and contributes zero instead.
        let degenerate = denominator.clone().equal_elem(0.0);
        let dice = Tensor::ones_like(&numerator) - numerator * 2.0 / denominator;

        dice.mask_fill(degenerate, 0.0).mean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, ElementConversion};

    type TestBackend = NdArray<f32>;

    /// One-hot target with class 2 at every pixel, shape [1, 3, 4, 4].
    fn uniform_class_two(device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 4> {
        let zeros = Tensor::<TestBackend, 4>::zeros([1, 2, 4, 4], device);
        let ones = Tensor::<TestBackend, 4>::ones([1, 1, 4, 4], device);
        Tensor::cat(vec![zeros, ones], 1)
    }

    #[test]
    fn loss_is_deterministic() {
        let device = Default::default();
        let loss = CompositeLoss::<TestBackend>::new();

        let logits = Tensor::<TestBackend, 4>::random(
            [2, 3, 4, 4],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let target = uniform_class_two(&device).repeat_dim(0, 2);

        let first = loss
            .forward(logits.clone(), target.clone())
            .into_scalar()
            .elem::<f32>();
        let second = loss.forward(logits, target).into_scalar().elem::<f32>();

        assert_eq!(first, second);
    }

    #[test]
    fn confident_correct_prediction_drives_both_terms_to_zero() {
        let device = Default::default();
        let loss = CompositeLoss::<TestBackend>::new();

        let target = uniform_class_two(&device);
        // Strongly separated logits make the softmax effectively one-hot.
        let logits = (target.clone() - 0.5) * 40.0;

        let ce = loss
            .cross_entropy_loss(logits.clone(), target.clone())
            .into_scalar()
            .elem::<f32>();
        let dice = loss
            .generalized_dice_loss(logits, target)
            .into_scalar()
            .elem::<f32>();

        assert!(ce.abs() < 1e-3, "cross-entropy should vanish, got {ce}");
        assert!(dice.abs() < 1e-3, "dice loss should vanish, got {dice}");
    }

    #[test]
    fn absent_class_keeps_loss_finite() {
        let device = Default::default();
        let loss = CompositeLoss::<TestBackend>::new();

        // Class 0 everywhere, classes 1 and 2 absent from the sample.
        let ones = Tensor::<TestBackend, 4>::ones([1, 1, 4, 4], &device);
        let zeros = Tensor::<TestBackend, 4>::zeros([1, 2, 4, 4], &device);
        let target = Tensor::cat(vec![ones, zeros], 1);

        let logits = Tensor::<TestBackend, 4>::random(
            [1, 3, 4, 4],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let value = loss.forward(logits, target).into_scalar().elem::<f32>();
        assert!(value.is_finite(), "loss must stay finite, got {value}");
    }

    #[test]
    fn all_empty_target_keeps_loss_finite() {
        let device = Default::default();
        let loss = CompositeLoss::<TestBackend>::new();

        let target = Tensor::<TestBackend, 4>::zeros([1, 3, 4, 4], &device);
        let logits = Tensor::<TestBackend, 4>::random(
            [1, 3, 4, 4],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let value = loss
            .generalized_dice_loss(logits, target)
            .into_scalar()
            .elem::<f32>();
        assert!(value.is_finite(), "dice must stay finite, got {value}");
    }
}
