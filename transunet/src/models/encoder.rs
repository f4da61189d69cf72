//! # Transformer Encoder
//!
//! Sequence side of the network: patch embedding, learned position
//! embeddings, and a stack of pre-normalized self-attention blocks.
//!
//! ## Shape conventions
//!
//! - Feature maps are `[batch, channels, height, width]`.
//! - Token sequences are `[batch, seq_len, hidden_size]`, where
//!   `seq_len = (feature_size / patch_size)^2`.
//!
//! Every block maps a token sequence to a token sequence of identical
//! shape, which is what allows the encoder to be a uniform loop.

use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Dropout, DropoutConfig, Gelu, LayerNorm, LayerNormConfig, Linear, LinearConfig,
    },
    prelude::*,
    tensor::{activation::softmax, Distribution},
};

use crate::error::{TransUnetError, TransUnetResult};

/// Configuration for the patch embedding projection.
///
/// An incoming map of size `feature_size` is divided into non-overlapping
/// `patch_size` x `patch_size` patches, each projected to `hidden_size`
/// dimensions by a strided convolution.
#[derive(Config, Debug)]
pub struct PatchEmbeddingsConfig {
    feature_size: usize,
    patch_size: usize,
    in_channels: usize,
    hidden_size: usize,
}

impl PatchEmbeddingsConfig {
    /// Initializes a `PatchEmbeddings` module.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` when `feature_size` is not divisible
    /// by `patch_size`. The check runs here so an invalid combination can
    /// never reach a forward pass.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> TransUnetResult<PatchEmbeddings<B>> {
        if self.patch_size == 0 || self.feature_size % self.patch_size != 0 {
            return Err(TransUnetError::InvalidConfiguration {
                reason: format!(
                    "feature size {} is not divisible by patch size {}",
                    self.feature_size, self.patch_size
                ),
            });
        }

        let proj = Conv2dConfig::new(
            [self.in_channels, self.hidden_size],
            [self.patch_size, self.patch_size],
        )
        .with_stride([self.patch_size, self.patch_size])
        .init(device);

        let grid = self.feature_size / self.patch_size;

        Ok(PatchEmbeddings {
            n_patches: grid * grid,
            proj,
        })
    }
}

/// Strided linear projection of non-overlapping patches into tokens.
#[derive(Module, Debug)]
pub struct PatchEmbeddings<B: Backend> {
    n_patches: usize,
    proj: Conv2d<B>,
}

impl<B: Backend> PatchEmbeddings<B> {
    /// Projects a feature map into a token sequence.
    ///
    /// # Arguments
    ///
    /// * `x` - Input map of shape `[batch, in_channels, size, size]`.
    ///
    /// # Returns
    ///
    /// Token sequence of shape `[batch, n_patches, hidden_size]`.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 3> {
        let x = self.proj.forward(x);
        let x: Tensor<B, 3> = x.flatten(2, 3);
        x.swap_dims(1, 2)
    }

    /// Number of tokens produced per sample.
    #[must_use]
    pub const fn n_patches(&self) -> usize {
        self.n_patches
    }
}

/// Configuration for the learned position embeddings.
#[derive(Config, Debug)]
pub struct PositionEmbeddingsConfig {
    n_positions: usize,
    hidden_size: usize,
    #[config(default = "0.0")]
    dropout: f64,
}

impl PositionEmbeddingsConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> PositionEmbeddings<B> {
        let table = Tensor::random(
            [1, self.n_positions, self.hidden_size],
            Distribution::Normal(0.0, 0.02),
            device,
        );

        PositionEmbeddings {
            n_positions: self.n_positions,
            table: Param::from_tensor(table),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Learned per-position bias added to each token.
///
/// The bias is indexed positionally, so the table is sized to one fixed
/// sequence length. Feeding a sequence of any other length is a contract
/// violation, not something to tolerate silently.
#[derive(Module, Debug)]
pub struct PositionEmbeddings<B: Backend> {
    n_positions: usize,
    table: Param<Tensor<B, 3>>,
    dropout: Dropout,
}

impl<B: Backend> PositionEmbeddings<B> {
    /// Adds the position bias to a token sequence.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` when the sequence length differs from the
    /// length the table was built for.
    pub fn forward(&self, x: Tensor<B, 3>) -> TransUnetResult<Tensor<B, 3>> {
        let [_, n, _] = x.dims();
        if n != self.n_positions {
            return Err(TransUnetError::ShapeMismatch {
                stage: "position embeddings".to_string(),
                expected: format!("sequence length {}", self.n_positions),
                actual: format!("sequence length {n}"),
            });
        }

        Ok(self.dropout.forward(x + self.table.val()))
    }
}

/// Configuration for the position-wise feed-forward sublayer.
#[derive(Config, Debug)]
pub struct MlpConfig {
    hidden_size: usize,
    mlp_dim: usize,
    #[config(default = "0.0")]
    dropout: f64,
}

impl MlpConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Mlp<B> {
        Mlp {
            fc1: LinearConfig::new(self.hidden_size, self.mlp_dim).init(device),
            act: Gelu::new(),
            fc2: LinearConfig::new(self.mlp_dim, self.hidden_size).init(device),
            drop: DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Two linear transformations with GELU activation and dropout.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    fc1: Linear<B>,
    act: Gelu,
    fc2: Linear<B>,
    drop: Dropout,
}

impl<B: Backend> Mlp<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.fc1.forward(x);
        let x = self.act.forward(x);
        let x = self.drop.forward(x);
        let x = self.fc2.forward(x);

        self.drop.forward(x)
    }
}

/// Configuration for global multi-head self-attention.
#[derive(Config, Debug)]
pub struct MultiHeadSelfAttentionConfig {
    hidden_size: usize,
    n_heads: usize,
    #[config(default = "0.0")]
    dropout: f64,
}

impl MultiHeadSelfAttentionConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> MultiHeadSelfAttention<B> {
        let head_dim = self.hidden_size / self.n_heads;

        MultiHeadSelfAttention {
            n_heads: self.n_heads,
            scale: (head_dim as f64).powf(-0.5),
            qkv: LinearConfig::new(self.hidden_size, self.hidden_size * 3).init(device),
            attn_drop: DropoutConfig::new(self.dropout).init(),
            proj: LinearConfig::new(self.hidden_size, self.hidden_size).init(device),
            proj_drop: DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Multi-head self-attention over the full token sequence.
///
/// Queries, keys and values come from one fused projection; attention is
/// scaled dot-product over all positions.
#[derive(Module, Debug)]
pub struct MultiHeadSelfAttention<B: Backend> {
    n_heads: usize,
    scale: f64,
    qkv: Linear<B>,
    attn_drop: Dropout,
    proj: Linear<B>,
    proj_drop: Dropout,
}

impl<B: Backend> MultiHeadSelfAttention<B> {
    /// # Arguments
    ///
    /// * `x` - Token sequence of shape `[batch, seq_len, hidden_size]`.
    ///
    /// # Returns
    ///
    /// Token sequence of identical shape.
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [b, n, c] = x.dims();
        let qkv = self
            .qkv
            .forward(x)
            .reshape([b, n, 3, self.n_heads, c / self.n_heads])
            .permute([2, 0, 3, 1, 4]);
        let [_, d2, d3, d4, d5] = qkv.dims();
        let q: Tensor<B, 4> = qkv
            .clone()
            .slice([0..1, 0..d2, 0..d3, 0..d4, 0..d5])
            .reshape([d2, d3, d4, d5]);
        let k: Tensor<B, 4> = qkv
            .clone()
            .slice([1..2, 0..d2, 0..d3, 0..d4, 0..d5])
            .reshape([d2, d3, d4, d5]);
        let v: Tensor<B, 4> = qkv
            .slice([2..3, 0..d2, 0..d3, 0..d4, 0..d5])
            .reshape([d2, d3, d4, d5]);

        let attn = (q * self.scale).matmul(k.swap_dims(2, 3));
        let attn = softmax(attn, 3);
        let attn = self.attn_drop.forward(attn);

        let x = attn.matmul(v).swap_dims(1, 2).reshape([b, n, c]);
        let x = self.proj.forward(x);

        self.proj_drop.forward(x)
    }
}

/// Configuration for one transformer encoder block.
#[derive(Config, Debug)]
pub struct TransformerBlockConfig {
    hidden_size: usize,
    n_heads: usize,
    mlp_dim: usize,
    #[config(default = "0.0")]
    dropout: f64,
}

impl TransformerBlockConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> TransformerBlock<B> {
        TransformerBlock {
            norm1: LayerNormConfig::new(self.hidden_size)
                .with_epsilon(1e-6)
                .init(device),
            attn: MultiHeadSelfAttentionConfig::new(self.hidden_size, self.n_heads)
                .with_dropout(self.dropout)
                .init(device),
            norm2: LayerNormConfig::new(self.hidden_size)
                .with_epsilon(1e-6)
                .init(device),
            mlp: MlpConfig::new(self.hidden_size, self.mlp_dim)
                .with_dropout(self.dropout)
                .init(device),
        }
    }
}

/// One self-attention plus feed-forward unit with pre-normalization and
/// residual connections.
#[derive(Module, Debug)]
pub struct TransformerBlock<B: Backend> {
    norm1: LayerNorm<B>,
    attn: MultiHeadSelfAttention<B>,
    norm2: LayerNorm<B>,
    mlp: Mlp<B>,
}

impl<B: Backend> TransformerBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = x.clone() + self.attn.forward(self.norm1.forward(x));

        x.clone() + self.mlp.forward(self.norm2.forward(x))
    }
}

/// Configuration for the encoder stack.
#[derive(Config, Debug)]
pub struct EncoderConfig {
    n_layers: usize,
    hidden_size: usize,
    n_heads: usize,
    mlp_dim: usize,
    #[config(default = "0.0")]
    dropout: f64,
}

impl EncoderConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Encoder<B> {
        let blocks = (0..self.n_layers)
            .map(|_| {
                TransformerBlockConfig::new(self.hidden_size, self.n_heads, self.mlp_dim)
                    .with_dropout(self.dropout)
                    .init(device)
            })
            .collect();

        Encoder {
            blocks,
            norm: LayerNormConfig::new(self.hidden_size)
                .with_epsilon(1e-6)
                .init(device),
        }
    }
}

/// A stack of parameter-distinct transformer blocks followed by one final
/// normalization. Zero layers degenerate to the normalization alone.
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    blocks: Vec<TransformerBlock<B>>,
    norm: LayerNorm<B>,
}

impl<B: Backend> Encoder<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let mut x = x;
        for block in &self.blocks {
            x = block.forward(x);
        }

        self.norm.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn patch_embeddings_produce_squared_grid_tokens() {
        let device = Default::default();
        let embed = PatchEmbeddingsConfig::new(16, 4, 3, 32)
            .init::<TestBackend>(&device)
            .unwrap();

        let x = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 16], &device);
        let tokens = embed.forward(x);

        assert_eq!(embed.n_patches(), 16);
        assert_eq!(tokens.dims(), [2, 16, 32]);
    }

    #[test]
    fn patch_embeddings_reject_indivisible_sizes() {
        let device = Default::default();
        let result = PatchEmbeddingsConfig::new(10, 4, 3, 32).init::<TestBackend>(&device);

        match result {
            Err(TransUnetError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("not divisible"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn position_embeddings_reject_wrong_sequence_length() {
        let device = Default::default();
        let pos = PositionEmbeddingsConfig::new(16, 8).init::<TestBackend>(&device);

        let x = Tensor::<TestBackend, 3>::zeros([1, 9, 8], &device);
        match pos.forward(x) {
            Err(TransUnetError::ShapeMismatch { stage, .. }) => {
                assert_eq!(stage, "position embeddings");
            }
            _ => panic!("Expected ShapeMismatch error"),
        }
    }

    #[test]
    fn encoder_preserves_token_shape() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::random(
            [2, 16, 32],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        for n_layers in [0, 2] {
            let encoder = EncoderConfig::new(n_layers, 32, 4, 64).init::<TestBackend>(&device);
            let out = encoder.forward(x.clone());
            assert_eq!(out.dims(), [2, 16, 32]);
        }
    }
}
