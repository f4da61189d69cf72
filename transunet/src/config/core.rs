//! Core configuration structures for TransUNet.
//!
//! `ModelConfig` fully determines the computation graph: every shape that
//! matters downstream is derivable from it, and `validate` rejects
//! inconsistent settings before any parameter is allocated.

use burn::prelude::*;

use super::enums::Stem;
use crate::error::{TransUnetError, TransUnetResult};

/// Spatial reduction factor of the ResNet feature extractor.
const BACKBONE_REDUCTION: usize = 16;

/// Configuration of the decoder cascade.
///
/// Presence of this config on [`ModelConfig`] toggles whether the
/// segmentation head runs on a decoded map or directly on the reshaped
/// encoder output.
#[derive(Config, Debug)]
pub struct CascadeConfig {
    /// Output channels of each decoder stage, coarsest first. One stage is
    /// built per entry.
    pub channels: Vec<usize>,
    /// How many leading stages fuse a skip connection. Stages beyond this
    /// count run skip-free.
    #[config(default = "3")]
    pub n_skip: usize,
}

/// Main configuration for the TransUNet model.
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Side length of the square input image.
    #[config(default = "512")]
    pub image_size: usize,
    /// Side length of one embedding patch when patchifying the raw image.
    #[config(default = "16")]
    pub patch_size: usize,
    /// Number of transformer blocks in the encoder.
    #[config(default = "12")]
    pub n_layers: usize,
    /// Width of the token embedding.
    #[config(default = "768")]
    pub hidden_size: usize,
    /// Number of self-attention heads.
    #[config(default = "12")]
    pub n_heads: usize,
    /// Hidden width of the position-wise feed-forward sublayer.
    #[config(default = "3072")]
    pub mlp_dim: usize,
    /// Dropout probability applied in the embeddings and encoder.
    #[config(default = "0.1")]
    pub dropout: f64,
    /// Output channels of the segmentation head, normally the class count.
    #[config(default = "9")]
    pub filters: usize,
    /// Kernel size of the segmentation head convolution. Must be odd.
    #[config(default = "1")]
    pub kernel_size: usize,
    /// Bilinear upsampling factor applied after the head convolution.
    /// A factor of 1 disables the upsampling.
    #[config(default = "16")]
    pub upsampling_factor: usize,
    /// How the input image is turned into tokens.
    #[config(default = "Stem::Patchify")]
    pub stem: Stem,
    /// Decoder cascade configuration. `None` means no decoder stage.
    #[config(default = "None")]
    pub decoder: Option<CascadeConfig>,
}

impl ModelConfig {
    /// Validate the configuration and return appropriate errors for
    /// invalid settings.
    ///
    /// # Errors
    ///
    /// Returns `Err(TransUnetError::InvalidConfiguration)` if any
    /// validation rule is violated.
    pub fn validate(&self) -> TransUnetResult<()> {
        if self.patch_size == 0 || self.image_size % self.patch_size != 0 {
            return Err(TransUnetError::InvalidConfiguration {
                reason: format!(
                    "image_size must be a multiple of patch_size, got {} and {}",
                    self.image_size, self.patch_size
                ),
            });
        }

        if self.n_heads == 0 || self.hidden_size % self.n_heads != 0 {
            return Err(TransUnetError::InvalidConfiguration {
                reason: format!(
                    "hidden_size {} must be divisible by n_heads {}",
                    self.hidden_size, self.n_heads
                ),
            });
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(TransUnetError::InvalidConfiguration {
                reason: format!("dropout must be in [0, 1), got {}", self.dropout),
            });
        }

        if self.kernel_size % 2 == 0 {
            return Err(TransUnetError::InvalidConfiguration {
                reason: format!(
                    "segmentation head kernel_size must be odd, got {}",
                    self.kernel_size
                ),
            });
        }

        if self.upsampling_factor == 0 {
            return Err(TransUnetError::InvalidConfiguration {
                reason: "upsampling_factor must be at least 1".to_string(),
            });
        }

        if let Some(cascade) = &self.decoder {
            if cascade.channels.is_empty() {
                return Err(TransUnetError::InvalidConfiguration {
                    reason: "decoder channel list must not be empty".to_string(),
                });
            }
            if cascade.n_skip > self.skip_channels().len() {
                return Err(TransUnetError::InvalidConfiguration {
                    reason: format!(
                        "n_skip must be <= {}, got {}",
                        self.skip_channels().len(),
                        cascade.n_skip
                    ),
                });
            }
        }

        if let Stem::Resnet(grid) = self.stem {
            if self.image_size % BACKBONE_REDUCTION != 0 {
                return Err(TransUnetError::InvalidConfiguration {
                    reason: format!(
                        "image_size must be a multiple of {} for the hybrid stem, got {}",
                        BACKBONE_REDUCTION, self.image_size
                    ),
                });
            }
            let feature_size = self.image_size / BACKBONE_REDUCTION;
            if grid == 0 || feature_size % grid != 0 {
                return Err(TransUnetError::InvalidConfiguration {
                    reason: format!(
                        "token grid {} must evenly tile the {}x{} backbone feature map",
                        grid, feature_size, feature_size
                    ),
                });
            }
        }

        Ok(())
    }

    /// Side length of the token grid produced by the stem.
    #[must_use]
    pub fn token_grid(&self) -> usize {
        match self.stem {
            Stem::Patchify => self.image_size / self.patch_size,
            Stem::Resnet(grid) => grid,
        }
    }

    /// Number of tokens in the encoder sequence.
    #[must_use]
    pub fn n_patches(&self) -> usize {
        let grid = self.token_grid();
        grid * grid
    }

    /// Patch size used by the embedding projection.
    ///
    /// For the hybrid stem this is derived from the token grid against the
    /// 1/16-scale feature map rather than taken from `patch_size`.
    #[must_use]
    pub fn embedding_patch_size(&self) -> usize {
        match self.stem {
            Stem::Patchify => self.patch_size,
            Stem::Resnet(grid) => (self.image_size / BACKBONE_REDUCTION) / grid,
        }
    }

    /// Spatial size of the map entering the embedding projection.
    #[must_use]
    pub const fn embedding_feature_size(&self) -> usize {
        match self.stem {
            Stem::Patchify => self.image_size,
            Stem::Resnet(_) => self.image_size / BACKBONE_REDUCTION,
        }
    }

    /// Channel depth of the map entering the embedding projection.
    #[must_use]
    pub const fn embedding_in_channels(&self) -> usize {
        match self.stem {
            Stem::Patchify => 3,
            Stem::Resnet(_) => 1024,
        }
    }

    /// Channel depths of the skip connections, in decoder consumption
    /// order (coarsest skip first).
    #[must_use]
    pub const fn skip_channels(&self) -> [usize; 3] {
        [512, 256, 64]
    }

    /// Per-stage skip channel counts for the decoder cascade. A count of
    /// zero marks a skip-free stage.
    #[must_use]
    pub fn cascade_skip_channels(&self, cascade: &CascadeConfig) -> Vec<usize> {
        let skips = self.skip_channels();
        let n_skip = match self.stem {
            Stem::Patchify => 0,
            Stem::Resnet(_) => cascade.n_skip,
        };
        (0..cascade.channels.len())
            .map(|stage| if stage < n_skip { skips[stage] } else { 0 })
            .collect()
    }
}
