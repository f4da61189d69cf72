//! Pretrained encoder weight management.
//!
//! The two architecture families publish their archives under different
//! URL schemes, so the variant is an explicit selector; nothing is ever
//! resolved by silent precedence. Archives are expected on disk already,
//! converted to one of the supported record formats. Download and
//! conversion are external steps, and any failure here is surfaced to the
//! caller unchanged.

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
};
use burn_import::safetensors::{LoadArgs as SafetensorsLoadArgs, SafetensorsFileRecorder};

use crate::{
    error::{TransUnetError, TransUnetResult},
    models::{TransUnet, TransUnetRecord},
};

/// Archive base for the pure-transformer encoders.
const VIT_MODELS_URL: &str = "https://storage.googleapis.com/vit_models/imagenet21k/";
/// Archive base for the hybrid encoders. Kept separate from the pure
/// family; the two schemes are not interchangeable.
const HYBRID_MODELS_URL: &str =
    "https://storage.googleapis.com/vit_models/imagenet21k+imagenet2012/";

/// Selects which pretrained encoder archive to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PretrainedEncoder {
    /// ViT-B/16, pure transformer.
    ViTB16,
    /// ViT-L/16, pure transformer.
    ViTL16,
    /// ResNet-50 + ViT-B/16 hybrid.
    R50ViTB16,
}

impl PretrainedEncoder {
    /// Stem of the archive file name, without extension.
    #[must_use]
    pub const fn archive_stem(&self) -> &'static str {
        match self {
            Self::ViTB16 => "ViT-B_16",
            Self::ViTL16 => "ViT-L_16",
            Self::R50ViTB16 => "R50+ViT-B_16",
        }
    }

    /// Source URL of the original archive for this variant.
    #[must_use]
    pub fn url(&self) -> String {
        let base = match self {
            Self::ViTB16 | Self::ViTL16 => VIT_MODELS_URL,
            Self::R50ViTB16 => HYBRID_MODELS_URL,
        };
        format!("{}{}.npz", base, self.archive_stem())
    }

    /// Location of the converted archive in the user cache directory.
    ///
    /// # Errors
    ///
    /// Returns `WeightLoadingFailed` when the platform exposes no cache
    /// directory or no converted archive is present.
    pub fn cached_path(&self) -> TransUnetResult<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| TransUnetError::WeightLoadingFailed {
                reason: "no cache directory available on this platform".to_string(),
            })?
            .join("transunet")
            .join("weights");

        for extension in ["mpk", "safetensors"] {
            let candidate = cache_dir.join(format!("{}.{extension}", self.archive_stem()));
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        Err(TransUnetError::WeightLoadingFailed {
            reason: format!(
                "no converted archive for {} in {}; fetch {} and convert it first",
                self.archive_stem(),
                cache_dir.display(),
                self.url()
            ),
        })
    }
}

/// Loads a model record from a converted weight archive.
///
/// Shape disagreements between the archive and the model's parameters fail
/// inside the recorder and are reported as `WeightLoadingFailed`.
pub fn load_record<B: Backend>(
    path: &Path,
    device: &Device<B>,
) -> TransUnetResult<TransUnetRecord<B>> {
    match path.extension().and_then(|extension| extension.to_str()) {
        Some("mpk") => {
            let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
            recorder
                .load(path.to_path_buf(), device)
                .map_err(|e| TransUnetError::WeightLoadingFailed {
                    reason: format!("MessagePack record loading failed: {e}"),
                })
        }
        Some("safetensors") => {
            let load_args = SafetensorsLoadArgs::new(path.to_path_buf());
            let recorder = SafetensorsFileRecorder::<FullPrecisionSettings>::default();
            recorder
                .load(load_args, device)
                .map_err(|e| TransUnetError::WeightLoadingFailed {
                    reason: format!("Safetensors record loading failed: {e}"),
                })
        }
        _ => Err(TransUnetError::WeightLoadingFailed {
            reason: format!("unsupported weight file format: {}", path.display()),
        }),
    }
}

/// Binds a cached pretrained archive onto a freshly built model.
///
/// # Errors
///
/// Returns `WeightLoadingFailed` when the archive is missing, unreadable,
/// or does not match the model's parameter shapes.
pub fn load_pretrained<B: Backend>(
    encoder: PretrainedEncoder,
    model: TransUnet<B>,
    device: &Device<B>,
) -> TransUnetResult<TransUnet<B>> {
    let path = encoder.cached_path()?;
    let record = load_record(&path, device)?;

    Ok(model.load_record(record))
}
