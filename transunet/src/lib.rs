mod config;
mod error;
mod losses;
mod models;
#[cfg(feature = "train")]
mod training;
#[cfg(feature = "pretrained")]
mod weights;

#[cfg(test)]
mod tests;

pub use config::*;
pub use error::{TransUnetError, TransUnetResult};
pub use losses::{CompositeLoss, CompositeLossConfig};
pub use models::{TransUnet, TransUnetConfig, TransUnetRecord};
#[cfg(feature = "train")]
pub use training::{SegmentationBatch, SegmentationOutput};
#[cfg(feature = "pretrained")]
pub use weights::{load_pretrained, load_record, PretrainedEncoder};
