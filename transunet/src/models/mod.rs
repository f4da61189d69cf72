//! # Model Architectures
//!
//! This module aggregates the components of the TransUNet architecture:
//!
//! - `backbones`: The ResNet feature extractor used by the hybrid stem.
//! - `encoder`: Patch embedding, position embeddings and the transformer
//!   encoder stack.
//! - `decoder`: The decoder cascade and segmentation head.
//! - `transunet`: The main `TransUnet` model tying everything together.

pub mod backbones;
pub mod decoder;
pub mod encoder;
pub mod transunet;

pub use transunet::{TransUnet, TransUnetConfig, TransUnetRecord};
