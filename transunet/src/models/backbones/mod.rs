//! Backbone networks used by the hybrid stem.

pub mod resnet;

pub use resnet::{HybridFeatures, ResNetEncoder, ResNetEncoderConfig};
