//! Loss functions for TransUNet training.

pub mod segmentation;

pub use segmentation::{CompositeLoss, CompositeLossConfig};
