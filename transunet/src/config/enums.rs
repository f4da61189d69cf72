//! Enumeration types for TransUNet configuration.

use burn::prelude::*;

/// Defines how the input image is turned into a token sequence.
///
/// The two variants correspond to the two supported architectures: a pure
/// transformer that patchifies the raw image, and a hybrid that runs a
/// convolutional feature extractor first and patchifies its deepest feature
/// map. The variant is resolved once at model construction; skip
/// connections exist only under `Resnet`.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum Stem {
    /// Patchify the raw image directly.
    Patchify,
    /// Run a ResNet feature extractor first. The payload is the side length
    /// of the token grid produced from the 1/16-scale feature map.
    Resnet(usize),
}
