use thiserror::Error;

/// The error type for `TransUNet-Burn` operations.
///
/// Configuration problems abort graph construction, shape-contract
/// violations abort the forward pass at the offending stage, and weight
/// loading failures are surfaced to the caller without retry.
#[derive(Error, Debug)]
pub enum TransUnetError {
    /// Error for when an invalid model configuration is provided.
    /// Raised before any parameter is allocated.
    #[error("Invalid model configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// Error for when a tensor does not match the shape contract of the
    /// stage consuming it.
    #[error("Shape mismatch in {stage}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// The pipeline stage that rejected the tensor.
        stage: String,
        /// The expected shape or extent.
        expected: String,
        /// The actual shape or extent.
        actual: String,
    },

    /// Error for when loading pretrained weights fails.
    #[error("Failed to load weights: {reason}")]
    WeightLoadingFailed {
        /// The reason for the weight loading failure.
        reason: String,
    },
}

/// A specialized `Result` type for `TransUNet-Burn` operations.
pub type TransUnetResult<T> = Result<T, TransUnetError>;
