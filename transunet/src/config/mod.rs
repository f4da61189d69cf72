//! Configuration module for TransUNet.
//!
//! This module provides configuration structures and enums for the TransUNet
//! model. It is organized into two submodules:
//! - `core`: Contains the main configuration structures
//! - `enums`: Contains the enumeration types used in configurations

pub mod core;
pub mod enums;

pub use core::{CascadeConfig, ModelConfig};
pub use enums::Stem;
