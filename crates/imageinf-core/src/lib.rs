//! imageinf Core
//!
//! Core types and error handling shared across imageinf components.
//!
//! This crate provides:
//! - The request/response data model (file references, predictions, metadata)
//! - Model descriptors and tuning parameters
//! - The authenticated principal passed down to retrieval
//! - Error types and result handling

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    FileReference, ImageMetadata, InferenceResponse, InferenceResult, ModelMetadata, ModelType,
    Prediction, Principal, Sensitivity, TuningParams,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{
        FileReference, InferenceResponse, InferenceResult, Prediction, Principal, TuningParams,
    };
}
