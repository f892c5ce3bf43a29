//! imageinf Classifiers
//!
//! Image classifiers and the registry that dispatches to them.
//!
//! Two classifier families are supported:
//! - Fixed-taxonomy: softmax over a fixed label vocabulary, top 5 reported
//! - Zero-shot: independent present/absent scoring of candidate labels, thresholded
//!   by a sensitivity preset, zero or more labels reported
//!
//! Fixed-taxonomy labels can be collapsed into coarse categories with the
//! [`CategoryAggregator`]. Network backends sit behind the [`LogitsBackend`] and
//! [`EmbeddingBackend`] traits; the Candle implementations need the `ml-models`
//! feature.

pub mod candle_backend;
pub mod catalog;
pub mod categories;
pub mod classifier;
pub mod fixed_taxonomy;
pub mod registry;
pub mod zero_shot;

pub use catalog::{
    register_builtin_models, Architecture, BackendOptions, DeviceSpec, ModelDefinition, BUILTIN_MODELS,
    DEFAULT_MODEL,
};
pub use categories::{aggregate_predictions, CategoryAggregator, CATEGORIES};
pub use classifier::{EmbeddingBackend, ImageClassifier, LogitsBackend};
pub use fixed_taxonomy::FixedTaxonomyClassifier;
pub use registry::{ModelConstructor, ModelEntry, ModelRegistry, PreloadSummary};
pub use zero_shot::{Preset, SensitivityPresets, ZeroShotClassifier, DEFAULT_LABELS};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::categories::CategoryAggregator;
    pub use crate::classifier::{EmbeddingBackend, ImageClassifier, LogitsBackend};
    pub use crate::registry::{ModelConstructor, ModelRegistry};
}
