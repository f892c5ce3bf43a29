//! Built-in model definitions and their registration

use crate::candle_backend;
use crate::classifier::{EmbeddingBackend, ImageClassifier, LogitsBackend};
use crate::fixed_taxonomy::FixedTaxonomyClassifier;
use crate::registry::{ModelConstructor, ModelRegistry};
use crate::zero_shot::{SensitivityPresets, ZeroShotClassifier};
use imageinf_core::{ModelMetadata, ModelType, Result, TuningParams};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Model used when a request does not name one
pub const DEFAULT_MODEL: &str = "google/vit-base-patch16-224";

/// Network family behind a built-in model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Vit,
    Swin,
    Clip,
}

/// A model known at compile time
#[derive(Debug, Clone, Copy)]
pub struct ModelDefinition {
    /// Hugging Face repository id, also the public model id
    pub id: &'static str,
    pub model_type: ModelType,
    pub architecture: Architecture,
    pub description: &'static str,
    /// Repository revision holding the weights
    pub revision: &'static str,
    /// Medium-sensitivity presence threshold for zero-shot models
    pub default_threshold: Option<f32>,
}

impl ModelDefinition {
    pub fn metadata(&self) -> ModelMetadata {
        ModelMetadata {
            name: self.id.to_string(),
            model_type: self.model_type,
            description: self.description.to_string(),
            link: format!("https://huggingface.co/{}", self.id),
        }
    }

    /// Sensitivity presets centered on the model's default threshold
    pub fn presets(&self) -> SensitivityPresets {
        self.default_threshold
            .map(SensitivityPresets::centered)
            .unwrap_or_default()
    }
}

/// Models registered at startup, in listing order
pub const BUILTIN_MODELS: &[ModelDefinition] = &[
    ModelDefinition {
        id: "google/vit-base-patch16-224",
        model_type: ModelType::FixedTaxonomy,
        architecture: Architecture::Vit,
        description: "Vision Transformer (ViT) base model - 86M params, 224x224",
        revision: "main",
        default_threshold: None,
    },
    ModelDefinition {
        id: "google/vit-large-patch16-224",
        model_type: ModelType::FixedTaxonomy,
        architecture: Architecture::Vit,
        description: "Vision Transformer (ViT) large model - 304M params, 224x224",
        revision: "main",
        default_threshold: None,
    },
    ModelDefinition {
        id: "google/vit-large-patch16-384",
        model_type: ModelType::FixedTaxonomy,
        architecture: Architecture::Vit,
        description: "Vision Transformer (ViT) large model - 304M params, 384x384 (high res)",
        revision: "main",
        default_threshold: None,
    },
    ModelDefinition {
        id: "microsoft/swin-large-patch4-window7-224",
        model_type: ModelType::FixedTaxonomy,
        architecture: Architecture::Swin,
        description: "Swin Transformer large - 197M params, 224x224",
        revision: "main",
        default_threshold: None,
    },
    ModelDefinition {
        id: "openai/clip-vit-large-patch14",
        model_type: ModelType::ZeroShot,
        architecture: Architecture::Clip,
        description: "CLIP ViT-Large - zero-shot multi-label (~400M params)",
        revision: "main",
        default_threshold: Some(0.55),
    },
    ModelDefinition {
        id: "wkcn/TinyCLIP-ViT-40M-32-Text-19M-LAION400M",
        model_type: ModelType::ZeroShot,
        architecture: Architecture::Clip,
        description: "TinyCLIP - efficient zero-shot classifier (~59M params total)",
        revision: "main",
        default_threshold: Some(0.50),
    },
    ModelDefinition {
        id: "laion/CLIP-ViT-H-14-laion2B-s32B-b79K",
        model_type: ModelType::ZeroShot,
        architecture: Architecture::Clip,
        description: "CLIP ViT-Huge - highest accuracy zero-shot (~1B params)",
        revision: "main",
        default_threshold: Some(0.60),
    },
];

/// Inference device selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSpec {
    /// CUDA, then Metal, then CPU
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

/// Options shared by every built-in backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendOptions {
    #[serde(default)]
    pub device: DeviceSpec,

    /// Load every model's weights at startup instead of on first use
    #[serde(default)]
    pub preload: bool,
}

/// Loads a backend on first use and hands out the same instance afterwards.
///
/// Weights are read-only after loading, so one backend serves every
/// classifier instance built from it.
struct LazyBackend<T: ?Sized> {
    slot: Mutex<Option<Arc<T>>>,
}

impl<T: ?Sized> LazyBackend<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    fn get_or_load(&self, load: impl FnOnce() -> Result<Arc<T>>) -> Result<Arc<T>> {
        let mut slot = self.slot.lock();
        if let Some(backend) = slot.as_ref() {
            return Ok(Arc::clone(backend));
        }
        let backend = load()?;
        *slot = Some(Arc::clone(&backend));
        Ok(backend)
    }
}

/// Constructor for a fixed-taxonomy model backed by a lazily loaded network
pub fn fixed_taxonomy_constructor(
    definition: ModelDefinition,
    options: BackendOptions,
) -> ModelConstructor {
    let backend: Arc<LazyBackend<dyn LogitsBackend>> = Arc::new(LazyBackend::new());
    Arc::new(move |_tuning: &TuningParams| -> Result<ImageClassifier> {
        let backend = backend.get_or_load(|| match definition.architecture {
            Architecture::Swin => candle_backend::load_swin(definition.id, definition.revision, options.device),
            _ => candle_backend::load_vit(definition.id, definition.revision, options.device),
        })?;
        Ok(ImageClassifier::FixedTaxonomy(FixedTaxonomyClassifier::new(backend)))
    })
}

/// Constructor for a zero-shot model; request labels are embedded per construction
pub fn zero_shot_constructor(definition: ModelDefinition, options: BackendOptions) -> ModelConstructor {
    let backend: Arc<LazyBackend<dyn EmbeddingBackend>> = Arc::new(LazyBackend::new());
    Arc::new(move |tuning: &TuningParams| -> Result<ImageClassifier> {
        let backend = backend.get_or_load(|| {
            candle_backend::load_clip(definition.id, definition.revision, options.device)
        })?;
        let classifier =
            ZeroShotClassifier::new(backend, tuning.labels.clone())?.with_presets(definition.presets());
        Ok(ImageClassifier::ZeroShot(classifier))
    })
}

/// Register every entry of [`BUILTIN_MODELS`]
pub fn register_builtin_models(registry: &mut ModelRegistry, options: &BackendOptions) {
    for definition in BUILTIN_MODELS {
        let constructor = match definition.model_type {
            ModelType::FixedTaxonomy => fixed_taxonomy_constructor(*definition, options.clone()),
            ModelType::ZeroShot => zero_shot_constructor(*definition, options.clone()),
        };
        registry.register(definition.id, definition.metadata(), constructor);
    }
    info!(
        count = BUILTIN_MODELS.len(),
        device = ?options.device,
        "Registered built-in models"
    );
}

impl ModelRegistry {
    /// Registry holding every built-in model
    pub fn with_builtin_models(options: &BackendOptions) -> Self {
        let mut registry = Self::new();
        register_builtin_models(&mut registry, options);
        registry
    }
}
