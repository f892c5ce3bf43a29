//! Model registry: model id -> constructor + metadata

use crate::classifier::ImageClassifier;
use imageinf_core::{Error, ModelMetadata, Result, TuningParams};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds a classifier instance for one request
pub type ModelConstructor = Arc<dyn Fn(&TuningParams) -> Result<ImageClassifier> + Send + Sync>;

/// A registered model
#[derive(Clone)]
pub struct ModelEntry {
    metadata: ModelMetadata,
    constructor: ModelConstructor,
}

impl ModelEntry {
    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// Construct a classifier instance.
    ///
    /// Fails if the constructor produced a different classifier family than
    /// the one the model was registered as.
    pub fn construct(&self, tuning: &TuningParams) -> Result<ImageClassifier> {
        let classifier = (self.constructor)(tuning)?;
        if classifier.model_type() != self.metadata.model_type {
            return Err(Error::internal(format!(
                "model '{}' registered as {} but constructed {}",
                self.metadata.name,
                self.metadata.model_type,
                classifier.model_type()
            )));
        }
        Ok(classifier)
    }
}

/// Outcome of [`ModelRegistry::preload`], ids in registration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadSummary {
    pub loaded: Vec<String>,
    pub failed: Vec<String>,
}

/// Registry populated once at startup and read-only afterwards.
///
/// Share it behind an `Arc`; concurrent reads need no locking.
#[derive(Default, Clone)]
pub struct ModelRegistry {
    order: Vec<String>,
    models: HashMap<String, ModelEntry>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model. Re-registering an id silently replaces the entry
    /// and keeps its original position in [`ModelRegistry::list`].
    pub fn register(
        &mut self,
        model_id: impl Into<String>,
        metadata: ModelMetadata,
        constructor: ModelConstructor,
    ) {
        let model_id = model_id.into();
        let entry = ModelEntry {
            metadata,
            constructor,
        };

        if self.models.insert(model_id.clone(), entry).is_some() {
            debug!(model = %model_id, "Replaced registered model");
        } else {
            debug!(model = %model_id, "Registered model");
            self.order.push(model_id);
        }
    }

    /// Look up a model
    pub fn resolve(&self, model_id: &str) -> Result<&ModelEntry> {
        self.models
            .get(model_id)
            .ok_or_else(|| Error::UnknownModel(model_id.to_string()))
    }

    /// Whether `model_id` is registered
    pub fn contains(&self, model_id: &str) -> bool {
        self.models.contains_key(model_id)
    }

    /// Metadata for every model, in registration order
    pub fn list(&self) -> Vec<ModelMetadata> {
        self.order
            .iter()
            .filter_map(|id| self.models.get(id))
            .map(|entry| entry.metadata.clone())
            .collect()
    }

    /// Get the number of registered models
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Construct every model once so weights are loaded before the first
    /// request. A model that fails to load is logged and skipped.
    ///
    /// Blocks while weights download; call it from a blocking context.
    pub fn preload(&self) -> PreloadSummary {
        let mut summary = PreloadSummary::default();
        for model_id in &self.order {
            let Some(entry) = self.models.get(model_id) else {
                continue;
            };
            match entry.construct(&TuningParams::default()) {
                Ok(_) => {
                    info!(model = %model_id, "Preloaded model");
                    summary.loaded.push(model_id.clone());
                }
                Err(e) => {
                    warn!(model = %model_id, error = %e, "Failed to preload model");
                    summary.failed.push(model_id.clone());
                }
            }
        }
        info!(
            loaded = summary.loaded.len(),
            failed = summary.failed.len(),
            "Model preload finished"
        );
        summary
    }

    /// Log the registry contents
    pub fn log_summary(&self) {
        info!("Model registry initialized with {} models", self.len());
        for meta in self.list() {
            info!(model = %meta.name, model_type = %meta.model_type, "Available model");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::LogitsBackend;
    use crate::fixed_taxonomy::FixedTaxonomyClassifier;
    use image::RgbImage;
    use imageinf_core::ModelType;

    struct OneLabel(Vec<String>);

    impl LogitsBackend for OneLabel {
        fn labels(&self) -> &[String] {
            &self.0
        }

        fn logits(&self, _image: &RgbImage) -> Result<Vec<f32>> {
            Ok(vec![1.0])
        }
    }

    fn meta(name: &str, model_type: ModelType, description: &str) -> ModelMetadata {
        ModelMetadata {
            name: name.to_string(),
            model_type,
            description: description.to_string(),
            link: String::new(),
        }
    }

    fn fixed_constructor() -> ModelConstructor {
        Arc::new(|_tuning: &TuningParams| -> Result<ImageClassifier> {
            let backend = Arc::new(OneLabel(vec!["thing".to_string()]));
            Ok(ImageClassifier::FixedTaxonomy(FixedTaxonomyClassifier::new(backend)))
        })
    }

    #[test]
    fn test_resolve_registered_and_unknown() {
        let mut registry = ModelRegistry::new();
        registry.register("a", meta("a", ModelType::FixedTaxonomy, "A"), fixed_constructor());

        assert!(registry.resolve("a").is_ok());
        let err = registry.resolve("b").err().unwrap();
        assert!(matches!(err, Error::UnknownModel(ref id) if id == "b"));
    }

    #[test]
    fn test_list_in_registration_order_with_overwrite() {
        let mut registry = ModelRegistry::new();
        registry.register("z", meta("z", ModelType::FixedTaxonomy, "first"), fixed_constructor());
        registry.register("a", meta("a", ModelType::FixedTaxonomy, "A"), fixed_constructor());
        registry.register("z", meta("z", ModelType::FixedTaxonomy, "second"), fixed_constructor());

        let list = registry.list();
        assert_eq!(registry.len(), 2);
        assert_eq!(list[0].name, "z");
        assert_eq!(list[0].description, "second");
        assert_eq!(list[1].name, "a");
    }

    #[test]
    fn test_construct_checks_family() {
        let mut registry = ModelRegistry::new();
        registry.register("mislabeled", meta("mislabeled", ModelType::ZeroShot, "x"), fixed_constructor());

        let err = registry
            .resolve("mislabeled")
            .unwrap()
            .construct(&TuningParams::default())
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_preload_continues_past_failures() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let calls = Arc::new(AtomicU32::new(0));
        let counted: ModelConstructor = {
            let calls = Arc::clone(&calls);
            let inner = fixed_constructor();
            Arc::new(move |tuning: &TuningParams| -> Result<ImageClassifier> {
                calls.fetch_add(1, Ordering::SeqCst);
                inner(tuning)
            })
        };
        let broken: ModelConstructor = Arc::new(|_tuning: &TuningParams| -> Result<ImageClassifier> {
            Err(Error::classifier("weights unavailable"))
        });

        let mut registry = ModelRegistry::new();
        registry.register("a", meta("a", ModelType::FixedTaxonomy, "A"), counted.clone());
        registry.register("broken", meta("broken", ModelType::FixedTaxonomy, "B"), broken);
        registry.register("c", meta("c", ModelType::FixedTaxonomy, "C"), counted);

        let summary = registry.preload();
        assert_eq!(summary.loaded, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(summary.failed, vec!["broken".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
