//! Classifier capability and the backend seams it scores through

use crate::fixed_taxonomy::FixedTaxonomyClassifier;
use crate::zero_shot::ZeroShotClassifier;
use image::{DynamicImage, RgbImage};
use imageinf_core::{ModelType, Prediction, Result, Sensitivity};

/// A network with a fixed output layer: one logit per taxonomy entry
pub trait LogitsBackend: Send + Sync {
    /// Taxonomy labels in output-index order
    fn labels(&self) -> &[String];

    /// Raw (pre-softmax) logits for `image`, one per label
    fn logits(&self, image: &RgbImage) -> Result<Vec<f32>>;
}

/// A joint image/text embedding network
pub trait EmbeddingBackend: Send + Sync {
    /// Embedding of a single image
    fn embed_image(&self, image: &RgbImage) -> Result<Vec<f32>>;

    /// Embeddings of `texts`, in input order
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// A constructed classifier instance.
///
/// The variant is the dispatch discriminant; it always agrees with the
/// `ModelType` the model was registered under.
pub enum ImageClassifier {
    /// Top-K over a fixed label vocabulary
    FixedTaxonomy(FixedTaxonomyClassifier),
    /// Multi-label thresholding over candidate labels
    ZeroShot(ZeroShotClassifier),
}

impl ImageClassifier {
    /// Family of this classifier
    pub fn model_type(&self) -> ModelType {
        match self {
            Self::FixedTaxonomy(_) => ModelType::FixedTaxonomy,
            Self::ZeroShot(_) => ModelType::ZeroShot,
        }
    }

    /// Score `image`, converting it to 8-bit RGB first.
    ///
    /// `sensitivity` only affects zero-shot classifiers.
    pub fn classify(&self, image: &DynamicImage, sensitivity: Sensitivity) -> Result<Vec<Prediction>> {
        let rgb = image.to_rgb8();
        match self {
            Self::FixedTaxonomy(c) => c.classify(&rgb),
            Self::ZeroShot(c) => c.classify(&rgb, sensitivity),
        }
    }
}

impl std::fmt::Debug for ImageClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ImageClassifier").field(&self.model_type()).finish()
    }
}

/// Round a score to 4 decimal places
pub(crate) fn round4(score: f32) -> f32 {
    (score * 10_000.0).round() / 10_000.0
}

/// Sort descending by score, keeping input order among equal scores
pub(crate) fn sort_descending(predictions: &mut [Prediction]) {
    predictions.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round4() {
        assert_eq!(round4(0.123_456), 0.1235);
        assert_eq!(round4(1.0), 1.0);
        assert_eq!(round4(0.0), 0.0);
    }

    #[test]
    fn test_sort_descending_is_stable() {
        let mut preds = vec![
            Prediction::new("a", 0.2),
            Prediction::new("b", 0.5),
            Prediction::new("c", 0.2),
            Prediction::new("d", 0.9),
        ];
        sort_descending(&mut preds);
        let labels: Vec<_> = preds.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["d", "b", "a", "c"]);
    }
}
