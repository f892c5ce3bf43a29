//! Fixed-taxonomy top-K classifier

use crate::classifier::{round4, sort_descending, LogitsBackend};
use image::RgbImage;
use imageinf_core::{Error, Prediction, Result};
use std::sync::Arc;

/// Number of predictions reported per image
pub const DEFAULT_TOP_K: usize = 5;

/// Softmax over the full taxonomy, reporting the highest-scoring labels
pub struct FixedTaxonomyClassifier {
    backend: Arc<dyn LogitsBackend>,
    top_k: usize,
}

impl FixedTaxonomyClassifier {
    pub fn new(backend: Arc<dyn LogitsBackend>) -> Self {
        Self {
            backend,
            top_k: DEFAULT_TOP_K,
        }
    }

    /// Override how many labels are reported
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Returns exactly `min(top_k, taxonomy size)` predictions, descending
    pub fn classify(&self, image: &RgbImage) -> Result<Vec<Prediction>> {
        let labels = self.backend.labels();
        let logits = self.backend.logits(image)?;

        if logits.len() != labels.len() {
            return Err(Error::classifier(format!(
                "backend returned {} logits for a taxonomy of {} labels",
                logits.len(),
                labels.len()
            )));
        }

        let probs = softmax(&logits);
        let mut predictions: Vec<Prediction> = labels
            .iter()
            .zip(probs)
            .map(|(label, score)| Prediction::new(label.clone(), score))
            .collect();

        // Stable, so ties keep taxonomy index order
        sort_descending(&mut predictions);
        predictions.truncate(self.top_k);
        for p in &mut predictions {
            p.score = round4(p.score);
        }

        Ok(predictions)
    }
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticLogits {
        labels: Vec<String>,
        logits: Vec<f32>,
    }

    impl LogitsBackend for StaticLogits {
        fn labels(&self) -> &[String] {
            &self.labels
        }

        fn logits(&self, _image: &RgbImage) -> Result<Vec<f32>> {
            Ok(self.logits.clone())
        }
    }

    fn classifier(labels: &[&str], logits: Vec<f32>) -> FixedTaxonomyClassifier {
        FixedTaxonomyClassifier::new(Arc::new(StaticLogits {
            labels: labels.iter().map(|s| s.to_string()).collect(),
            logits,
        }))
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0, 1000.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_top_five_descending() {
        let c = classifier(
            &["a", "b", "c", "d", "e", "f", "g"],
            vec![0.1, 3.0, 0.5, 2.0, 1.0, -1.0, 4.0],
        );
        let preds = c.classify(&RgbImage::new(2, 2)).unwrap();
        let labels: Vec<_> = preds.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["g", "b", "d", "e", "c"]);
        assert!(preds.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_small_taxonomy_returns_all() {
        let c = classifier(&["cat", "dog"], vec![0.0, 0.0]);
        let preds = c.classify(&RgbImage::new(1, 1)).unwrap();
        assert_eq!(preds.len(), 2);
        // Equal scores keep index order
        assert_eq!(preds[0].label, "cat");
        assert_eq!(preds[0].score, 0.5);
    }

    #[test]
    fn test_logit_count_mismatch() {
        let c = classifier(&["cat", "dog"], vec![1.0]);
        let err = c.classify(&RgbImage::new(1, 1)).unwrap_err();
        assert!(matches!(err, Error::Classifier(_)));
    }

    #[test]
    fn test_scores_are_rounded() {
        let c = classifier(&["a", "b", "c"], vec![0.3, 0.7, 0.11]);
        for p in c.classify(&RgbImage::new(1, 1)).unwrap() {
            assert_eq!(p.score, round4(p.score));
        }
    }
}
