//! Mock network backends for testing
//!
//! Provides configurable implementations of the backend traits so the
//! classifiers, registry, and aggregation can be tested without weights.

#![allow(dead_code)]

use image::RgbImage;
use imageinf_classifiers::{EmbeddingBackend, LogitsBackend};
use imageinf_core::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// A fixed-taxonomy backend returning preset logits
pub struct MockLogits {
    labels: Vec<String>,
    logits: Vec<f32>,
    call_count: AtomicU32,
}

impl MockLogits {
    /// Create a mock over `labels`, all logits zero
    pub fn new(labels: &[&str]) -> Self {
        Self {
            labels: labels.iter().map(|s| s.to_string()).collect(),
            logits: vec![0.0; labels.len()],
            call_count: AtomicU32::new(0),
        }
    }

    /// Set the logits this backend will return
    pub fn with_logits(mut self, logits: &[f32]) -> Self {
        self.logits = logits.to_vec();
        self
    }

    /// Get the number of times logits was called
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }
}

impl LogitsBackend for MockLogits {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn logits(&self, _image: &RgbImage) -> Result<Vec<f32>> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        Ok(self.logits.clone())
    }
}

/// A zero-shot backend with a controllable similarity margin per label.
///
/// The image always embeds to `[1, 0, 0]`. A label's positive prompt embeds so
/// that its cosine with the image equals the label's margin, and every negative
/// prompt embeds orthogonally, so `cos(pos) - cos(neg)` is exactly the margin.
pub struct MockEmbeddings {
    margins: HashMap<String, f32>,
    image_dims: usize,
    text_calls: AtomicU32,
    image_calls: AtomicU32,
}

impl MockEmbeddings {
    pub fn new() -> Self {
        Self {
            margins: HashMap::new(),
            image_dims: 3,
            text_calls: AtomicU32::new(0),
            image_calls: AtomicU32::new(0),
        }
    }

    /// Set the similarity margin for `label` (default 0)
    pub fn with_margin(mut self, label: &str, margin: f32) -> Self {
        self.margins.insert(label.to_string(), margin);
        self
    }

    /// Make the image embedding a different size from the text embeddings
    pub fn with_image_dims(mut self, dims: usize) -> Self {
        self.image_dims = dims;
        self
    }

    pub fn text_calls(&self) -> u32 {
        self.text_calls.load(Ordering::Relaxed)
    }

    pub fn image_calls(&self) -> u32 {
        self.image_calls.load(Ordering::Relaxed)
    }

    fn embed_prompt(&self, prompt: &str) -> Result<Vec<f32>> {
        if let Some(label) = prompt.strip_prefix("a photo of a ") {
            let m = self.margins.get(label).copied().unwrap_or(0.0);
            return Ok(vec![m, (1.0 - m * m).max(0.0).sqrt(), 0.0]);
        }
        if prompt.starts_with("no ") && prompt.ends_with(" present") {
            return Ok(vec![0.0, 0.0, 1.0]);
        }
        Err(Error::classifier(format!("unexpected prompt '{}'", prompt)))
    }
}

impl EmbeddingBackend for MockEmbeddings {
    fn embed_image(&self, _image: &RgbImage) -> Result<Vec<f32>> {
        self.image_calls.fetch_add(1, Ordering::Relaxed);
        let mut v = vec![0.0; self.image_dims];
        v[0] = 1.0;
        Ok(v)
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.text_calls.fetch_add(1, Ordering::Relaxed);
        texts.iter().map(|t| self.embed_prompt(t)).collect()
    }
}

/// A backend that always fails
pub struct FailingEmbeddings {
    error_message: String,
}

impl FailingEmbeddings {
    pub fn new() -> Self {
        Self {
            error_message: "Simulated backend failure".to_string(),
        }
    }
}

impl EmbeddingBackend for FailingEmbeddings {
    fn embed_image(&self, _image: &RgbImage) -> Result<Vec<f32>> {
        Err(Error::classifier(&self.error_message))
    }

    fn embed_texts(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::classifier(&self.error_message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_margin_geometry() {
        let mock = MockEmbeddings::new().with_margin("car", 0.2);
        let image = mock.embed_image(&RgbImage::new(1, 1)).unwrap();
        let texts = mock
            .embed_texts(&["a photo of a car".to_string(), "no car present".to_string()])
            .unwrap();
        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        let margin = dot(&image, &texts[0]) - dot(&image, &texts[1]);
        assert!((margin - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_mock_logits_counts_calls() {
        let mock = MockLogits::new(&["a", "b"]).with_logits(&[1.0, 2.0]);
        mock.logits(&RgbImage::new(1, 1)).unwrap();
        assert_eq!(mock.call_count(), 1);
    }
}
