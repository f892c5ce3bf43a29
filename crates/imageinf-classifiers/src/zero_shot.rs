//! Zero-shot multi-label classifier
//!
//! Each candidate label is scored as an independent present/absent decision:
//! the image embedding is compared against a positive prompt and a negative
//! prompt, and the presence probability is the positive share of a two-way
//! softmax over the sharpened similarities. Labels are therefore not competing
//! with each other, so zero, one, or many labels can pass the threshold.

use crate::classifier::{round4, sort_descending, EmbeddingBackend};
use image::RgbImage;
use imageinf_core::{Error, Prediction, Result, Sensitivity};
use std::sync::Arc;
use tracing::debug;

/// Candidate labels used when a request does not supply its own
pub const DEFAULT_LABELS: &[&str] = &[
    "house",
    "building",
    // Vehicles
    "car",
    "truck",
    "bus",
    // People
    "person",
    "group of people",
    // Infrastructure
    "road",
    "bridge",
    "parking lot",
    // Damage
    "debris",
    "rubble",
    "damaged building",
    "flooded area",
    "fallen tree",
    // Context
    "trees",
    "water",
    "sky",
];

/// A (threshold, sharpness) pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preset {
    /// Minimum presence probability for a label to be reported
    pub threshold: f32,
    /// Multiplier applied to cosine similarities before the binary softmax
    pub sharpness: f32,
}

/// Preset table indexed by sensitivity.
///
/// Every table must keep `logit(threshold) / sharpness` non-increasing from
/// `high` to `low`; that is what makes a looser preset return a superset of a
/// stricter one for the same image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensitivityPresets {
    pub high: Preset,
    pub medium: Preset,
    pub low: Preset,
}

impl Default for SensitivityPresets {
    fn default() -> Self {
        Self {
            high: Preset {
                threshold: 0.60,
                sharpness: 25.0,
            },
            medium: Preset {
                threshold: 0.55,
                sharpness: 20.0,
            },
            low: Preset {
                threshold: 0.50,
                sharpness: 15.0,
            },
        }
    }
}

impl SensitivityPresets {
    /// Presets with `medium` at `threshold`, one step stricter and looser
    /// around it. Nests for thresholds in `[0.5, 0.65]`.
    pub fn centered(threshold: f32) -> Self {
        Self {
            high: Preset {
                threshold: threshold + 0.05,
                sharpness: 25.0,
            },
            medium: Preset {
                threshold,
                sharpness: 20.0,
            },
            low: Preset {
                threshold: threshold - 0.05,
                sharpness: 15.0,
            },
        }
    }

    /// Whether a looser preset always accepts what a stricter one does
    pub fn is_nested(&self) -> bool {
        let cutoff = |p: Preset| (p.threshold / (1.0 - p.threshold)).ln() / p.sharpness;
        cutoff(self.high) >= cutoff(self.medium) && cutoff(self.medium) >= cutoff(self.low)
    }

    /// Preset for `sensitivity`
    pub fn get(&self, sensitivity: Sensitivity) -> Preset {
        match sensitivity {
            Sensitivity::High => self.high,
            Sensitivity::Medium => self.medium,
            Sensitivity::Low => self.low,
        }
    }
}

/// Zero-shot classifier over a fixed candidate label set.
///
/// Prompt embeddings are computed once in [`ZeroShotClassifier::new`] and are
/// read-only afterwards, so one instance can serve concurrent callers.
pub struct ZeroShotClassifier {
    backend: Arc<dyn EmbeddingBackend>,
    labels: Vec<String>,
    /// (positive, negative) unit vectors, one pair per label
    prompt_pairs: Vec<(Vec<f32>, Vec<f32>)>,
    presets: SensitivityPresets,
}

impl ZeroShotClassifier {
    /// Embed the prompt pairs for `labels` (or [`DEFAULT_LABELS`])
    pub fn new(backend: Arc<dyn EmbeddingBackend>, labels: Option<Vec<String>>) -> Result<Self> {
        let labels = match labels {
            Some(labels) => validate_labels(labels)?,
            None => DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
        };

        let prompts: Vec<String> = labels
            .iter()
            .flat_map(|label| [positive_prompt(label), negative_prompt(label)])
            .collect();

        let embeddings = backend.embed_texts(&prompts)?;
        if embeddings.len() != prompts.len() {
            return Err(Error::classifier(format!(
                "backend returned {} text embeddings for {} prompts",
                embeddings.len(),
                prompts.len()
            )));
        }

        let mut embeddings = embeddings.into_iter().map(normalize);
        let mut prompt_pairs = Vec::with_capacity(labels.len());
        while let (Some(pos), Some(neg)) = (embeddings.next(), embeddings.next()) {
            prompt_pairs.push((pos, neg));
        }

        debug!(labels = labels.len(), "Precomputed zero-shot prompt embeddings");

        Ok(Self {
            backend,
            labels,
            prompt_pairs,
            presets: SensitivityPresets::default(),
        })
    }

    /// Replace the preset table
    pub fn with_presets(mut self, presets: SensitivityPresets) -> Self {
        self.presets = presets;
        self
    }

    /// Candidate labels in scoring order
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Labels whose presence probability reaches the preset threshold,
    /// descending. An empty result is a valid outcome.
    pub fn classify(&self, image: &RgbImage, sensitivity: Sensitivity) -> Result<Vec<Prediction>> {
        let preset = self.presets.get(sensitivity);
        let image_embedding = normalize(self.backend.embed_image(image)?);

        let mut all = Vec::with_capacity(self.labels.len());
        for (label, (pos, neg)) in self.labels.iter().zip(&self.prompt_pairs) {
            for text in [pos, neg] {
                if text.len() != image_embedding.len() {
                    return Err(Error::classifier(format!(
                        "image embedding has {} dimensions, text embedding for '{}' has {}",
                        image_embedding.len(),
                        label,
                        text.len()
                    )));
                }
            }
            let margin = dot(&image_embedding, pos) - dot(&image_embedding, neg);
            let presence = sigmoid(preset.sharpness * margin);
            all.push(Prediction::new(label.clone(), round4(presence)));
        }

        sort_descending(&mut all);
        let passed: Vec<Prediction> = all
            .iter()
            .filter(|p| p.score >= preset.threshold)
            .cloned()
            .collect();

        if passed.is_empty() {
            let top: Vec<(&str, f32)> = all
                .iter()
                .take(5)
                .map(|p| (p.label.as_str(), p.score))
                .collect();
            debug!(
                threshold = preset.threshold,
                %sensitivity,
                ?top,
                "No zero-shot labels passed threshold"
            );
        }

        Ok(passed)
    }
}

fn validate_labels(labels: Vec<String>) -> Result<Vec<String>> {
    if labels.is_empty() {
        return Err(Error::invalid_request("labels must not be empty"));
    }
    let labels: Vec<String> = labels.into_iter().map(|l| l.trim().to_string()).collect();
    if labels.iter().any(|l| l.is_empty()) {
        return Err(Error::invalid_request("labels must not be blank"));
    }
    Ok(labels)
}

fn positive_prompt(label: &str) -> String {
    format!("a photo of a {}", label)
}

fn negative_prompt(label: &str) -> String {
    format!("no {} present", label)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scale to unit length; the zero vector is returned unchanged
fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = dot(&v, &v).sqrt();
    if norm > f32::EPSILON {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Positive share of a two-way softmax over (x, 0)
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
