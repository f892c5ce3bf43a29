//! Core types for imageinf

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A remotely stored image, addressed by storage system and path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileReference {
    /// Storage system identifier
    #[serde(rename = "systemId")]
    pub system_id: String,

    /// Path of the file within the system
    pub path: String,
}

impl FileReference {
    /// Create a new file reference
    pub fn new(system_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
            path: path.into(),
        }
    }
}

/// A single (label, score) pair produced by a classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Classification label
    pub label: String,

    /// Confidence score (0.0-1.0)
    pub score: f32,
}

impl Prediction {
    /// Create a new prediction
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// EXIF-derived metadata for an image. Absent fields are `null`, never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub date_taken: Option<NaiveDateTime>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
}

impl ImageMetadata {
    /// True when no field could be extracted
    pub fn is_empty(&self) -> bool {
        self.date_taken.is_none()
            && self.latitude.is_none()
            && self.longitude.is_none()
            && self.altitude.is_none()
            && self.camera_make.is_none()
            && self.camera_model.is_none()
    }
}

/// Predictions for one requested file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    #[serde(rename = "systemId")]
    pub system_id: String,

    pub path: String,

    /// Ranked by score, descending
    pub predictions: Vec<Prediction>,

    #[serde(default)]
    pub metadata: Option<ImageMetadata>,
}

impl InferenceResult {
    /// Build a result for `file`
    pub fn new(
        file: &FileReference,
        predictions: Vec<Prediction>,
        metadata: Option<ImageMetadata>,
    ) -> Self {
        Self {
            system_id: file.system_id.clone(),
            path: file.path.clone(),
            predictions,
            metadata,
        }
    }
}

/// Response for a whole request.
///
/// `results` and `aggregated_results` are parallel arrays in request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    /// Model id that produced the predictions
    pub model: String,

    /// Detailed per-file predictions
    pub results: Vec<InferenceResult>,

    /// Category-collapsed per-file predictions
    pub aggregated_results: Vec<InferenceResult>,
}

/// Classifier family, the dispatch discriminant for a registered model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Softmax over a fixed label vocabulary, top-K reported
    FixedTaxonomy,
    /// Open-vocabulary multi-label scoring against candidate labels
    ZeroShot,
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixedTaxonomy => f.write_str("fixed_taxonomy"),
            Self::ZeroShot => f.write_str("zero_shot"),
        }
    }
}

/// Descriptive metadata for a registered model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub name: String,

    #[serde(rename = "type")]
    pub model_type: ModelType,

    pub description: String,

    pub link: String,
}

/// Zero-shot sensitivity preset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// Strictest threshold, fewest labels
    High,
    #[default]
    Medium,
    /// Loosest threshold, most labels
    Low,
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => f.write_str("high"),
            Self::Medium => f.write_str("medium"),
            Self::Low => f.write_str("low"),
        }
    }
}

/// Model-specific tuning supplied with a request.
///
/// Fixed-taxonomy models ignore both fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TuningParams {
    /// Replaces the zero-shot candidate label set for this request
    #[serde(default)]
    pub labels: Option<Vec<String>>,

    /// Zero-shot sensitivity preset, `medium` when absent
    #[serde(default)]
    pub sensitivity: Option<Sensitivity>,
}

impl TuningParams {
    /// Sensitivity with the default applied
    pub fn sensitivity(&self) -> Sensitivity {
        self.sensitivity.unwrap_or_default()
    }
}

/// An already-authenticated caller and the material needed to fetch files for them
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,

    /// Bearer token forwarded to the remote files service
    pub token: String,

    /// Base URL of the tenant, e.g. `https://designsafe.tapis.io`
    pub tenant_host: String,
}

impl Principal {
    /// Create a new principal
    pub fn new(
        username: impl Into<String>,
        token: impl Into<String>,
        tenant_host: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
            tenant_host: tenant_host.into(),
        }
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .field("tenant_host", &self.tenant_host)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_reference_wire_names() {
        let file: FileReference =
            serde_json::from_str(r#"{"systemId": "project-123", "path": "/img/a.jpg"}"#).unwrap();
        assert_eq!(file, FileReference::new("project-123", "/img/a.jpg"));

        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["systemId"], "project-123");
    }

    #[test]
    fn test_missing_metadata_serializes_as_null() {
        let file = FileReference::new("sys", "a.jpg");
        let result = InferenceResult::new(&file, vec![Prediction::new("tabby", 0.9)], None);
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["metadata"].is_null());
    }

    #[test]
    fn test_model_metadata_type_field() {
        let meta = ModelMetadata {
            name: "openai/clip-vit-large-patch14".to_string(),
            model_type: ModelType::ZeroShot,
            description: "CLIP".to_string(),
            link: "https://huggingface.co/openai/clip-vit-large-patch14".to_string(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["type"], "zero_shot");
    }

    #[test]
    fn test_sensitivity_defaults_to_medium() {
        assert_eq!(TuningParams::default().sensitivity(), Sensitivity::Medium);
        let s: Sensitivity = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(s, Sensitivity::Low);
    }

    #[test]
    fn test_principal_debug_redacts_token() {
        let principal = Principal::new("jdoe", "secret-jwt", "https://designsafe.tapis.io");
        let debug = format!("{:?}", principal);
        assert!(debug.contains("jdoe"));
        assert!(!debug.contains("secret-jwt"));
    }
}
