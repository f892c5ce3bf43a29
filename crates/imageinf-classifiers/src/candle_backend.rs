//! Candle-based network backends for the built-in models
//!
//! Weights are fetched from the Hugging Face Hub (cached by hf-hub) and
//! memory-mapped. Requires the `ml-models` feature; without it the loaders
//! return a classifier error.

use crate::catalog::DeviceSpec;
use crate::classifier::{EmbeddingBackend, LogitsBackend};
use imageinf_core::Result;
use std::sync::Arc;

#[cfg(feature = "ml-models")]
use imageinf_core::Error;

#[cfg(feature = "ml-models")]
use candle_core::{DType, Device, Module, Tensor};
#[cfg(feature = "ml-models")]
use candle_nn::VarBuilder;
#[cfg(feature = "ml-models")]
use candle_transformers::models::{clip, vit};
#[cfg(feature = "ml-models")]
use image::{imageops::FilterType, RgbImage};
#[cfg(feature = "ml-models")]
use std::path::PathBuf;
#[cfg(feature = "ml-models")]
use tokenizers::Tokenizer;

#[cfg(feature = "ml-models")]
const VIT_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
#[cfg(feature = "ml-models")]
const VIT_STD: [f32; 3] = [0.5, 0.5, 0.5];
#[cfg(feature = "ml-models")]
const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
#[cfg(feature = "ml-models")]
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Load a ViT image-classification network
pub fn load_vit(model_id: &str, revision: &str, device: DeviceSpec) -> Result<Arc<dyn LogitsBackend>> {
    #[cfg(feature = "ml-models")]
    {
        let backend = VitBackend::load(model_id, revision, device)?;
        Ok(Arc::new(backend))
    }

    #[cfg(not(feature = "ml-models"))]
    {
        let _ = (revision, device);
        Err(imageinf_core::Error::classifier(format!(
            "Loading '{}' requires the 'ml-models' feature",
            model_id
        )))
    }
}

/// Load a Swin Transformer classification network.
///
/// candle-transformers has no Swin implementation, so this always fails with
/// a classifier error naming the model.
pub fn load_swin(model_id: &str, revision: &str, device: DeviceSpec) -> Result<Arc<dyn LogitsBackend>> {
    let _ = (revision, device);
    Err(imageinf_core::Error::classifier(format!(
        "'{}' uses a Swin Transformer backbone, which the Candle backend does not implement",
        model_id
    )))
}

/// Load a CLIP image/text embedding network
pub fn load_clip(model_id: &str, revision: &str, device: DeviceSpec) -> Result<Arc<dyn EmbeddingBackend>> {
    #[cfg(feature = "ml-models")]
    {
        let backend = ClipBackend::load(model_id, revision, device)?;
        Ok(Arc::new(backend))
    }

    #[cfg(not(feature = "ml-models"))]
    {
        let _ = (revision, device);
        Err(imageinf_core::Error::classifier(format!(
            "Loading '{}' requires the 'ml-models' feature",
            model_id
        )))
    }
}

#[cfg(feature = "ml-models")]
fn ml_error(context: &str, err: impl std::fmt::Display) -> Error {
    Error::classifier(format!("{}: {}", context, err))
}

/// Download one file of a model repository
#[cfg(feature = "ml-models")]
fn fetch(model_id: &str, revision: &str, filename: &str) -> Result<PathBuf> {
    use hf_hub::{api::sync::Api, Repo, RepoType};

    let api = Api::new().map_err(|e| ml_error("Failed to initialize HuggingFace API", e))?;
    let repo = api.repo(Repo::with_revision(
        model_id.to_string(),
        RepoType::Model,
        revision.to_string(),
    ));

    tracing::debug!(model = model_id, file = filename, "Fetching model file");
    repo.get(filename)
        .map_err(|e| ml_error(&format!("Failed to download {} for {}", filename, model_id), e))
}

#[cfg(feature = "ml-models")]
fn create_device(spec: DeviceSpec) -> Result<Device> {
    match spec {
        DeviceSpec::Cpu => Ok(Device::Cpu),
        DeviceSpec::Cuda => Device::new_cuda(0).map_err(|e| ml_error("Failed to create CUDA device", e)),
        DeviceSpec::Metal => Device::new_metal(0).map_err(|e| ml_error("Failed to create Metal device", e)),
        DeviceSpec::Auto => {
            if candle_core::utils::cuda_is_available() {
                create_device(DeviceSpec::Cuda)
            } else if candle_core::utils::metal_is_available() {
                create_device(DeviceSpec::Metal)
            } else {
                Ok(Device::Cpu)
            }
        }
    }
}

#[cfg(feature = "ml-models")]
fn load_weights(path: PathBuf, device: &Device) -> Result<VarBuilder<'static>> {
    // Safety: the file is an hf-hub cache entry that is not modified while mapped
    unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device) }
        .map_err(|e| ml_error("Failed to load weights", e))
}

/// Safetensors weights when the repository has them, else the PyTorch checkpoint
#[cfg(feature = "ml-models")]
fn load_repo_weights(model_id: &str, revision: &str, device: &Device) -> Result<VarBuilder<'static>> {
    match fetch(model_id, revision, "model.safetensors") {
        Ok(path) => load_weights(path, device),
        Err(e) => {
            tracing::debug!(model = model_id, error = %e, "No safetensors weights, trying pytorch_model.bin");
            let path = fetch(model_id, revision, "pytorch_model.bin")?;
            VarBuilder::from_pth(path, DType::F32, device).map_err(|e| ml_error("Failed to load weights", e))
        }
    }
}

/// Resize to `size`x`size`, scale to [0, 1], normalize per channel, add a batch dim
#[cfg(feature = "ml-models")]
fn image_tensor(
    image: &RgbImage,
    size: usize,
    mean: [f32; 3],
    std: [f32; 3],
    device: &Device,
) -> candle_core::Result<Tensor> {
    let resized = image::imageops::resize(image, size as u32, size as u32, FilterType::Triangle);
    let data = resized.into_raw();
    let pixels = Tensor::from_vec(data, (size, size, 3), &Device::Cpu)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(1.0 / 255.0, 0.0)?;
    let mean = Tensor::new(&mean, &Device::Cpu)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&std, &Device::Cpu)?.reshape((3, 1, 1))?;
    pixels
        .broadcast_sub(&mean)?
        .broadcast_div(&std)?
        .unsqueeze(0)?
        .to_device(device)
}

/// ViT with an ImageNet classification head
#[cfg(feature = "ml-models")]
struct VitBackend {
    model: vit::Model,
    labels: Vec<String>,
    image_size: usize,
    device: Device,
}

#[cfg(feature = "ml-models")]
impl VitBackend {
    fn load(model_id: &str, revision: &str, device: DeviceSpec) -> Result<Self> {
        tracing::info!(model = model_id, "Loading ViT backend");
        let device = create_device(device)?;

        let config_path = fetch(model_id, revision, "config.json")?;
        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(config_path)?)?;
        let config: vit::Config = serde_json::from_value(raw.clone())?;
        let labels = id2label(&raw)?;

        let vb = load_repo_weights(model_id, revision, &device)?;
        let model = vit::Model::new(&config, labels.len(), vb)
            .map_err(|e| ml_error("Failed to build ViT model", e))?;

        tracing::info!(model = model_id, labels = labels.len(), "ViT backend ready");
        Ok(Self {
            model,
            labels,
            image_size: config.image_size,
            device,
        })
    }
}

/// Labels from a transformers `config.json` `id2label` map, in index order
#[cfg(feature = "ml-models")]
fn id2label(config: &serde_json::Value) -> Result<Vec<String>> {
    let map = config
        .get("id2label")
        .and_then(|v| v.as_object())
        .ok_or_else(|| Error::classifier("config.json has no id2label map"))?;

    let mut indexed = Vec::with_capacity(map.len());
    for (key, value) in map {
        let idx: usize = key
            .parse()
            .map_err(|_| Error::classifier(format!("non-numeric id2label key '{}'", key)))?;
        let label = value.as_str().unwrap_or_default().to_string();
        indexed.push((idx, label));
    }
    indexed.sort_by_key(|(idx, _)| *idx);
    Ok(indexed.into_iter().map(|(_, label)| label).collect())
}

#[cfg(feature = "ml-models")]
impl LogitsBackend for VitBackend {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn logits(&self, image: &RgbImage) -> Result<Vec<f32>> {
        let run = || -> candle_core::Result<Vec<f32>> {
            let pixels = image_tensor(image, self.image_size, VIT_MEAN, VIT_STD, &self.device)?;
            self.model.forward(&pixels)?.squeeze(0)?.to_vec1::<f32>()
        };
        run().map_err(|e| ml_error("ViT forward pass failed", e))
    }
}

/// CLIP image and text towers
#[cfg(feature = "ml-models")]
struct ClipBackend {
    model: clip::ClipModel,
    tokenizer: Tokenizer,
    pad_id: u32,
    image_size: usize,
    device: Device,
}

#[cfg(feature = "ml-models")]
impl ClipBackend {
    fn load(model_id: &str, revision: &str, device: DeviceSpec) -> Result<Self> {
        tracing::info!(model = model_id, "Loading CLIP backend");
        let device = create_device(device)?;
        let config_path = fetch(model_id, revision, "config.json")?;
        let config = clip_config(&std::fs::read_to_string(config_path)?)?;

        let tokenizer = Tokenizer::from_file(fetch(model_id, revision, "tokenizer.json")?)
            .map_err(|e| ml_error("Failed to load tokenizer", e))?;
        let pad_id = *tokenizer
            .get_vocab(true)
            .get("<|endoftext|>")
            .ok_or_else(|| Error::classifier("tokenizer has no <|endoftext|> token"))?;

        let vb = load_repo_weights(model_id, revision, &device)?;
        let model = clip::ClipModel::new(vb, &config).map_err(|e| ml_error("Failed to build CLIP model", e))?;

        tracing::info!(model = model_id, "CLIP backend ready");
        Ok(Self {
            model,
            tokenizer,
            pad_id,
            image_size: config.image_size,
            device,
        })
    }
}

/// The parts of a transformers `CLIPConfig` the Candle model needs.
/// Missing keys take the transformers defaults.
#[cfg(feature = "ml-models")]
#[derive(Debug, serde::Deserialize)]
struct HfClipConfig {
    projection_dim: usize,
    #[serde(default = "default_logit_scale")]
    logit_scale_init_value: f32,
    text_config: HfClipTextConfig,
    vision_config: HfClipVisionConfig,
}

#[cfg(feature = "ml-models")]
#[derive(Debug, serde::Deserialize)]
struct HfClipTextConfig {
    #[serde(default = "default_text_vocab")]
    vocab_size: usize,
    #[serde(default = "default_text_hidden")]
    hidden_size: usize,
    #[serde(default = "default_text_intermediate")]
    intermediate_size: usize,
    #[serde(default = "default_text_positions")]
    max_position_embeddings: usize,
    #[serde(default = "default_layers")]
    num_hidden_layers: usize,
    #[serde(default = "default_text_heads")]
    num_attention_heads: usize,
    #[serde(default = "default_hidden_act")]
    hidden_act: String,
}

#[cfg(feature = "ml-models")]
#[derive(Debug, serde::Deserialize)]
struct HfClipVisionConfig {
    #[serde(default = "default_vision_hidden")]
    hidden_size: usize,
    #[serde(default = "default_vision_intermediate")]
    intermediate_size: usize,
    #[serde(default = "default_layers")]
    num_hidden_layers: usize,
    #[serde(default = "default_vision_heads")]
    num_attention_heads: usize,
    #[serde(default = "default_channels")]
    num_channels: usize,
    #[serde(default = "default_image_size")]
    image_size: usize,
    #[serde(default = "default_patch_size")]
    patch_size: usize,
    #[serde(default = "default_hidden_act")]
    hidden_act: String,
}

#[cfg(feature = "ml-models")]
fn default_logit_scale() -> f32 {
    2.6592
}
#[cfg(feature = "ml-models")]
fn default_text_vocab() -> usize {
    49408
}
#[cfg(feature = "ml-models")]
fn default_text_hidden() -> usize {
    512
}
#[cfg(feature = "ml-models")]
fn default_text_intermediate() -> usize {
    2048
}
#[cfg(feature = "ml-models")]
fn default_text_positions() -> usize {
    77
}
#[cfg(feature = "ml-models")]
fn default_layers() -> usize {
    12
}
#[cfg(feature = "ml-models")]
fn default_text_heads() -> usize {
    8
}
#[cfg(feature = "ml-models")]
fn default_vision_hidden() -> usize {
    768
}
#[cfg(feature = "ml-models")]
fn default_vision_intermediate() -> usize {
    3072
}
#[cfg(feature = "ml-models")]
fn default_vision_heads() -> usize {
    12
}
#[cfg(feature = "ml-models")]
fn default_channels() -> usize {
    3
}
#[cfg(feature = "ml-models")]
fn default_image_size() -> usize {
    224
}
#[cfg(feature = "ml-models")]
fn default_patch_size() -> usize {
    32
}
#[cfg(feature = "ml-models")]
fn default_hidden_act() -> String {
    "quick_gelu".to_string()
}

#[cfg(feature = "ml-models")]
fn clip_activation(name: &str) -> Result<clip::text_model::Activation> {
    match name {
        "quick_gelu" => Ok(clip::text_model::Activation::QuickGelu),
        other => Err(Error::classifier(format!(
            "CLIP activation '{}' is not supported by the Candle backend",
            other
        ))),
    }
}

/// Build the Candle CLIP config from a transformers `config.json`
#[cfg(feature = "ml-models")]
fn clip_config(raw: &str) -> Result<clip::ClipConfig> {
    let hf: HfClipConfig = serde_json::from_str(raw)?;
    let text = hf.text_config;
    let vision = hf.vision_config;

    Ok(clip::ClipConfig {
        text_config: clip::text_model::ClipTextConfig {
            vocab_size: text.vocab_size,
            embed_dim: text.hidden_size,
            activation: clip_activation(&text.hidden_act)?,
            intermediate_size: text.intermediate_size,
            max_position_embeddings: text.max_position_embeddings,
            pad_with: None,
            num_hidden_layers: text.num_hidden_layers,
            num_attention_heads: text.num_attention_heads,
            projection_dim: hf.projection_dim,
        },
        vision_config: clip::vision_model::ClipVisionConfig {
            embed_dim: vision.hidden_size,
            activation: clip_activation(&vision.hidden_act)?,
            intermediate_size: vision.intermediate_size,
            num_hidden_layers: vision.num_hidden_layers,
            num_attention_heads: vision.num_attention_heads,
            projection_dim: hf.projection_dim,
            num_channels: vision.num_channels,
            image_size: vision.image_size,
            patch_size: vision.patch_size,
        },
        logit_scale_init_value: hf.logit_scale_init_value,
        image_size: vision.image_size,
    })
}

#[cfg(feature = "ml-models")]
impl EmbeddingBackend for ClipBackend {
    fn embed_image(&self, image: &RgbImage) -> Result<Vec<f32>> {
        let run = || -> candle_core::Result<Vec<f32>> {
            let pixels = image_tensor(image, self.image_size, CLIP_MEAN, CLIP_STD, &self.device)?;
            self.model.get_image_features(&pixels)?.squeeze(0)?.to_vec1::<f32>()
        };
        run().map_err(|e| ml_error("CLIP image embedding failed", e))
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut tokens = Vec::with_capacity(texts.len());
        for text in texts {
            let encoding = self
                .tokenizer
                .encode(text.as_str(), true)
                .map_err(|e| ml_error("Tokenization failed", e))?;
            tokens.push(encoding.get_ids().to_vec());
        }

        let max_len = tokens.iter().map(Vec::len).max().unwrap_or(0);
        for ids in &mut tokens {
            ids.resize(max_len, self.pad_id);
        }

        let run = || -> candle_core::Result<Vec<Vec<f32>>> {
            let input_ids = Tensor::new(tokens, &self.device)?;
            self.model.get_text_features(&input_ids)?.to_vec2::<f32>()
        };
        run().map_err(|e| ml_error("CLIP text embedding failed", e))
    }
}
