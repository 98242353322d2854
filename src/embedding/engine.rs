// Local sentence embeddings via Candle (BERT-family weights from the HF Hub)
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config};
use hf_hub::{api::sync::Api, Repo, RepoType};
use std::fmt::Display;
use std::sync::Arc;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::embedding::Embedder;
use crate::errors::{RagError, Result};

/// Multilingual sentence-transformer the service was tuned against
pub const DEFAULT_MODEL_ID: &str = "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2";

fn unavailable<E: Display>(context: &'static str) -> impl Fn(E) -> RagError {
    move |e| RagError::IndexUnavailable(format!("{}: {}", context, e))
}

/// Embedding engine running a BERT encoder on the CPU
#[derive(Clone)]
pub struct BertEmbedder {
    model: Arc<BertModel>,
    tokenizer: Arc<Tokenizer>,
    device: Device,
    dimension: usize,
}

impl BertEmbedder {
    /// Load model weights (downloads on first use)
    pub fn load(model_id: &str) -> Result<Self> {
        let device = Device::Cpu;

        let api = Api::new().map_err(unavailable("Failed to create HuggingFace API client"))?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

        let config_path = repo
            .get("config.json")
            .map_err(unavailable("Failed to download model config"))?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .map_err(unavailable("Failed to download tokenizer"))?;
        let weights_path = repo
            .get("model.safetensors")
            .map_err(unavailable("Failed to download model weights"))?;

        let config_contents = std::fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&config_contents)
            .map_err(unavailable("Failed to parse model config"))?;
        let dimension = config.hidden_size;

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(unavailable("Failed to load tokenizer"))?;

        // SAFETY: the safetensors file is owned by the hub cache and not mutated while mapped
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)
                .map_err(unavailable("Failed to load model weights"))?
        };
        let model = BertModel::load(vb, &config).map_err(unavailable("Failed to create BERT model"))?;

        info!(model_id, dimension, "embedding model loaded");

        Ok(Self {
            model: Arc::new(model),
            tokenizer: Arc::new(tokenizer),
            device,
            dimension,
        })
    }

    /// Blocking forward pass for a batch
    fn embed_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(unavailable("Tokenization failed"))?;

        let max_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);
        let batch_size = texts.len();

        // Pad sequences
        let mut flat_ids = vec![0u32; batch_size * max_len];
        let mut flat_mask = vec![0u32; batch_size * max_len];
        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            flat_ids[i * max_len..i * max_len + ids.len()].copy_from_slice(ids);
            flat_mask[i * max_len..i * max_len + mask.len()].copy_from_slice(mask);
        }

        let forward = || -> candle_core::Result<Vec<Vec<f32>>> {
            let token_ids = Tensor::from_vec(flat_ids, (batch_size, max_len), &self.device)?;
            let attention_mask = Tensor::from_vec(flat_mask, (batch_size, max_len), &self.device)?;
            let token_type_ids = token_ids.zeros_like()?;

            let hidden = self
                .model
                .forward(&token_ids, &token_type_ids, Some(&attention_mask))?;
            let pooled = Self::mean_pool(&hidden, &attention_mask)?;
            pooled.to_vec2::<f32>()
        };

        let mut vectors = forward().map_err(unavailable("Embedding forward pass failed"))?;
        for vector in &mut vectors {
            normalize(vector);
        }
        debug!(batch_size, "embedded batch");
        Ok(vectors)
    }

    /// Mean pooling with attention mask
    fn mean_pool(embeddings: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
        let mask_expanded = attention_mask
            .unsqueeze(2)?
            .expand(embeddings.shape())?
            .to_dtype(embeddings.dtype())?;

        let sum_embeddings = (embeddings * &mask_expanded)?.sum(1)?;
        let sum_mask = mask_expanded.sum(1)?.clamp(1e-9, f64::MAX)?;

        sum_embeddings.broadcast_div(&sum_mask)
    }
}

#[async_trait]
impl Embedder for BertEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let engine = self.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || engine.embed_blocking(&texts))
            .await
            .map_err(unavailable("Embedding task aborted"))?
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Scale a vector to unit length (zero vectors are left as-is)
pub(crate) fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}
