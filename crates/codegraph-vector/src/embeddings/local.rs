//! `local-runtime` provider: Candle-based in-process inference.
//!
//! Loads a single JinaBERT model (the same architecture serves both prose
//! and source text reasonably well, so the spec's unified `generateBatch`
//! contract doesn't need two models the way the upstream tool's dual
//! semantic/code split did). Lazily downloaded from the Hugging Face Hub on
//! first use and cached under `localPath` (or the hub's default cache dir)
//! and held behind a `OnceCell` so concurrent callers share one load.

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::jina_bert::{BertModel, Config as JinaConfig};
use hf_hub::{api::sync::Api, Repo, RepoType};
use once_cell::sync::OnceCell;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer};
use tracing::info;

use super::provider::{EmbeddingConfig, EmbeddingProvider, EmbeddingProviderType, ProviderStatus};
use crate::error::{Result, SearchError};

const DEFAULT_MODEL_ID: &str = "jinaai/jina-embeddings-v2-base-en";
const DTYPE: DType = DType::F32;

struct LoadedModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
}

/// `local-runtime` provider implementation.
#[derive(Clone)]
pub struct LocalProvider {
    inner: std::sync::Arc<Inner>,
}

struct Inner {
    model_id: String,
    local_path: Option<PathBuf>,
    device: Device,
    loaded: OnceCell<LoadedModel>,
}

impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let device = select_device();
        Ok(Self {
            inner: std::sync::Arc::new(Inner {
                model_id: DEFAULT_MODEL_ID.to_string(),
                local_path: config.local_path.clone().map(PathBuf::from),
                device,
                loaded: OnceCell::new(),
            }),
        })
    }

    fn ensure_loaded(&self) -> Result<&LoadedModel> {
        self.inner.loaded.get_or_try_init(|| load_model(&self.inner))
    }

    fn encode_sync(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let loaded = self.ensure_loaded()?;
        encode_with_model(loaded, texts)
    }

    fn device_name(&self) -> &'static str {
        match self.inner.device {
            Device::Cpu => "cpu",
            #[cfg(feature = "metal")]
            Device::Metal(_) => "metal",
            #[cfg(feature = "cuda")]
            Device::Cuda(_) => "cuda",
            #[allow(unreachable_patterns)]
            _ => "unknown",
        }
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    async fn generate_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let provider = self.clone();
        tokio::task::spawn_blocking(move || provider.encode_sync(&texts))
            .await
            .map_err(|e| SearchError::ProviderUnavailable(format!("blocking task panicked: {e}")))?
    }

    async fn warmup(&self) -> Result<()> {
        let provider = self.clone();
        let start = Instant::now();
        tokio::task::spawn_blocking(move || provider.ensure_loaded().map(|_| ()))
            .await
            .map_err(|e| SearchError::ProviderUnavailable(format!("warmup task panicked: {e}")))??;
        info!(elapsed_ms = start.elapsed().as_millis() as u64, "local provider warmup complete");
        Ok(())
    }

    async fn check_status(&self) -> Result<ProviderStatus> {
        let available = self.inner.loaded.get().is_some() || model_is_cached(&self.inner.model_id);
        if available {
            Ok(ProviderStatus::healthy(EmbeddingProviderType::LocalRuntime, self.device_name()))
        } else {
            Ok(ProviderStatus::unavailable(
                EmbeddingProviderType::LocalRuntime,
                "model not downloaded yet",
            ))
        }
    }

    fn dimension(&self) -> usize {
        self.inner.loaded.get().map(|m| m.dim).unwrap_or(768)
    }

    fn provider_type(&self) -> EmbeddingProviderType {
        EmbeddingProviderType::LocalRuntime
    }
}

fn select_device() -> Device {
    #[cfg(feature = "metal")]
    if let Ok(device) = Device::new_metal(0) {
        return device;
    }
    #[cfg(feature = "cuda")]
    if let Ok(device) = Device::new_cuda(0) {
        return device;
    }
    Device::Cpu
}

fn model_is_cached(model_id: &str) -> bool {
    let Ok(api) = Api::new() else { return false };
    let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string());
    api.repo(repo).info().is_ok()
}

fn load_model(inner: &Inner) -> Result<LoadedModel> {
    info!(model = %inner.model_id, "loading local embedding model");

    let (config_path, tokenizer_path, weights_path) = match &inner.local_path {
        Some(dir) => (dir.join("config.json"), dir.join("tokenizer.json"), dir.join("model.safetensors")),
        None => {
            let api = Api::new()
                .map_err(|e| SearchError::ProviderUnavailable(format!("hf hub unavailable: {e}")))?;
            let repo = Repo::with_revision(inner.model_id.clone(), RepoType::Model, "main".to_string());
            let api_repo = api.repo(repo);
            let config = api_repo
                .get("config.json")
                .map_err(|e| SearchError::ProviderUnavailable(format!("config.json: {e}")))?;
            let tokenizer = api_repo
                .get("tokenizer.json")
                .map_err(|e| SearchError::ProviderUnavailable(format!("tokenizer.json: {e}")))?;
            let weights = api_repo
                .get("model.safetensors")
                .map_err(|e| SearchError::ProviderUnavailable(format!("model.safetensors: {e}")))?;
            (config, tokenizer, weights)
        }
    };

    let config_str = std::fs::read_to_string(&config_path)?;
    let config: JinaConfig = serde_json::from_str(&config_str)
        .map_err(|e| SearchError::ProviderUnavailable(format!("bad model config: {e}")))?;
    let tokenizer = Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| SearchError::ProviderUnavailable(format!("bad tokenizer: {e}")))?;

    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &inner.device)
            .map_err(|e| SearchError::ProviderUnavailable(format!("failed to map weights: {e}")))?
    };
    let model = BertModel::new(vb, &config)
        .map_err(|e| SearchError::ProviderUnavailable(format!("failed to build model: {e}")))?;

    let dim = config.hidden_size;
    info!(dim, "local embedding model ready");
    Ok(LoadedModel {
        model,
        tokenizer,
        device: inner.device.clone(),
        dim,
    })
}

fn normalize_l2(v: &Tensor) -> Result<Tensor> {
    v.broadcast_div(&v.sqr()?.sum_keepdim(1)?.sqrt()?)
        .map_err(|e| SearchError::ProviderUnavailable(format!("l2 normalize failed: {e}")))
}

fn mean_pool(embeddings: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let mask = attention_mask.to_dtype(DTYPE)?.unsqueeze(2)?;
    let sum_mask = mask.sum(1)?;
    let masked = embeddings.broadcast_mul(&mask)?;
    masked
        .sum(1)?
        .broadcast_div(&sum_mask)
        .map_err(|e| SearchError::ProviderUnavailable(format!("mean pooling failed: {e}")))
}

fn encode_with_model(loaded: &LoadedModel, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let mut tokenizer = loaded.tokenizer.clone();
    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::BatchLongest,
        ..Default::default()
    }));

    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let encodings = tokenizer
        .encode_batch(refs, true)
        .map_err(|e| SearchError::ProviderUnavailable(format!("tokenization failed: {e}")))?;

    let token_ids: Vec<Tensor> = encodings
        .iter()
        .map(|enc| Tensor::new(enc.get_ids(), &loaded.device))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| SearchError::ProviderUnavailable(format!("token tensor failed: {e}")))?;
    let masks: Vec<Tensor> = encodings
        .iter()
        .map(|enc| Tensor::new(enc.get_attention_mask(), &loaded.device))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| SearchError::ProviderUnavailable(format!("mask tensor failed: {e}")))?;

    let token_ids = Tensor::stack(&token_ids, 0)
        .map_err(|e| SearchError::ProviderUnavailable(format!("stack tokens failed: {e}")))?;
    let attention_mask = Tensor::stack(&masks, 0)
        .map_err(|e| SearchError::ProviderUnavailable(format!("stack masks failed: {e}")))?;

    let embeddings = loaded
        .model
        .forward(&token_ids)
        .map_err(|e| SearchError::ProviderUnavailable(format!("forward pass failed: {e}")))?;
    let pooled = mean_pool(&embeddings, &attention_mask)?;
    let normalized = normalize_l2(&pooled)?;

    (0..normalized.dim(0).map_err(|e| SearchError::ProviderUnavailable(e.to_string()))?)
        .map(|i| {
            normalized
                .get(i)
                .and_then(|t| t.to_vec1::<f32>())
                .map_err(|e| SearchError::ProviderUnavailable(format!("tensor extraction failed: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_constructs_without_downloading() {
        let provider = LocalProvider::new(&EmbeddingConfig::local_runtime()).unwrap();
        assert_eq!(provider.provider_type(), EmbeddingProviderType::LocalRuntime);
    }

    #[tokio::test]
    async fn empty_batch_short_circuits_without_loading_model() {
        let provider = LocalProvider::new(&EmbeddingConfig::local_runtime()).unwrap();
        let out = provider.generate_batch(vec![]).await.unwrap();
        assert!(out.is_empty());
    }
}
