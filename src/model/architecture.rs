// Location: src/model/architecture.rs

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::llama::{self, Cache, Llama};

use crate::error::{BenchError, Result};

use super::opt::{Opt, OptCache, OptConfig};

/// Architectures the candle backend can load, as named by `model_type`
pub(crate) const SUPPORTED_MODEL_TYPES: &[&str] = &["llama", "opt"];

/// Parsed architecture config of a checkpoint
#[derive(Debug, Clone)]
pub enum ModelConfig {
    Llama(llama::Config),
    Opt(OptConfig),
}

impl ModelConfig {
    pub fn max_position_embeddings(&self) -> usize {
        match self {
            ModelConfig::Llama(config) => config.max_position_embeddings,
            ModelConfig::Opt(config) => config.max_position_embeddings,
        }
    }

    pub fn model_type(&self) -> &'static str {
        match self {
            ModelConfig::Llama(_) => "llama",
            ModelConfig::Opt(_) => "opt",
        }
    }
}

/// A causal decoder returning next-token logits
pub enum DecoderModel {
    Llama(Llama),
    Opt(Opt),
}

/// KV cache matching a [`DecoderModel`]
#[derive(Debug, Clone)]
pub enum DecoderCache {
    Llama(Cache),
    Opt(OptCache),
}

impl DecoderModel {
    pub fn load(vb: VarBuilder, config: &ModelConfig) -> Result<Self> {
        Ok(match config {
            ModelConfig::Llama(config) => DecoderModel::Llama(Llama::load(vb, config)?),
            ModelConfig::Opt(config) => DecoderModel::Opt(Opt::load(vb, config)?),
        })
    }

    pub fn new_cache(&self, config: &ModelConfig, dtype: DType, device: &Device) -> Result<DecoderCache> {
        match config {
            ModelConfig::Llama(config) => Ok(DecoderCache::Llama(Cache::new(true, dtype, config, device)?)),
            ModelConfig::Opt(config) => Ok(DecoderCache::Opt(OptCache::new(config))),
        }
    }

    /// Logits of the last input position, shape `(batch, vocab)`
    pub fn forward(&self, input: &Tensor, index_pos: usize, cache: &mut DecoderCache) -> Result<Tensor> {
        match (self, cache) {
            (DecoderModel::Llama(model), DecoderCache::Llama(cache)) => {
                Ok(model.forward(input, index_pos, cache)?)
            }
            (DecoderModel::Opt(model), DecoderCache::Opt(cache)) => Ok(model.forward(input, index_pos, cache)?),
            _ => Err(BenchError::model("KV cache does not match the model architecture")),
        }
    }
}
