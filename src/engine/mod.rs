//! Engine module: the seam between the benchmark driver and a generation backend

mod builder;
mod llm;
mod scheduler;

pub use builder::EngineBuilder;
pub use llm::LLMEngine;
pub use scheduler::{ScheduledGroup, Scheduler, SchedulingStep};

use serde::Serialize;

use crate::{
    config::{ModelDType, Quantization, RunConfig},
    error::{BenchError, Result},
    sampling::SamplingParams,
    types::{PromptInput, RequestOutput},
};

/// Everything an engine needs at construction time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineArgs {
    pub model: String,
    pub tokenizer: Option<String>,
    pub revision: String,
    pub quantization: Quantization,
    pub tensor_parallel_size: usize,
    pub gpu_memory_utilization: f32,
    /// Upper bound on sequences in one scheduling step
    pub max_num_seqs: usize,
    /// Upper bound on prompt tokens in one scheduling step
    pub max_num_batched_tokens: usize,
    pub trust_remote_code: bool,
    pub dtype: ModelDType,
}

impl EngineArgs {
    /// Engine arguments for the draft model of a benchmark run
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            model: config.draft_model.clone(),
            tokenizer: config.tokenizer.clone(),
            revision: config.revision.clone(),
            quantization: config.quantization,
            tensor_parallel_size: config.tensor_parallel_size,
            gpu_memory_utilization: config.gpu_memory_utilization,
            max_num_seqs: config.batch_size,
            max_num_batched_tokens: config.batch_size * config.input_len,
            trust_remote_code: config.trust_remote_code,
            dtype: config.dtype,
        }
    }

    pub fn tokenizer_id(&self) -> &str {
        self.tokenizer.as_deref().unwrap_or(&self.model)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(BenchError::config("model", "Model identifier cannot be empty"));
        }
        if self.tensor_parallel_size == 0 {
            return Err(BenchError::config("tensor_parallel_size", "Must be at least 1"));
        }
        if self.max_num_seqs == 0 {
            return Err(BenchError::config("max_num_seqs", "Must be at least 1"));
        }
        if self.max_num_batched_tokens == 0 {
            return Err(BenchError::config("max_num_batched_tokens", "Must be at least 1"));
        }
        if !(self.gpu_memory_utilization > 0.0 && self.gpu_memory_utilization <= 1.0) {
            return Err(BenchError::config(
                "gpu_memory_utilization",
                "Memory utilization must be in (0, 1]",
            ));
        }
        Ok(())
    }

    /// A scheduling step must hold the longest prompt the model accepts
    pub fn check_model_fit(&self, max_position_embeddings: usize) -> Result<()> {
        if self.max_num_batched_tokens < max_position_embeddings {
            return Err(BenchError::config(
                "max_num_batched_tokens",
                format!(
                    "Token budget {} is smaller than the model context length {}; raise --batch-size or --input-len",
                    self.max_num_batched_tokens, max_position_embeddings
                ),
            ));
        }
        Ok(())
    }
}

/// A text generation backend driven by the benchmark
#[async_trait::async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Arguments the engine was constructed with
    fn args(&self) -> &EngineArgs;

    /// Generate completions for every prompt. Outputs come back in the order
    /// the prompts were submitted.
    async fn generate(
        &self,
        prompts: Vec<PromptInput>,
        params: &SamplingParams,
        use_progress: bool,
    ) -> Result<Vec<RequestOutput>>;
}
