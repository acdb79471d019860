use tracing::info;

use crate::{
    config::Quantization,
    error::{BenchError, Result},
    model::{self, ModelLoader, PromptTokenizer, MAX_CONCURRENT_LOADS},
};

use super::{llm::LLMEngine, EngineArgs};

/// Builder for constructing an LLMEngine instance
pub struct EngineBuilder {
    args: Option<EngineArgs>,
}

impl EngineBuilder {
    /// Create a new builder instance
    pub fn new() -> Self {
        Self { args: None }
    }

    /// Set the engine arguments
    pub fn with_args(mut self, args: EngineArgs) -> Self {
        self.args = Some(args);
        self
    }

    /// Resolve the checkpoint, load one replica per device and assemble the engine.
    /// Any failure here is final; nothing is retried.
    pub async fn build(self) -> Result<LLMEngine> {
        let args = self
            .args
            .ok_or_else(|| BenchError::config("model", "Engine arguments must be set before build"))?;
        args.validate()?;

        if args.quantization == Quantization::Awq {
            return Err(BenchError::Unsupported(
                "awq quantization is not available in the candle backend".to_string(),
            ));
        }

        let (model_id, tokenizer_id, revision) = (
            args.model.clone(),
            args.tokenizer_id().to_string(),
            args.revision.clone(),
        );
        let files = tokio::task::spawn_blocking(move || {
            model::resolve_model_files(&model_id, &tokenizer_id, &revision)
        })
        .await??;

        let checkpoint = model::inspect_checkpoint(&files.config, args.trust_remote_code)?;
        args.check_model_fit(checkpoint.config.max_position_embeddings())?;
        let tokenizer = PromptTokenizer::load(&files.tokenizer)?;

        let devices = model::select_devices(args.tensor_parallel_size)?;
        let dtype = model::resolve_dtype(args.dtype, checkpoint.torch_dtype.as_deref(), &devices[0]);

        let loader = ModelLoader::new(MAX_CONCURRENT_LOADS);
        let runtimes = loader
            .load_replicas(&files.weights, &checkpoint.config, dtype, devices)
            .await?;

        info!(
            model = %args.model,
            tokenizer = %args.tokenizer_id(),
            model_type = checkpoint.config.model_type(),
            replicas = runtimes.len(),
            max_num_seqs = args.max_num_seqs,
            max_num_batched_tokens = args.max_num_batched_tokens,
            gpu_memory_utilization = args.gpu_memory_utilization,
            "engine ready"
        );

        LLMEngine::from_parts(args, tokenizer, runtimes)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
