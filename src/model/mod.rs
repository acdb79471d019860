//! Model module: checkpoint resolution, replica loading and per-sequence generation

mod architecture;
mod loader;
mod opt;
mod runtime;
mod tokenizer;

pub use architecture::{DecoderCache, DecoderModel, ModelConfig};
pub use loader::{
    inspect_checkpoint, resolve_dtype, resolve_model_files, select_devices, Checkpoint, ModelFiles,
    ModelLoader, TokenizerFiles, WeightFiles,
};
pub use opt::{Opt, OptCache, OptConfig};
pub use runtime::{GeneratedSequence, ModelRuntime};
pub use tokenizer::PromptTokenizer;

/// Replicas loaded at the same time
pub(crate) const MAX_CONCURRENT_LOADS: usize = 2;

#[cfg(test)]
pub(crate) mod fixtures {
    //! Tiny llama and opt checkpoint pieces for tests; nothing here touches the network.

    use std::path::Path;

    use candle_core::{DType, Device};
    use candle_nn::VarBuilder;
    use candle_transformers::models::llama::{Llama, LlamaConfig};
    use tempfile::TempDir;

    use super::{DecoderModel, ModelConfig, ModelRuntime, Opt, OptConfig, PromptTokenizer};

    pub const VOCAB_SIZE: usize = 32;
    pub const MAX_POSITIONS: usize = 64;

    pub fn llama_config_json() -> serde_json::Value {
        serde_json::json!({
            "architectures": ["LlamaForCausalLM"],
            "model_type": "llama",
            "hidden_size": 16,
            "intermediate_size": 32,
            "vocab_size": VOCAB_SIZE,
            "num_hidden_layers": 1,
            "num_attention_heads": 2,
            "num_key_value_heads": 2,
            "rms_norm_eps": 1e-5,
            "rope_theta": 10000.0,
            "max_position_embeddings": MAX_POSITIONS,
            "bos_token_id": 1,
            "eos_token_id": 2,
            "tie_word_embeddings": false,
            "torch_dtype": "bfloat16"
        })
    }

    /// WordLevel tokenizer over `[UNK]`, `t1` .. `t31`
    pub fn tokenizer_json() -> serde_json::Value {
        let mut vocab = serde_json::Map::new();
        vocab.insert("[UNK]".to_string(), serde_json::json!(0));
        for id in 1..VOCAB_SIZE {
            vocab.insert(format!("t{}", id), serde_json::json!(id));
        }
        serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": null,
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": "[UNK]"
            }
        })
    }

    /// Directory with config.json, tokenizer.json and a placeholder weights file
    pub fn model_dir(config: &serde_json::Value) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), config.to_string()).unwrap();
        std::fs::write(dir.path().join("tokenizer.json"), tokenizer_json().to_string()).unwrap();
        std::fs::write(dir.path().join("model.safetensors"), b"").unwrap();
        dir
    }

    pub fn tokenizer() -> (TempDir, PromptTokenizer) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer.json");
        std::fs::write(&path, tokenizer_json().to_string()).unwrap();
        let tokenizer = PromptTokenizer::from_file(&path).unwrap();
        (dir, tokenizer)
    }

    /// CPU runtime with all-zero weights, so every logit is equal
    pub fn runtime() -> ModelRuntime {
        let device = Device::Cpu;
        let config: LlamaConfig = serde_json::from_value(llama_config_json()).unwrap();
        let config = config.into_config(false);
        let vb = VarBuilder::zeros(DType::F32, &device);
        let model = Llama::load(vb, &config).unwrap();
        ModelRuntime::new(device, DecoderModel::Llama(model), ModelConfig::Llama(config), DType::F32)
    }

    pub fn opt_config_json() -> serde_json::Value {
        serde_json::json!({
            "architectures": ["OPTForCausalLM"],
            "model_type": "opt",
            "activation_function": "relu",
            "do_layer_norm_before": true,
            "hidden_size": 16,
            "ffn_dim": 32,
            "vocab_size": VOCAB_SIZE,
            "num_hidden_layers": 2,
            "num_attention_heads": 2,
            "max_position_embeddings": MAX_POSITIONS,
            "word_embed_proj_dim": 16,
            "bos_token_id": 2,
            "eos_token_id": 2,
            "pad_token_id": 1,
            "torch_dtype": "float16"
        })
    }

    /// CPU opt runtime with all-zero weights
    pub fn opt_runtime() -> ModelRuntime {
        let device = Device::Cpu;
        let config: OptConfig = serde_json::from_value(opt_config_json()).unwrap();
        let vb = VarBuilder::zeros(DType::F32, &device);
        let model = Opt::load(vb, &config).unwrap();
        ModelRuntime::new(device, DecoderModel::Opt(model), ModelConfig::Opt(config), DType::F32)
    }

    /// Byte-level BPE files: `hi` and `Ġhi` are single tokens, `</s>` is id 2
    pub fn write_bpe_files(dir: &Path) {
        let vocab = serde_json::json!({
            "<s>": 0, "<pad>": 1, "</s>": 2, "h": 3, "i": 4, "\u{120}": 5, "hi": 6, "\u{120}hi": 7
        });
        std::fs::write(dir.join("vocab.json"), vocab.to_string()).unwrap();
        std::fs::write(dir.join("merges.txt"), "#version: 0.2\nh i\n\u{120} hi\n").unwrap();
    }
}
