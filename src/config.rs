// Location: src/config.rs

use std::fmt;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};

/// Weight quantization scheme requested for the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Quantization {
    Awq,
    None,
}

/// Data type for model weights and activations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelDType {
    Auto,
    Half,
    #[value(name = "float16")]
    Float16,
    #[value(name = "bfloat16")]
    Bfloat16,
    Float,
    #[value(name = "float32")]
    Float32,
}

/// What the benchmark does once the engine is up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BenchMode {
    /// Generate the fixed prompt set and print every continuation
    Generate,
    /// Warm up, then time repeated generations over dummy prompts
    Latency,
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantization::Awq => write!(f, "awq"),
            Quantization::None => write!(f, "none"),
        }
    }
}

impl fmt::Display for ModelDType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelDType::Auto => "auto",
            ModelDType::Half => "half",
            ModelDType::Float16 => "float16",
            ModelDType::Bfloat16 => "bfloat16",
            ModelDType::Float => "float",
            ModelDType::Float32 => "float32",
        };
        f.write_str(name)
    }
}

/// Run configuration, built once from the command line
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "draft-bench")]
#[command(about = "Benchmark the latency of processing a single batch of requests till completion.")]
#[command(version)]
pub struct RunConfig {
    /// Target model of the speculative pair (not loaded)
    #[arg(long = "target_model", default_value = "facebook/opt-6.7b")]
    pub target_model: String,

    /// Model the engine is built from
    #[arg(long = "draft_model", default_value = "facebook/opt-125m")]
    pub draft_model: String,

    /// Tokenizer override; defaults to the draft model
    #[arg(long)]
    pub tokenizer: Option<String>,

    #[arg(short = 'q', long, value_enum, default_value_t = Quantization::None)]
    pub quantization: Quantization,

    /// Number of model replicas, one per device
    #[arg(long = "tensor-parallel-size", default_value_t = 1)]
    pub tensor_parallel_size: usize,

    #[arg(long = "gpu-memory-utilization", default_value_t = 0.7)]
    pub gpu_memory_utilization: f32,

    #[arg(long = "input-len", default_value_t = 256)]
    pub input_len: usize,

    #[arg(long = "output-len", default_value_t = 512)]
    pub output_len: usize,

    #[arg(long = "batch-size", default_value_t = 8)]
    pub batch_size: usize,

    #[arg(long = "random_seed", default_value_t = 1)]
    pub random_seed: u64,

    /// Number of draft tokens.
    #[arg(long = "draft_length", default_value_t = 4)]
    pub draft_length: usize,

    /// Number of generated sequences per prompt.
    #[arg(long = "n", default_value_t = 1)]
    pub n: usize,

    #[arg(long = "use-beam-search")]
    pub use_beam_search: bool,

    /// Number of iterations to run.
    #[arg(long = "num-iters", default_value_t = 2)]
    pub num_iters: usize,

    /// trust remote code from huggingface
    #[arg(long = "trust-remote-code")]
    pub trust_remote_code: bool,

    /// data type for model weights and activations. The "auto" option will use
    /// FP16 precision for FP32 and FP16 models, and BF16 precision for BF16 models.
    #[arg(long, value_enum, default_value_t = ModelDType::Auto)]
    pub dtype: ModelDType,

    #[arg(long, value_enum, default_value_t = BenchMode::Generate)]
    pub mode: BenchMode,

    /// Hub revision used when a model id is not a local directory
    #[arg(long, default_value = "main")]
    pub revision: String,
}

/// Single-dash multi-letter flags that clap cannot express as shorts
const SINGLE_DASH_FLAGS: &[(&str, &str)] = &[
    ("-tp", "--tensor-parallel-size"),
    ("-gputil", "--gpu-memory-utilization"),
];

fn normalize_arg(arg: String) -> String {
    for (short, long) in SINGLE_DASH_FLAGS {
        if arg == *short {
            return long.to_string();
        }
        let Some(rest) = arg.strip_prefix(short) else {
            continue;
        };
        // `-tp=2` and the attached `-tp2`
        let value = rest.strip_prefix('=').unwrap_or(rest);
        if value.parse::<f64>().is_ok() {
            return format!("{long}={value}");
        }
    }
    arg
}

impl RunConfig {
    /// Parse from an argument list whose first element is the program name
    pub fn try_parse_args<I>(args: I) -> std::result::Result<Self, clap::Error>
    where
        I: IntoIterator<Item = String>,
    {
        Self::try_parse_from(args.into_iter().map(normalize_arg))
    }

    /// Parse the process arguments, exiting with a usage message on failure
    pub fn parse_args() -> Self {
        Self::try_parse_args(std::env::args()).unwrap_or_else(|e| e.exit())
    }

    /// Tokenizer to load, falling back to the draft model
    pub fn tokenizer_id(&self) -> &str {
        self.tokenizer.as_deref().unwrap_or(&self.draft_model)
    }

    pub fn validate(&self) -> Result<()> {
        if self.draft_model.trim().is_empty() {
            return Err(BenchError::config("draft_model", "Model identifier cannot be empty"));
        }

        if let Some(tokenizer) = &self.tokenizer {
            if tokenizer.trim().is_empty() {
                return Err(BenchError::config("tokenizer", "Tokenizer identifier cannot be empty when specified"));
            }
        }

        let counts = [
            ("tensor_parallel_size", self.tensor_parallel_size),
            ("input_len", self.input_len),
            ("output_len", self.output_len),
            ("batch_size", self.batch_size),
            ("draft_length", self.draft_length),
            ("n", self.n),
            ("num_iters", self.num_iters),
        ];
        for (parameter, value) in counts {
            if value == 0 {
                return Err(BenchError::config(parameter, "Must be a positive integer"));
            }
        }

        if !(self.gpu_memory_utilization > 0.0 && self.gpu_memory_utilization <= 1.0) {
            return Err(BenchError::config(
                "gpu_memory_utilization",
                "Memory utilization must be in (0, 1]",
            ));
        }

        if self.batch_size.checked_mul(self.input_len).is_none() {
            return Err(BenchError::config("batch_size", "batch_size * input_len overflows"));
        }

        Ok(())
    }
}
