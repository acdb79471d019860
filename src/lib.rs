//! draft-bench - draft-model generation benchmark for speculative decoding experiments
//!
//! Builds a generation engine around a draft model, submits a fixed batch of
//! prompts and reports the continuations, or times repeated generations over
//! a dummy batch. The bundled engine runs Llama-architecture checkpoints on
//! candle; anything implementing [`GenerationEngine`] can be driven instead.

use std::fmt;

use candle_core::Device;

pub mod bench;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod sampling;
pub mod types;
pub mod utils;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use config::{BenchMode, ModelDType, Quantization, RunConfig};
pub use engine::{EngineArgs, EngineBuilder, GenerationEngine, LLMEngine};
pub use error::{BenchError, Result};
pub use sampling::SamplingParams;
pub use types::{CompletionOutput, PromptInput, RequestOutput};

/// Highest CUDA ordinal probed during detection
const MAX_PROBED_DEVICES: usize = 16;

/// Feature detection for supported backends
#[derive(Debug, Clone, Copy)]
pub struct Features {
    /// Whether CUDA support is enabled
    pub cuda: bool,
    /// Number of detected CUDA devices
    pub cuda_devices: usize,
}

impl Features {
    /// Detect available features at runtime
    pub fn detect() -> Self {
        let cuda = candle_core::utils::cuda_is_available();
        let cuda_devices = if cuda {
            (0..MAX_PROBED_DEVICES)
                .take_while(|&ordinal| Device::new_cuda(ordinal).is_ok())
                .count()
        } else {
            0
        };

        Self { cuda, cuda_devices }
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CUDA support: {}", if self.cuda { "yes" } else { "no" })?;
        if self.cuda {
            write!(f, ", CUDA devices: {}", self.cuda_devices)?;
        }
        Ok(())
    }
}
