// Location: src/model/loader.rs

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use candle_transformers::models::llama::LlamaConfig;
use hf_hub::api::sync::{Api, ApiRepo};
use hf_hub::{Repo, RepoType};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::ModelDType;
use crate::error::{BenchError, Result};

use super::architecture::{DecoderModel, ModelConfig, SUPPORTED_MODEL_TYPES};
use super::opt::OptConfig;
use super::runtime::ModelRuntime;

/// Tokenizer definition of a checkpoint
#[derive(Debug, Clone, PartialEq)]
pub enum TokenizerFiles {
    /// A serialized `tokenizer.json`
    Json(PathBuf),
    /// Byte-level BPE vocabulary and merges, as shipped by GPT-2 style checkpoints
    Bpe { vocab: PathBuf, merges: PathBuf },
}

/// Weight files of a checkpoint
#[derive(Debug, Clone, PartialEq)]
pub enum WeightFiles {
    /// One or more safetensors shards
    Safetensors(Vec<PathBuf>),
    /// A pickled PyTorch state dict
    Pytorch(PathBuf),
}

impl WeightFiles {
    pub fn num_files(&self) -> usize {
        match self {
            WeightFiles::Safetensors(paths) => paths.len(),
            WeightFiles::Pytorch(_) => 1,
        }
    }

    pub fn var_builder(&self, dtype: DType, device: &Device) -> Result<VarBuilder<'static>> {
        match self {
            WeightFiles::Safetensors(paths) => {
                // Weights are memory-mapped; the files must stay untouched while loaded.
                Ok(unsafe { VarBuilder::from_mmaped_safetensors(paths, dtype, device)? })
            }
            WeightFiles::Pytorch(path) => Ok(VarBuilder::from_pth(path, dtype, device)?),
        }
    }
}

/// Local paths of everything needed to build an engine
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: TokenizerFiles,
    pub weights: WeightFiles,
}

/// Parsed `config.json` of a supported checkpoint
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub config: ModelConfig,
    /// `torch_dtype` as declared by the checkpoint
    pub torch_dtype: Option<String>,
}

enum ModelSource {
    Local(PathBuf),
    Hub(ApiRepo),
}

impl ModelSource {
    /// Existing directories are used as is, anything else is a Hub id
    fn open(id: &str, revision: &str) -> Result<Self> {
        let path = Path::new(id);
        if path.is_dir() {
            return Ok(ModelSource::Local(path.to_path_buf()));
        }

        let api = Api::new()
            .map_err(|e| BenchError::model(format!("Failed to create Hugging Face API client: {}", e)))?;
        Ok(ModelSource::Hub(api.repo(Repo::with_revision(
            id.to_string(),
            RepoType::Model,
            revision.to_string(),
        ))))
    }

    fn get(&self, file: &str) -> Result<PathBuf> {
        match self {
            ModelSource::Local(dir) => {
                let path = dir.join(file);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(BenchError::model(format!("{} not found in {}", file, dir.display())))
                }
            }
            ModelSource::Hub(repo) => repo
                .get(file)
                .map_err(|e| BenchError::model(format!("Failed to fetch {}: {}", file, e))),
        }
    }
}

/// Locate config, tokenizer and weights for `model_id`, downloading from the
/// Hub when the id is not a local directory. Blocking.
pub fn resolve_model_files(model_id: &str, tokenizer_id: &str, revision: &str) -> Result<ModelFiles> {
    let source = ModelSource::open(model_id, revision)?;
    let config = source.get("config.json")?;
    let weights = resolve_weights(&source)?;

    let tokenizer = if tokenizer_id == model_id {
        resolve_tokenizer(&source)?
    } else {
        resolve_tokenizer(&ModelSource::open(tokenizer_id, revision)?)?
    };

    debug!(model_id, tokenizer_id, weight_files = weights.num_files(), "resolved model files");
    Ok(ModelFiles {
        config,
        tokenizer,
        weights,
    })
}

fn resolve_tokenizer(source: &ModelSource) -> Result<TokenizerFiles> {
    if let Ok(path) = source.get("tokenizer.json") {
        return Ok(TokenizerFiles::Json(path));
    }

    let vocab = source.get("vocab.json").map_err(|_| {
        BenchError::model("Neither tokenizer.json nor vocab.json and merges.txt were found")
    })?;
    let merges = source.get("merges.txt")?;
    Ok(TokenizerFiles::Bpe { vocab, merges })
}

fn resolve_weights(source: &ModelSource) -> Result<WeightFiles> {
    if let Ok(path) = source.get("model.safetensors") {
        return Ok(WeightFiles::Safetensors(vec![path]));
    }

    let Ok(index_path) = source.get("model.safetensors.index.json") else {
        return source
            .get("pytorch_model.bin")
            .map(WeightFiles::Pytorch)
            .map_err(|_| {
                BenchError::model(
                    "None of model.safetensors, model.safetensors.index.json or pytorch_model.bin was found",
                )
            });
    };

    let index: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&index_path)?)
        .map_err(|e| BenchError::model(format!("Failed to parse safetensors index: {}", e)))?;

    let weight_map = index
        .get("weight_map")
        .and_then(|m| m.as_object())
        .ok_or_else(|| BenchError::model("Safetensors index has no weight_map"))?;

    let shards: BTreeSet<&str> = weight_map.values().filter_map(|v| v.as_str()).collect();
    if shards.is_empty() {
        return Err(BenchError::model("Safetensors index lists no shards"));
    }
    let paths = shards
        .into_iter()
        .map(|shard| source.get(shard))
        .collect::<Result<Vec<_>>>()?;
    Ok(WeightFiles::Safetensors(paths))
}

pub fn inspect_checkpoint(config_path: &Path, trust_remote_code: bool) -> Result<Checkpoint> {
    let raw = std::fs::read_to_string(config_path)?;
    parse_checkpoint(&raw, trust_remote_code)
}

pub(crate) fn parse_checkpoint(raw: &str, trust_remote_code: bool) -> Result<Checkpoint> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| BenchError::model(format!("Invalid config.json: {}", e)))?;

    if value.get("auto_map").is_some() {
        if !trust_remote_code {
            return Err(BenchError::config(
                "trust_remote_code",
                "Checkpoint declares custom modeling code; pass --trust-remote-code to load it",
            ));
        }
        warn!("checkpoint declares custom code, loading it with the built-in implementation");
    }

    let torch_dtype = value
        .get("torch_dtype")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let model_type = value
        .get("model_type")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let config = match model_type.as_str() {
        "llama" => {
            let llama: LlamaConfig = serde_json::from_value(value)
                .map_err(|e| BenchError::model(format!("Invalid llama config: {}", e)))?;
            ModelConfig::Llama(llama.into_config(false))
        }
        "opt" => {
            let opt: OptConfig = serde_json::from_value(value)
                .map_err(|e| BenchError::model(format!("Invalid opt config: {}", e)))?;
            ModelConfig::Opt(opt)
        }
        other => {
            return Err(BenchError::Unsupported(format!(
                "model_type '{}' (supported: {})",
                other,
                SUPPORTED_MODEL_TYPES.join(", ")
            )))
        }
    };

    Ok(Checkpoint { config, torch_dtype })
}

/// Map the requested dtype onto a candle dtype. `auto` keeps CPU runs in
/// F32 and follows the checkpoint on accelerators.
pub fn resolve_dtype(dtype: ModelDType, torch_dtype: Option<&str>, device: &Device) -> DType {
    match dtype {
        ModelDType::Half | ModelDType::Float16 => DType::F16,
        ModelDType::Bfloat16 => DType::BF16,
        ModelDType::Float | ModelDType::Float32 => DType::F32,
        ModelDType::Auto if device.is_cpu() => DType::F32,
        ModelDType::Auto => match torch_dtype {
            Some("bfloat16") => DType::BF16,
            _ => DType::F16,
        },
    }
}

/// One device per replica. More than one replica needs CUDA.
pub fn select_devices(tensor_parallel_size: usize) -> Result<Vec<Device>> {
    if tensor_parallel_size == 1 {
        return Ok(vec![Device::cuda_if_available(0)?]);
    }

    (0..tensor_parallel_size)
        .map(|ordinal| -> Result<Device> {
            let device = Device::cuda_if_available(ordinal)?;
            if device.is_cpu() {
                return Err(BenchError::Unsupported(format!(
                    "tensor_parallel_size {} requires CUDA devices",
                    tensor_parallel_size
                )));
            }
            Ok(device)
        })
        .collect()
}

/// Loads model replicas onto devices, a bounded number at a time
pub struct ModelLoader {
    semaphore: Arc<Semaphore>,
}

impl ModelLoader {
    pub fn new(max_concurrent_loads: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent_loads.max(1))),
        }
    }

    pub async fn load_replicas(
        &self,
        weights: &WeightFiles,
        config: &ModelConfig,
        dtype: DType,
        devices: Vec<Device>,
    ) -> Result<Vec<Arc<ModelRuntime>>> {
        let mut handles = Vec::with_capacity(devices.len());

        for (device_id, device) in devices.into_iter().enumerate() {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| BenchError::model(format!("Loader closed: {}", e)))?;
            let weights = weights.clone();
            let config = config.clone();

            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                debug!(device_id, ?dtype, model_type = config.model_type(), "loading model replica");

                let vb = weights.var_builder(dtype, &device)?;
                let model = DecoderModel::load(vb, &config).map_err(|e| {
                    BenchError::model(format!("Failed to load model on device {}: {}", device_id, e))
                })?;

                Ok::<_, BenchError>(Arc::new(ModelRuntime::new(device, model, config, dtype)))
            }));
        }

        let mut runtimes = Vec::with_capacity(handles.len());
        for handle in handles {
            runtimes.push(handle.await??);
        }

        if runtimes.is_empty() {
            return Err(BenchError::model("No model replicas were loaded"));
        }

        info!(replicas = runtimes.len(), ?dtype, "model replicas loaded");
        Ok(runtimes)
    }
}
