// Location: src/model/runtime.rs

use std::cmp::Ordering;
use std::sync::Arc;

use candle_core::{DType, Device, Tensor, D};
use candle_transformers::generation::LogitsProcessor;

use crate::error::{BenchError, Result};

use super::architecture::{DecoderCache, DecoderModel, ModelConfig};

/// One model replica pinned to a device
pub struct ModelRuntime {
    device: Device,
    model: Arc<DecoderModel>,
    config: Arc<ModelConfig>,
    dtype: DType,
}

/// Tokens produced for one sequence
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedSequence {
    pub token_ids: Vec<u32>,
    pub cumulative_logprob: f64,
}

/// A live beam: its tokens so far, the cache after consuming them, and the
/// logits for the next position.
struct Beam {
    token_ids: Vec<u32>,
    logprob: f64,
    cache: DecoderCache,
    logits: Tensor,
}

impl ModelRuntime {
    pub fn new(device: Device, model: DecoderModel, config: ModelConfig, dtype: DType) -> Self {
        Self {
            device,
            model: Arc::new(model),
            config: Arc::new(config),
            dtype,
        }
    }

    pub fn max_position_embeddings(&self) -> usize {
        self.config.max_position_embeddings()
    }

    /// Tokens a prompt of `prompt_len` may still generate, capped at
    /// `max_tokens`. Zero when the prompt fills the position table.
    pub fn max_new_tokens(&self, prompt_len: usize, max_tokens: usize) -> usize {
        max_tokens.min(self.max_position_embeddings().saturating_sub(prompt_len))
    }

    /// Check that a prompt plus its continuation fits the position table
    pub fn check_capacity(&self, prompt_len: usize, max_tokens: usize) -> Result<()> {
        if prompt_len == 0 {
            return Err(BenchError::processing("Prompt must contain at least one token"));
        }
        if prompt_len + max_tokens > self.max_position_embeddings() {
            return Err(BenchError::processing(format!(
                "Prompt of {} tokens plus {} new tokens exceeds the model's {} positions",
                prompt_len,
                max_tokens,
                self.max_position_embeddings()
            )));
        }
        Ok(())
    }

    fn new_cache(&self) -> Result<DecoderCache> {
        self.model.new_cache(&self.config, self.dtype, &self.device)
    }

    /// Run `tokens` at `index_pos` and return F32 logits for the last position
    fn forward(&self, tokens: &[u32], index_pos: usize, cache: &mut DecoderCache) -> Result<Tensor> {
        let input = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
        let logits = self.model.forward(&input, index_pos, cache)?;
        Ok(logits.squeeze(0)?.to_dtype(DType::F32)?)
    }

    /// Sample `max_tokens` tokens after `prompt`. End-of-sequence is not a
    /// stop condition. A temperature of zero decodes greedily.
    pub fn sample(
        &self,
        prompt: &[u32],
        max_tokens: usize,
        temperature: f64,
        top_p: f64,
        seed: u64,
    ) -> Result<GeneratedSequence> {
        self.check_capacity(prompt.len(), max_tokens)?;

        let top_p = (top_p < 1.0).then_some(top_p);
        let mut logits_processor = LogitsProcessor::new(seed, Some(temperature), top_p);

        let mut cache = self.new_cache()?;
        let mut logits = self.forward(prompt, 0, &mut cache)?;
        let mut index_pos = prompt.len();

        let mut token_ids = Vec::with_capacity(max_tokens);
        let mut cumulative_logprob = 0.0;

        for step in 0..max_tokens {
            let next_token = logits_processor.sample(&logits)?;
            cumulative_logprob += token_logprob(&logits, next_token)?;
            token_ids.push(next_token);

            if step + 1 == max_tokens {
                break;
            }
            logits = self.forward(&[next_token], index_pos, &mut cache)?;
            index_pos += 1;
        }

        Ok(GeneratedSequence {
            token_ids,
            cumulative_logprob,
        })
    }

    /// Beam search of `beam_width` beams over exactly `max_tokens` steps,
    /// best beam first.
    pub fn beam_search(
        &self,
        prompt: &[u32],
        max_tokens: usize,
        beam_width: usize,
    ) -> Result<Vec<GeneratedSequence>> {
        self.check_capacity(prompt.len(), max_tokens)?;
        if beam_width == 0 {
            return Err(BenchError::processing("Beam width must be at least 1"));
        }

        let mut cache = self.new_cache()?;
        let logits = self.forward(prompt, 0, &mut cache)?;
        let mut beams = vec![Beam {
            token_ids: Vec::with_capacity(max_tokens),
            logprob: 0.0,
            cache,
            logits,
        }];
        let mut index_pos = prompt.len();

        for step in 0..max_tokens {
            let mut candidates: Vec<(f64, usize, u32)> = Vec::with_capacity(beams.len() * beam_width);
            for (parent, beam) in beams.iter().enumerate() {
                let logprobs: Vec<f32> = candle_nn::ops::log_softmax(&beam.logits, D::Minus1)?.to_vec1()?;
                for (token, logprob) in top_k(&logprobs, beam_width) {
                    candidates.push((beam.logprob + logprob as f64, parent, token));
                }
            }
            candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
            candidates.truncate(beam_width);

            let last_step = step + 1 == max_tokens;
            let mut next_beams = Vec::with_capacity(candidates.len());
            for (logprob, parent, token) in candidates {
                let parent = &beams[parent];
                let mut token_ids = parent.token_ids.clone();
                token_ids.push(token);

                let mut cache = parent.cache.clone();
                let logits = if last_step {
                    parent.logits.clone()
                } else {
                    self.forward(&[token], index_pos, &mut cache)?
                };

                next_beams.push(Beam {
                    token_ids,
                    logprob,
                    cache,
                    logits,
                });
            }

            beams = next_beams;
            index_pos += 1;
        }

        Ok(beams
            .into_iter()
            .map(|beam| GeneratedSequence {
                token_ids: beam.token_ids,
                cumulative_logprob: beam.logprob,
            })
            .collect())
    }
}

fn token_logprob(logits: &Tensor, token: u32) -> Result<f64> {
    let logprobs = candle_nn::ops::log_softmax(logits, D::Minus1)?;
    Ok(logprobs.get(token as usize)?.to_scalar::<f32>()? as f64)
}

/// The `k` highest log-probabilities with their token ids, highest first
pub(crate) fn top_k(logprobs: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut indexed: Vec<(u32, f32)> = logprobs
        .iter()
        .enumerate()
        .map(|(token, &logprob)| (token as u32, logprob))
        .collect();
    let descending = |a: &(u32, f32), b: &(u32, f32)| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal);

    let k = k.min(indexed.len());
    if k == 0 {
        return Vec::new();
    }
    if k < indexed.len() {
        indexed.select_nth_unstable_by(k - 1, descending);
        indexed.truncate(k);
    }
    indexed.sort_by(descending);
    indexed
}
