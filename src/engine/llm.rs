use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::{
    error::{BenchError, Result},
    model::{GeneratedSequence, ModelRuntime, PromptTokenizer},
    sampling::SamplingParams,
    types::{CompletionOutput, PromptInput, RequestOutput},
};

use super::{
    scheduler::{Scheduler, SchedulingStep},
    EngineArgs, GenerationEngine,
};

/// Candle-backed generation engine over one or more model replicas
pub struct LLMEngine {
    args: EngineArgs,
    tokenizer: Arc<PromptTokenizer>,
    runtimes: Vec<Arc<ModelRuntime>>,
    scheduler: Scheduler,
    next_request_id: AtomicUsize,
}

/// A tokenized request waiting for its steps
struct PendingRequest {
    prompt: Option<String>,
    prompt_token_ids: Vec<u32>,
    /// Tokens this request may generate; zero when its prompt fills the model's context
    max_tokens: usize,
}

impl LLMEngine {
    /// Assemble an engine from loaded replicas. The token budget must hold
    /// the longest prompt the model accepts.
    pub(crate) fn from_parts(
        args: EngineArgs,
        tokenizer: PromptTokenizer,
        runtimes: Vec<Arc<ModelRuntime>>,
    ) -> Result<Self> {
        let max_positions = runtimes
            .first()
            .map(|runtime| runtime.max_position_embeddings())
            .ok_or_else(|| BenchError::model("An engine needs at least one model replica"))?;
        args.check_model_fit(max_positions)?;

        let scheduler = Scheduler::new(args.max_num_seqs, args.max_num_batched_tokens);
        Ok(Self {
            args,
            tokenizer: Arc::new(tokenizer),
            runtimes,
            scheduler,
            next_request_id: AtomicUsize::new(0),
        })
    }

    fn tokenize(&self, prompts: Vec<PromptInput>, params: &SamplingParams) -> Result<Vec<PendingRequest>> {
        let runtime = &self.runtimes[0];
        prompts
            .into_iter()
            .map(|prompt| {
                let (prompt, prompt_token_ids) = match prompt {
                    PromptInput::Text(text) => {
                        let ids = self.tokenizer.encode(&text)?;
                        (Some(text), ids)
                    }
                    PromptInput::TokenIds(ids) => (None, ids),
                };
                if prompt_token_ids.is_empty() {
                    return Err(BenchError::processing("Prompt must contain at least one token"));
                }
                let max_tokens = runtime.max_new_tokens(prompt_token_ids.len(), params.max_tokens);
                Ok(PendingRequest {
                    prompt,
                    prompt_token_ids,
                    max_tokens,
                })
            })
            .collect()
    }

    /// Run every sequence of one step concurrently, spreading them over the
    /// replicas. `active` maps the step's request ids onto `requests`.
    async fn run_step(
        &self,
        step: &SchedulingStep,
        active: &[usize],
        requests: &[PendingRequest],
        params: &SamplingParams,
    ) -> Result<Vec<(usize, Vec<GeneratedSequence>)>> {
        let mut handles = Vec::with_capacity(step.num_seqs);
        let mut owners = Vec::with_capacity(step.num_seqs);

        for group in &step.groups {
            let request_index = active[group.request_id];
            let request = &requests[request_index];
            for sample in group.first_seq..group.first_seq + group.num_seqs {
                let runtime = self.runtimes[handles.len() % self.runtimes.len()].clone();
                let prompt = request.prompt_token_ids.clone();
                let max_tokens = request.max_tokens;
                let params = params.clone();

                handles.push(tokio::task::spawn_blocking(move || {
                    if params.use_beam_search {
                        runtime.beam_search(&prompt, max_tokens, params.n)
                    } else {
                        let seed = params
                            .seed
                            .wrapping_add((request_index * params.n + sample) as u64);
                        runtime
                            .sample(&prompt, max_tokens, params.temperature, params.top_p, seed)
                            .map(|sequence| vec![sequence])
                    }
                }));
                owners.push(request_index);
            }
        }

        let mut completed = Vec::with_capacity(owners.len());
        for (request_index, result) in owners.into_iter().zip(join_all(handles).await) {
            completed.push((request_index, result??));
        }
        Ok(completed)
    }

    fn to_output(&self, request: PendingRequest, sequences: Vec<GeneratedSequence>) -> Result<RequestOutput> {
        let outputs = sequences
            .into_iter()
            .enumerate()
            .map(|(index, sequence)| {
                Ok(CompletionOutput {
                    index,
                    text: self.tokenizer.decode(&sequence.token_ids)?,
                    token_ids: sequence.token_ids,
                    cumulative_logprob: sequence.cumulative_logprob,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RequestOutput {
            request_id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
            prompt: request.prompt,
            prompt_token_ids: request.prompt_token_ids,
            outputs,
        })
    }
}

impl fmt::Debug for LLMEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LLMEngine")
            .field("args", &self.args)
            .field("replicas", &self.runtimes.len())
            .finish()
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    let progress = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("Processed prompts: [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len}")
    {
        progress.set_style(style.progress_chars("##-"));
    }
    progress
}

#[async_trait::async_trait]
impl GenerationEngine for LLMEngine {
    fn args(&self) -> &EngineArgs {
        &self.args
    }

    async fn generate(
        &self,
        prompts: Vec<PromptInput>,
        params: &SamplingParams,
        use_progress: bool,
    ) -> Result<Vec<RequestOutput>> {
        params.validate()?;
        let start_time = Instant::now();

        let requests = self.tokenize(prompts, params)?;
        let mut completions: Vec<Vec<GeneratedSequence>> = vec![Vec::new(); requests.len()];

        // Prompts that fill the model's context are returned without generating
        let mut active = Vec::with_capacity(requests.len());
        for (index, request) in requests.iter().enumerate() {
            if request.max_tokens == 0 {
                warn!(
                    request = index,
                    prompt_tokens = request.prompt_token_ids.len(),
                    max_positions = self.runtimes[0].max_position_embeddings(),
                    "prompt fills the model context, returning it without generated tokens"
                );
                completions[index] = (0..params.n)
                    .map(|_| GeneratedSequence {
                        token_ids: Vec::new(),
                        cumulative_logprob: 0.0,
                    })
                    .collect();
            } else {
                active.push(index);
            }
        }

        let prompt_lens: Vec<usize> = active.iter().map(|&i| requests[i].prompt_token_ids.len()).collect();
        let steps = self.scheduler.schedule(&prompt_lens, params.sequences_per_request())?;
        info!(
            requests = requests.len(),
            steps = steps.len(),
            replicas = self.runtimes.len(),
            "starting generation"
        );

        let progress = use_progress.then(|| progress_bar(requests.len()));
        if let Some(progress) = &progress {
            progress.inc((requests.len() - active.len()) as u64);
        }

        for (step_index, step) in steps.iter().enumerate() {
            let step_start = Instant::now();
            for (request_index, sequences) in self.run_step(step, &active, &requests, params).await? {
                completions[request_index].extend(sequences);
            }

            debug!(
                step = step_index,
                num_seqs = step.num_seqs,
                num_batched_tokens = step.num_batched_tokens,
                elapsed_ms = step_start.elapsed().as_millis() as u64,
                "scheduling step finished"
            );
            if let Some(progress) = &progress {
                let finished = step
                    .groups
                    .iter()
                    .filter(|g| g.first_seq + g.num_seqs == params.sequences_per_request())
                    .count();
                progress.inc(finished as u64);
            }
        }

        if let Some(progress) = progress {
            progress.finish_and_clear();
        }

        let outputs = requests
            .into_iter()
            .zip(completions)
            .map(|(request, sequences)| self.to_output(request, sequences))
            .collect::<Result<Vec<_>>>()?;

        info!(
            requests = outputs.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "generation finished"
        );
        Ok(outputs)
    }
}
