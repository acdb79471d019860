use std::io::Write;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::{
    engine::GenerationEngine,
    error::{BenchError, Result},
    sampling::SamplingParams,
    types::PromptInput,
    utils::Profiler,
};

const GENERATE_SPAN: &str = "draft_generate";

/// Timings of the measured iterations
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyReport {
    pub samples: Vec<Duration>,
    /// Arithmetic mean of `samples`, in seconds
    pub mean_secs: f64,
}

/// `batch_size` prompts of `input_len` zero token ids
pub fn dummy_prompts(batch_size: usize, input_len: usize) -> Vec<PromptInput> {
    vec![PromptInput::TokenIds(vec![0; input_len]); batch_size]
}

/// One warm-up generation, then `num_iters` timed ones over the same dummy batch.
pub async fn run_latency<E, W>(
    engine: &E,
    params: &SamplingParams,
    batch_size: usize,
    input_len: usize,
    num_iters: usize,
    out: &mut W,
) -> Result<LatencyReport>
where
    E: GenerationEngine + ?Sized,
    W: Write,
{
    if num_iters == 0 {
        return Err(BenchError::config("num_iters", "Must be a positive integer"));
    }
    let prompts = dummy_prompts(batch_size, input_len);

    writeln!(out, "Warming up...")?;
    engine.generate(prompts.clone(), params, false).await?;

    let profiler = Profiler::new();
    let progress = ProgressBar::new(num_iters as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("Profiling iterations: {bar:40} {pos}/{len} [{elapsed_precise}]") {
        progress.set_style(style);
    }

    for iteration in 0..num_iters {
        {
            let _span = profiler.start_span(GENERATE_SPAN);
            engine.generate(prompts.clone(), params, false).await?;
        }
        debug!(iteration, "latency iteration finished");
        progress.inc(1);
    }
    progress.finish_and_clear();

    let stats = profiler
        .stats(GENERATE_SPAN)
        .ok_or_else(|| BenchError::processing("No latency samples were recorded"))?;
    info!(
        iterations = num_iters,
        min_secs = stats.min_time.as_secs_f64(),
        max_secs = stats.max_time.as_secs_f64(),
        "latency benchmark finished"
    );
    let report = LatencyReport {
        mean_secs: stats.mean_secs(),
        samples: stats.samples,
    };

    writeln!(out, "Avg draft latency: {} seconds", report.mean_secs)?;
    Ok(report)
}
