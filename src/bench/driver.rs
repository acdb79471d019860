use std::io::Write;

use tracing::info;

use crate::{
    engine::GenerationEngine,
    error::Result,
    sampling::SamplingParams,
    types::PromptInput,
};

/// Prompts submitted by the generation benchmark
pub const PROMPTS: [&str; 4] = [
    "Hello, my name is",
    "The president of the United States is",
    "The capital of France is",
    "The future of AI is",
];

/// Generate the fixed prompt set and print each prompt with its first
/// continuation. Returns the number of results printed.
pub async fn run_generation<E, W>(engine: &E, params: &SamplingParams, out: &mut W) -> Result<usize>
where
    E: GenerationEngine + ?Sized,
    W: Write,
{
    let prompts: Vec<PromptInput> = PROMPTS.iter().copied().map(PromptInput::from).collect();
    info!(prompts = prompts.len(), model = %engine.args().model, "submitting prompt batch");

    let outputs = engine.generate(prompts, params, false).await?;
    writeln!(out, "{}", outputs.len())?;

    for output in &outputs {
        let prompt = output.prompt.as_deref().unwrap_or_default();
        let generated_text = output.first_text().unwrap_or_default();
        writeln!(out, "Prompt: {:?}, Generated text: {:?}", prompt, generated_text)?;
    }

    Ok(outputs.len())
}
