//! Benchmark modes: prompt generation and draft-latency measurement

mod driver;
mod latency;

pub use driver::{run_generation, PROMPTS};
pub use latency::{dummy_prompts, run_latency, LatencyReport};

use std::io::Write;

use crate::{
    config::{BenchMode, RunConfig},
    engine::{EngineArgs, EngineBuilder, GenerationEngine},
    error::Result,
    sampling::SamplingParams,
};

/// Print the configuration, build the draft engine and run the selected mode
pub async fn run<W: Write>(config: &RunConfig, out: &mut W) -> Result<()> {
    config.validate()?;
    writeln!(out, "{:?}", config)?;

    let engine = EngineBuilder::new()
        .with_args(EngineArgs::from_config(config))
        .build()
        .await?;

    run_with_engine(config, &engine, out).await
}

/// Run the selected mode against an already constructed engine
pub async fn run_with_engine<E, W>(config: &RunConfig, engine: &E, out: &mut W) -> Result<()>
where
    E: GenerationEngine + ?Sized,
    W: Write,
{
    let params = SamplingParams::from_config(config);
    params.validate()?;
    writeln!(out, "{}", params)?;

    match config.mode {
        BenchMode::Generate => {
            run_generation(engine, &params, out).await?;
        }
        BenchMode::Latency => {
            run_latency(
                engine,
                &params,
                config.batch_size,
                config.input_len,
                config.num_iters,
                out,
            )
            .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::engine::{testing::MockEngine, LLMEngine};
    use crate::error::BenchError;
    use crate::model::fixtures;

    fn config(args: &[&str]) -> RunConfig {
        let argv = std::iter::once("draft-bench")
            .chain(args.iter().copied())
            .map(String::from);
        RunConfig::try_parse_args(argv).unwrap()
    }

    #[tokio::test]
    async fn test_default_scenario() {
        let config = config(&[]);
        let engine = MockEngine::new(EngineArgs::from_config(&config));
        let mut out = Vec::new();

        run_with_engine(&config, &engine, &mut out).await.unwrap();

        let args = engine.args();
        assert_eq!(args.model, "facebook/opt-125m");
        assert_eq!(args.max_num_seqs, 8);
        assert_eq!(args.max_num_batched_tokens, 2048);

        let printed = String::from_utf8(out).unwrap();
        let mut lines = printed.lines();
        assert_eq!(
            lines.next(),
            Some("SamplingParams(n=1, temperature=1.0, top_p=1.0, use_beam_search=false, ignore_eos=true, max_tokens=512, seed=1)")
        );
        assert_eq!(lines.next(), Some("4"));
        assert_eq!(lines.filter(|l| l.starts_with("Prompt: ")).count(), 4);
    }

    #[tokio::test]
    async fn test_small_batch_prints_every_prompt() {
        // n = 3 completions with two sequences per step on the candle engine
        let config = config(&["--batch-size", "2", "--n", "3", "--output-len", "4"]);
        let (_dir, tokenizer) = fixtures::tokenizer();
        let runtimes = vec![Arc::new(fixtures::runtime())];
        let engine = LLMEngine::from_parts(EngineArgs::from_config(&config), tokenizer, runtimes).unwrap();
        let mut out = Vec::new();

        run_with_engine(&config, &engine, &mut out).await.unwrap();

        let printed = String::from_utf8(out).unwrap();
        let mut lines = printed.lines().skip(1);
        assert_eq!(lines.next(), Some("4"));
        assert_eq!(lines.filter(|l| l.starts_with("Prompt: ")).count(), 4);
    }

    #[tokio::test]
    async fn test_beam_search_scenario() {
        let config = config(&["--use-beam-search"]);
        let engine = MockEngine::new(EngineArgs::from_config(&config));
        let mut out = Vec::new();

        run_with_engine(&config, &engine, &mut out).await.unwrap();

        let params = &engine.calls.lock()[0].1;
        assert_eq!(params.temperature, 0.0);
        assert_eq!(params.top_p, 1.0);
        assert_eq!(params.max_tokens, 512);
        assert!(String::from_utf8(out).unwrap().contains("temperature=0.0"));
    }

    #[tokio::test]
    async fn test_latency_mode() {
        let config = config(&["--mode", "latency", "--num-iters", "2", "--batch-size", "3", "--input-len", "5"]);
        let engine = MockEngine::new(EngineArgs::from_config(&config));
        let mut out = Vec::new();

        run_with_engine(&config, &engine, &mut out).await.unwrap();

        let calls = engine.calls.lock();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|(prompts, _, _)| prompts.len() == 3));
        assert!(String::from_utf8(out).unwrap().contains("Avg draft latency: "));
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_construction() {
        let config = config(&["--n", "0"]);
        let mut out = Vec::new();
        let err = run(&config, &mut out).await.unwrap_err();
        assert!(matches!(err, BenchError::ConfigurationError { .. }));
        assert!(out.is_empty());
    }
}
