//! Sampling policy passed to the engine with every generation call

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::error::{BenchError, Result};

/// Temperatures below this are treated as greedy decoding
pub(crate) const SAMPLING_EPS: f64 = 1e-5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Completions per prompt; the beam width under beam search
    pub n: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub use_beam_search: bool,
    /// Keep generating past the end-of-sequence token
    pub ignore_eos: bool,
    pub max_tokens: usize,
    pub seed: u64,
}

impl SamplingParams {
    /// Derive the benchmark's sampling policy: deterministic under beam
    /// search, plain sampling otherwise.
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            n: config.n,
            temperature: if config.use_beam_search { 0.0 } else { 1.0 },
            top_p: 1.0,
            use_beam_search: config.use_beam_search,
            ignore_eos: true,
            max_tokens: config.output_len,
            seed: config.random_seed,
        }
    }

    pub fn is_greedy(&self) -> bool {
        self.temperature < SAMPLING_EPS
    }

    /// Sequences a single request occupies in a scheduling step
    pub fn sequences_per_request(&self) -> usize {
        if self.use_beam_search {
            1
        } else {
            self.n
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.n == 0 {
            return Err(BenchError::config("n", "n must be at least 1"));
        }
        if self.max_tokens == 0 {
            return Err(BenchError::config("max_tokens", "max_tokens must be at least 1"));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(BenchError::config("top_p", "top_p must be in (0, 1]"));
        }
        if self.temperature < 0.0 {
            return Err(BenchError::config("temperature", "temperature must be non-negative"));
        }
        if self.use_beam_search {
            if !self.is_greedy() {
                return Err(BenchError::config("temperature", "temperature must be 0 when using beam search"));
            }
            if self.top_p < 1.0 - SAMPLING_EPS {
                return Err(BenchError::config("top_p", "top_p must be 1 when using beam search"));
            }
        }
        Ok(())
    }
}

impl fmt::Display for SamplingParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SamplingParams(n={}, temperature={:?}, top_p={:?}, use_beam_search={}, ignore_eos={}, max_tokens={}, seed={})",
            self.n,
            self.temperature,
            self.top_p,
            self.use_beam_search,
            self.ignore_eos,
            self.max_tokens,
            self.seed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(args: &[&str]) -> RunConfig {
        let argv = std::iter::once("draft-bench")
            .chain(args.iter().copied())
            .map(String::from);
        RunConfig::try_parse_args(argv).unwrap()
    }

    #[test]
    fn test_default_policy() {
        let params = SamplingParams::from_config(&config(&[]));
        assert_eq!(params.temperature, 1.0);
        assert_eq!(params.top_p, 1.0);
        assert_eq!(params.max_tokens, 512);
        assert_eq!(params.n, 1);
        assert!(params.ignore_eos);
        assert!(!params.is_greedy());
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_beam_search_only_changes_temperature() {
        let default = SamplingParams::from_config(&config(&[]));
        let beam = SamplingParams::from_config(&config(&["--use-beam-search"]));

        assert_eq!(beam.temperature, 0.0);
        assert!(beam.is_greedy());
        assert_eq!(
            SamplingParams {
                temperature: default.temperature,
                use_beam_search: false,
                ..beam.clone()
            },
            default
        );
        assert!(beam.validate().is_ok());
    }

    #[test]
    fn test_temperature_independent_of_other_fields() {
        for args in [
            &["--batch-size", "1", "--output-len", "7"][..],
            &["--input-len", "4096", "--n", "4"][..],
            &["--dtype", "bfloat16", "--random_seed", "99"][..],
        ] {
            assert_eq!(SamplingParams::from_config(&config(args)).temperature, 1.0);
            let mut with_beam = args.to_vec();
            with_beam.push("--use-beam-search");
            assert_eq!(SamplingParams::from_config(&config(&with_beam)).temperature, 0.0);
        }
    }

    #[test]
    fn test_sequences_per_request() {
        let mut params = SamplingParams::from_config(&config(&["--n", "3"]));
        assert_eq!(params.sequences_per_request(), 3);
        params.use_beam_search = true;
        assert_eq!(params.sequences_per_request(), 1);
    }

    #[test]
    fn test_validation() {
        let mut params = SamplingParams::from_config(&config(&["--use-beam-search"]));
        params.temperature = 0.8;
        assert_eq!(params.validate().unwrap_err().parameter(), Some("temperature"));

        params.temperature = 0.0;
        params.top_p = 0.9;
        assert_eq!(params.validate().unwrap_err().parameter(), Some("top_p"));

        let mut params = SamplingParams::from_config(&config(&[]));
        params.n = 0;
        assert_eq!(params.validate().unwrap_err().parameter(), Some("n"));
    }

    #[test]
    fn test_display() {
        let params = SamplingParams::from_config(&config(&[]));
        assert_eq!(
            params.to_string(),
            "SamplingParams(n=1, temperature=1.0, top_p=1.0, use_beam_search=false, ignore_eos=true, max_tokens=512, seed=1)"
        );
    }
}
