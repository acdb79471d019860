//! Request and output types shared by the driver and the engines

use serde::{Deserialize, Serialize};

/// A single generation request, either raw text or pre-tokenized ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptInput {
    Text(String),
    TokenIds(Vec<u32>),
}

impl PromptInput {
    /// The prompt text, if the request was submitted as text
    pub fn text(&self) -> Option<&str> {
        match self {
            PromptInput::Text(text) => Some(text),
            PromptInput::TokenIds(_) => None,
        }
    }
}

impl From<&str> for PromptInput {
    fn from(text: &str) -> Self {
        PromptInput::Text(text.to_string())
    }
}

impl From<String> for PromptInput {
    fn from(text: String) -> Self {
        PromptInput::Text(text)
    }
}

impl From<Vec<u32>> for PromptInput {
    fn from(ids: Vec<u32>) -> Self {
        PromptInput::TokenIds(ids)
    }
}

/// One generated continuation of a prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOutput {
    /// Position of this completion among the request's completions
    pub index: usize,
    /// Decoded text
    pub text: String,
    /// Generated token ids, excluding the prompt
    pub token_ids: Vec<u32>,
    /// Sum of the log-probabilities of the generated tokens
    pub cumulative_logprob: f64,
}

/// Result of one request, in submission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOutput {
    pub request_id: usize,
    /// Original prompt text; `None` for token-id requests
    pub prompt: Option<String>,
    pub prompt_token_ids: Vec<u32>,
    /// Completions, best first for beam search
    pub outputs: Vec<CompletionOutput>,
}

impl RequestOutput {
    /// Text of the first completion
    pub fn first_text(&self) -> Option<&str> {
        self.outputs.first().map(|c| c.text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_conversions() {
        assert_eq!(PromptInput::from("hi").text(), Some("hi"));
        assert_eq!(PromptInput::from(vec![0, 0]).text(), None);
    }

    #[test]
    fn test_first_text() {
        let mut output = RequestOutput {
            request_id: 0,
            prompt: Some("The capital of France is".to_string()),
            prompt_token_ids: vec![1, 2, 3],
            outputs: vec![],
        };
        assert_eq!(output.first_text(), None);

        output.outputs.push(CompletionOutput {
            index: 0,
            text: " Paris".to_string(),
            token_ids: vec![4],
            cumulative_logprob: -0.5,
        });
        output.outputs.push(CompletionOutput {
            index: 1,
            text: " Lyon".to_string(),
            token_ids: vec![5],
            cumulative_logprob: -2.0,
        });
        assert_eq!(output.first_text(), Some(" Paris"));
    }
}
