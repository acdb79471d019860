// Location: src/model/tokenizer.rs

use std::path::Path;

use tokenizers::models::bpe::BPE;
use tokenizers::pre_tokenizers::byte_level::ByteLevel;
use tokenizers::processors::template::TemplateProcessing;
use tokenizers::{AddedToken, Tokenizer};

use crate::error::{BenchError, Result};

use super::loader::TokenizerFiles;

/// Sequence marker GPT-2 style BPE checkpoints prepend to every prompt
const BPE_PREFIX_TOKEN: &str = "</s>";

/// Thin wrapper over a Hugging Face `tokenizer.json`
pub struct PromptTokenizer {
    tokenizer: Tokenizer,
}

impl PromptTokenizer {
    pub fn load(files: &TokenizerFiles) -> Result<Self> {
        match files {
            TokenizerFiles::Json(path) => Self::from_file(path),
            TokenizerFiles::Bpe { vocab, merges } => Self::from_bpe_files(vocab, merges),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            BenchError::model(format!("Failed to load tokenizer from {}: {}", path.display(), e))
        })?;
        Ok(Self { tokenizer })
    }

    /// Byte-level BPE from `vocab.json` and `merges.txt`. Encodings start
    /// with `</s>`, which decoding skips as a special token.
    pub fn from_bpe_files(vocab: &Path, merges: &Path) -> Result<Self> {
        let (Some(vocab), Some(merges)) = (vocab.to_str(), merges.to_str()) else {
            return Err(BenchError::model("Tokenizer paths must be valid UTF-8"));
        };
        let bpe = BPE::from_file(vocab, merges)
            .build()
            .map_err(|e| BenchError::model(format!("Failed to load BPE tokenizer from {}: {}", vocab, e)))?;

        let mut tokenizer = Tokenizer::new(bpe);
        let prefix_id = tokenizer
            .token_to_id(BPE_PREFIX_TOKEN)
            .ok_or_else(|| BenchError::model(format!("{} is missing from {}", BPE_PREFIX_TOKEN, vocab)))?;

        let processor = TemplateProcessing::builder()
            .try_single(format!("{} $A", BPE_PREFIX_TOKEN).as_str())
            .map_err(|e| BenchError::model(format!("Invalid tokenizer template: {}", e)))?
            .special_tokens(vec![(BPE_PREFIX_TOKEN, prefix_id)])
            .build()
            .map_err(|e| BenchError::model(format!("Invalid tokenizer template: {}", e)))?;

        tokenizer
            .with_pre_tokenizer(Some(ByteLevel::default().add_prefix_space(false)))
            .with_post_processor(Some(processor))
            .with_decoder(Some(ByteLevel::default()));
        tokenizer.add_special_tokens(&[AddedToken::from(BPE_PREFIX_TOKEN, true)]);

        Ok(Self { tokenizer })
    }

    /// Encode text to token IDs, adding the model's special tokens
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| BenchError::processing(format!("Tokenization failed: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| BenchError::processing(format!("Decoding failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures;

    #[test]
    fn test_encode_decode() {
        let (_dir, tokenizer) = fixtures::tokenizer();
        let ids = tokenizer.encode("t3 t7 t31").unwrap();
        assert_eq!(ids, vec![3, 7, 31]);
        assert_eq!(tokenizer.decode(&ids).unwrap(), "t3 t7 t31");
    }

    #[test]
    fn test_unknown_words_map_to_unk() {
        let (_dir, tokenizer) = fixtures::tokenizer();
        let ids = tokenizer.encode("Hello, my name is").unwrap();
        assert!(!ids.is_empty());
        assert!(ids.iter().all(|&id| id == 0));
    }

    #[test]
    fn test_bpe_files() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_bpe_files(dir.path());
        let files = TokenizerFiles::Bpe {
            vocab: dir.path().join("vocab.json"),
            merges: dir.path().join("merges.txt"),
        };
        let tokenizer = PromptTokenizer::load(&files).unwrap();

        let ids = tokenizer.encode("hi hi").unwrap();
        assert_eq!(ids, vec![2, 6, 7]);
        assert_eq!(tokenizer.decode(&ids).unwrap(), "hi hi");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = PromptTokenizer::from_file(dir.path().join("tokenizer.json"));
        assert!(matches!(result, Err(BenchError::ModelError { .. })));
    }
}
