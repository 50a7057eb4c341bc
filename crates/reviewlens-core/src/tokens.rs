//! Token cost estimation for prompt budgeting.
//!
//! The default [`HeuristicCounter`] needs no model files and is stable across
//! runs. With the `tokenizers` feature, [`HfTokenCounter`] counts with a real
//! `tokenizer.json` vocabulary instead.

/// Deterministic token cost of a piece of prompt text.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Roughly four bytes per token, which tracks BPE vocabularies on English prose.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        text.len().div_ceil(4).max(1)
    }
}

#[cfg(feature = "tokenizers")]
pub use hf::HfTokenCounter;

#[cfg(feature = "tokenizers")]
mod hf {
    use std::path::Path;

    use tokenizers::Tokenizer;
    use tracing::info;

    use super::TokenCounter;
    use crate::CoreError;

    /// Token counter backed by a Hugging Face `tokenizer.json`.
    pub struct HfTokenCounter {
        tokenizer: Tokenizer,
    }

    impl HfTokenCounter {
        pub fn from_file(path: &Path) -> Result<Self, CoreError> {
            if !path.exists() {
                return Err(CoreError::Tokenizer(format!(
                    "tokenizer not found: {}",
                    path.display()
                )));
            }
            let tokenizer =
                Tokenizer::from_file(path).map_err(|e| CoreError::Tokenizer(e.to_string()))?;
            info!(path = %path.display(), "loaded tokenizer");
            Ok(Self { tokenizer })
        }
    }

    impl TokenCounter for HfTokenCounter {
        fn count(&self, text: &str) -> usize {
            match self.tokenizer.encode(text, false) {
                Ok(encoding) => encoding.get_ids().len(),
                // Unencodable input still has to be budgeted.
                Err(_) => super::HeuristicCounter.count(text),
            }
        }
    }
}
