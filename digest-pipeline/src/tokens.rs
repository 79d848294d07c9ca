use std::fmt;
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

/// Characters per token assumed by the heuristic estimator.
pub const CHARS_PER_TOKEN: usize = 4;

/// Approximate token counter. The strategy is fixed at construction and
/// callers never need to know which one is active.
pub enum TokenEstimator {
    Precise(Box<Tokenizer>),
    Fallback,
}

impl TokenEstimator {
    pub fn fallback() -> Self {
        TokenEstimator::Fallback
    }

    /// Load a `tokenizer.json` vocabulary, falling back to the heuristic if it cannot be read.
    pub fn from_tokenizer_file(path: &Path) -> Self {
        match Tokenizer::from_file(path) {
            Ok(tokenizer) => {
                info!("Using tokenizer from {} for token estimation", path.display());
                TokenEstimator::Precise(Box::new(tokenizer))
            }
            Err(e) => {
                warn!(
                    "Failed to load tokenizer from {}: {}. Falling back to ~{} characters per token",
                    path.display(),
                    e,
                    CHARS_PER_TOKEN
                );
                TokenEstimator::Fallback
            }
        }
    }

    pub fn from_config(tokenizer_path: Option<&Path>) -> Self {
        match tokenizer_path {
            Some(path) => Self::from_tokenizer_file(path),
            None => {
                warn!(
                    "No tokenizer configured. Falling back to ~{} characters per token",
                    CHARS_PER_TOKEN
                );
                TokenEstimator::Fallback
            }
        }
    }

    pub fn is_precise(&self) -> bool {
        matches!(self, TokenEstimator::Precise(_))
    }

    pub fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match self {
            TokenEstimator::Precise(tokenizer) => match tokenizer.encode(text, false) {
                Ok(encoding) => encoding.len(),
                Err(e) => {
                    debug!("Tokenizer failed on {} chars ({}), using heuristic", text.len(), e);
                    heuristic_tokens(text)
                }
            },
            TokenEstimator::Fallback => heuristic_tokens(text),
        }
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        TokenEstimator::Fallback
    }
}

impl fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenEstimator::Precise(_) => f.write_str("TokenEstimator::Precise"),
            TokenEstimator::Fallback => f.write_str("TokenEstimator::Fallback"),
        }
    }
}

/// `ceil(chars / 4)`.
pub fn heuristic_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_has_no_tokens() {
        assert_eq!(TokenEstimator::fallback().estimate(""), 0);
    }

    #[test]
    fn heuristic_rounds_up() {
        let estimator = TokenEstimator::fallback();
        assert_eq!(estimator.estimate("a"), 1);
        assert_eq!(estimator.estimate("abcd"), 1);
        assert_eq!(estimator.estimate("abcde"), 2);
        assert_eq!(estimator.estimate(&"x".repeat(400)), 100);
    }

    #[test]
    fn heuristic_counts_characters_not_bytes() {
        assert_eq!(heuristic_tokens("éééé"), 1);
    }

    #[test]
    fn heuristic_is_monotonic() {
        let estimator = TokenEstimator::fallback();
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        let mut previous = 0;
        for end in 0..=text.len() {
            let current = estimator.estimate(&text[..end]);
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn missing_tokenizer_file_falls_back() {
        let estimator = TokenEstimator::from_tokenizer_file(Path::new("/nonexistent/tokenizer.json"));
        assert!(!estimator.is_precise());
        assert_eq!(estimator.estimate("abcdefgh"), 2);
    }

    #[test]
    fn unconfigured_tokenizer_falls_back() {
        assert!(!TokenEstimator::from_config(None).is_precise());
    }
}
