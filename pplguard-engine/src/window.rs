//! Fixed-size token windows

use crate::error::{PerplexityError, Result};
use crate::model::{LanguageModel, TokenId};
use crate::text::normalize_nfkc;
use std::slice::Chunks;

/// Consecutive, non-overlapping windows of at most `max_len` tokens.
///
/// The sequence is lazy and restartable: every call to [`TokenWindows::iter`]
/// starts again from the first window. Only the final window may be shorter
/// than `max_len`.
#[derive(Debug, Clone, Copy)]
pub struct TokenWindows<'a> {
    tokens: &'a [TokenId],
    max_len: usize,
}

impl<'a> TokenWindows<'a> {
    pub fn new(tokens: &'a [TokenId], max_len: usize) -> Result<Self> {
        if max_len == 0 {
            return Err(PerplexityError::InvalidWindowSize);
        }
        Ok(Self { tokens, max_len })
    }

    /// Number of windows.
    pub fn len(&self) -> usize {
        self.tokens.len().div_ceil(self.max_len)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn iter(&self) -> Chunks<'a, TokenId> {
        self.tokens.chunks(self.max_len)
    }
}

impl<'a> IntoIterator for TokenWindows<'a> {
    type Item = &'a [TokenId];
    type IntoIter = Chunks<'a, TokenId>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> IntoIterator for &TokenWindows<'a> {
    type Item = &'a [TokenId];
    type IntoIter = Chunks<'a, TokenId>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Tokenize one corpus text, optionally NFKC-normalizing it first.
///
/// Empty text yields no tokens without calling the tokenizer.
pub fn tokenize_text<M: LanguageModel + ?Sized>(
    model: &M,
    text: &str,
    nfkc: bool,
) -> Result<Vec<TokenId>> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    let tokens = if nfkc {
        model.tokenize(&normalize_nfkc(text))?
    } else {
        model.tokenize(text)?
    };
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LogProbs, ModelError};
    use crate::scorer::{PerplexityScorer, ScorerConfig};

    /// Whitespace tokenizer over half-width symbols only.
    struct AsciiModel;

    const VOCAB: [&str; 4] = ["A", "B", "1", "(!)"];

    impl LanguageModel for AsciiModel {
        fn tokenize(&self, text: &str) -> std::result::Result<Vec<TokenId>, ModelError> {
            text.split_whitespace()
                .map(|w| {
                    VOCAB
                        .iter()
                        .position(|v| *v == w)
                        .map(|i| i as TokenId)
                        .ok_or_else(|| ModelError::Inference(format!("unknown word {w}").into()))
                })
                .collect()
        }

        fn forward(&self, tokens: &[TokenId]) -> std::result::Result<LogProbs, ModelError> {
            let row: Vec<f32> = [0.4f32, 0.3, 0.2, 0.1].iter().map(|p| p.ln()).collect();
            LogProbs::from_rows(VOCAB.len(), row.repeat(tokens.len()))
        }

        fn vocab_size(&self) -> usize {
            VOCAB.len()
        }
    }

    #[test]
    fn test_exact_multiple() {
        let tokens: Vec<TokenId> = (0..8).collect();
        let windows = TokenWindows::new(&tokens, 4).unwrap();
        assert_eq!(windows.len(), 2);
        let collected: Vec<&[TokenId]> = windows.iter().collect();
        assert_eq!(collected, vec![&[0u32, 1, 2, 3][..], &[4u32, 5, 6, 7][..]]);
    }

    #[test]
    fn test_final_window_shorter() {
        let tokens: Vec<TokenId> = (0..10).collect();
        let windows = TokenWindows::new(&tokens, 4).unwrap();
        let lens: Vec<usize> = windows.iter().map(|w| w.len()).collect();
        assert_eq!(lens, vec![4, 4, 2]);
        assert_eq!(windows.len(), 3);
    }

    #[test]
    fn test_concatenation_reproduces_tokens() {
        let tokens: Vec<TokenId> = vec![7, 3, 3, 9, 1, 0, 42, 5, 5, 5, 11];
        for max_len in 1..=tokens.len() + 2 {
            let windows = TokenWindows::new(&tokens, max_len).unwrap();
            let rebuilt: Vec<TokenId> = windows.iter().flatten().copied().collect();
            assert_eq!(rebuilt, tokens, "max_len={}", max_len);
            assert!(windows.iter().all(|w| !w.is_empty() && w.len() <= max_len));
        }
    }

    #[test]
    fn test_restartable() {
        let tokens: Vec<TokenId> = (0..5).collect();
        let windows = TokenWindows::new(&tokens, 2).unwrap();
        let first: Vec<_> = windows.iter().collect();
        let second: Vec<_> = (&windows).into_iter().collect();
        let third: Vec<_> = windows.into_iter().collect();
        assert_eq!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_empty_tokens_yield_no_windows() {
        let windows = TokenWindows::new(&[], 4).unwrap();
        assert!(windows.is_empty());
        assert_eq!(windows.len(), 0);
        assert_eq!(windows.iter().count(), 0);
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(matches!(
            TokenWindows::new(&[1, 2], 0),
            Err(PerplexityError::InvalidWindowSize)
        ));
    }

    #[test]
    fn test_nfkc_folds_full_width_before_tokenizing() {
        let model = AsciiModel;
        let ascii = tokenize_text(&model, "A B 1 (!)", false).unwrap();
        let folded = tokenize_text(&model, "Ａ Ｂ １ （！）", true).unwrap();
        assert_eq!(folded, ascii);
        // without normalization the full-width forms are unknown to the tokenizer
        assert!(tokenize_text(&model, "Ａ Ｂ １ （！）", false).is_err());
    }

    #[test]
    fn test_nfkc_scoring_matches_ascii_record() {
        let model = AsciiModel;
        let scorer = PerplexityScorer::new(
            &model,
            ScorerConfig {
                window_size: 2,
                normalize_nfkc: true,
            },
        )
        .unwrap();
        let ascii = scorer.score_text(0, "A B 1 (!) A").unwrap();
        let full_width = scorer.score_text(0, "Ａ Ｂ １ （！） Ａ").unwrap();
        assert_eq!(full_width, ascii);
        assert_eq!(ascii.window_scores.len(), 2);
    }
}
