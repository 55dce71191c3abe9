//! Per-window log-perplexity from a causal language model
//!
//! Each window gets its own forward pass. Position `i` of the output predicts
//! token `i + 1`, so a window of `n` tokens yields `n - 1` next-token
//! negative log-likelihoods; their mean (natural log) is the window's
//! log-perplexity.

use crate::corpus::Corpus;
use crate::error::{PerplexityError, Result};
use crate::model::{LanguageModel, LogProbs, TokenId};
use crate::window::{TokenWindows, tokenize_text};
use rayon::prelude::*;

/// Per-window log-perplexities of one corpus text.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRecord {
    /// Position of the text in the corpus
    pub index: usize,
    /// One entry per window with at least two tokens, in window order
    pub window_scores: Vec<f64>,
}

impl ScoreRecord {
    /// True when the text produced no scorable window (e.g. empty text).
    pub fn is_empty(&self) -> bool {
        self.window_scores.is_empty()
    }
}

/// Scoring parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScorerConfig {
    /// Maximum tokens per window
    pub window_size: usize,
    /// NFKC-normalize texts before tokenization
    pub normalize_nfkc: bool,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            window_size: 128,
            normalize_nfkc: false,
        }
    }
}

/// Mean next-token negative log-likelihood of `window` under `log_probs`.
///
/// Returns `None` for windows shorter than two tokens. Every row consulted
/// must be finite throughout, not just at the target token; nothing is clipped.
pub fn window_log_perplexity(window: &[TokenId], log_probs: &LogProbs) -> Result<Option<f64>> {
    if window.len() < 2 {
        return Ok(None);
    }
    if log_probs.n_positions() != window.len() {
        return Err(PerplexityError::PositionMismatch {
            expected: window.len(),
            got: log_probs.n_positions(),
        });
    }

    let mut total_nll = 0.0f64;
    for (position, &target) in window[1..].iter().enumerate() {
        let row = log_probs
            .row(position)
            .ok_or(PerplexityError::PositionMismatch {
                expected: window.len(),
                got: log_probs.n_positions(),
            })?;
        if let Some(&value) = row.iter().find(|x| !x.is_finite()) {
            return Err(PerplexityError::NonFiniteLogProb { position, value });
        }
        let log_prob =
            row.get(target as usize)
                .copied()
                .ok_or(PerplexityError::TokenOutOfVocab {
                    token: target,
                    position: position + 1,
                    vocab_size: log_probs.vocab_size(),
                })?;
        total_nll -= f64::from(log_prob);
    }

    Ok(Some(total_nll / (window.len() - 1) as f64))
}

/// Scores texts window by window against a shared, read-only model.
pub struct PerplexityScorer<'m, M: ?Sized> {
    model: &'m M,
    config: ScorerConfig,
}

impl<'m, M: LanguageModel + ?Sized> PerplexityScorer<'m, M> {
    pub fn new(model: &'m M, config: ScorerConfig) -> Result<Self> {
        if config.window_size == 0 {
            return Err(PerplexityError::InvalidWindowSize);
        }
        Ok(Self { model, config })
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Log-perplexity of a single window (one forward pass).
    pub fn score_window(&self, window: &[TokenId]) -> Result<Option<f64>> {
        if window.len() < 2 {
            return Ok(None);
        }
        let log_probs = self.model.forward(window)?;
        window_log_perplexity(window, &log_probs)
    }

    /// Score already-tokenized text.
    pub fn score_tokens(&self, index: usize, tokens: &[TokenId]) -> Result<ScoreRecord> {
        let windows = TokenWindows::new(tokens, self.config.window_size)?;
        let mut window_scores = Vec::with_capacity(windows.len());
        for window in &windows {
            if let Some(score) = self.score_window(window)? {
                window_scores.push(score);
            }
        }
        Ok(ScoreRecord {
            index,
            window_scores,
        })
    }

    /// Tokenize and score one corpus text.
    pub fn score_text(&self, index: usize, text: &str) -> Result<ScoreRecord> {
        let scored = tokenize_text(self.model, text, self.config.normalize_nfkc)
            .and_then(|tokens| self.score_tokens(index, &tokens));
        match scored {
            Ok(record) => {
                tracing::debug!(
                    "text {}: {} scored window(s)",
                    index,
                    record.window_scores.len()
                );
                Ok(record)
            }
            Err(e) => Err(PerplexityError::InText {
                index,
                source: Box::new(e),
            }),
        }
    }

    /// Score every text sequentially, in corpus order.
    pub fn score_corpus(&self, corpus: &Corpus) -> Result<Vec<ScoreRecord>> {
        self.score_corpus_with(corpus, |_| {})
    }

    /// Like [`Self::score_corpus`], calling `on_scored` after each text.
    pub fn score_corpus_with<F>(&self, corpus: &Corpus, mut on_scored: F) -> Result<Vec<ScoreRecord>>
    where
        F: FnMut(&ScoreRecord),
    {
        let mut records = Vec::with_capacity(corpus.len());
        for (index, text) in corpus.iter().enumerate() {
            let record = self.score_text(index, text)?;
            on_scored(&record);
            records.push(record);
        }
        Ok(records)
    }

    /// Score texts concurrently on the current rayon pool.
    ///
    /// Records come back in corpus order and are identical to the
    /// sequential path.
    pub fn score_corpus_parallel<F>(&self, corpus: &Corpus, on_scored: F) -> Result<Vec<ScoreRecord>>
    where
        M: Sync,
        F: Fn(&ScoreRecord) + Sync,
    {
        corpus
            .texts()
            .par_iter()
            .enumerate()
            .map(|(index, text)| -> Result<ScoreRecord> {
                let record = self.score_text(index, text)?;
                on_scored(&record);
                Ok(record)
            })
            .collect()
    }
}
