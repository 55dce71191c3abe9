//! The capability set the scorer needs from a causal language model

use super::error::{ModelError, Result};

/// Vocabulary index of a token.
pub type TokenId = u32;

/// A causal (left-to-right) language model.
///
/// Implementations must be evaluation-only: `forward` may not mutate
/// anything observable, so one model can be shared across scorers and
/// threads.
pub trait LanguageModel {
    /// Tokenize text into vocabulary ids, without adding special tokens.
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>>;

    /// Run one forward pass and return a log-probability distribution for
    /// every input position. Row `i` is the distribution over the token
    /// that follows `tokens[i]`.
    fn forward(&self, tokens: &[TokenId]) -> Result<LogProbs>;

    /// Number of entries in each log-probability row.
    fn vocab_size(&self) -> usize;
}

impl<M: LanguageModel + ?Sized> LanguageModel for &M {
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>> {
        (**self).tokenize(text)
    }

    fn forward(&self, tokens: &[TokenId]) -> Result<LogProbs> {
        (**self).forward(tokens)
    }

    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }
}

/// Row-major `[positions x vocab]` matrix of natural-log probabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct LogProbs {
    vocab_size: usize,
    data: Vec<f32>,
}

impl LogProbs {
    /// Wrap already-normalized log-probability rows.
    pub fn from_rows(vocab_size: usize, data: Vec<f32>) -> Result<Self> {
        if vocab_size == 0 {
            return Err(ModelError::MalformedOutput(
                "vocabulary size is zero".to_string(),
            ));
        }
        if data.len() % vocab_size != 0 {
            return Err(ModelError::MalformedOutput(format!(
                "{} values is not a whole number of rows of {}",
                data.len(),
                vocab_size
            )));
        }
        Ok(Self { vocab_size, data })
    }

    /// Normalize raw logits row by row with log-softmax.
    pub fn from_logits(vocab_size: usize, mut logits: Vec<f32>) -> Result<Self> {
        if vocab_size > 0 {
            for row in logits.chunks_mut(vocab_size) {
                log_softmax_in_place(row);
            }
        }
        Self::from_rows(vocab_size, logits)
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    /// Number of positions (rows).
    pub fn n_positions(&self) -> usize {
        self.data.len() / self.vocab_size
    }

    /// Distribution predicted after the token at `position`.
    pub fn row(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.vocab_size)?;
        self.data.get(start..start + self.vocab_size)
    }

    /// Log-probability of `token` following `position`.
    pub fn get(&self, position: usize, token: TokenId) -> Option<f32> {
        self.row(position)?.get(token as usize).copied()
    }
}

/// Replace logits with log-probabilities: `x - logsumexp(row)`.
pub fn log_softmax_in_place(row: &mut [f32]) {
    let max_logit = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let log_sum_exp: f32 = row
        .iter()
        .map(|&x| (x - max_logit).exp())
        .sum::<f32>()
        .ln()
        + max_logit;
    for x in row.iter_mut() {
        *x -= log_sum_exp;
    }
}
