//! Errors raised by scoring, aggregation, and bootstrap estimation

use crate::model::ModelError;

#[derive(Debug, thiserror::Error)]
pub enum PerplexityError {
    #[error("window size must be at least 1 token")]
    InvalidWindowSize,

    #[error("non-finite log-probability {value} in the distribution at position {position}")]
    NonFiniteLogProb { position: usize, value: f32 },

    #[error("token id {token} at position {position} is outside the vocabulary of {vocab_size}")]
    TokenOutOfVocab {
        token: u32,
        position: usize,
        vocab_size: usize,
    },

    #[error("model returned {got} positions for a window of {expected} tokens")]
    PositionMismatch { expected: usize, got: usize },

    #[error("scoring text {index} failed")]
    InText {
        index: usize,
        #[source]
        source: Box<PerplexityError>,
    },

    #[error("bootstrap needs {required} scored texts, corpus has {available}")]
    CorpusTooSmall { required: usize, available: usize },

    #[error("score record for text {found} found where text {expected} was expected")]
    RecordMismatch { expected: usize, found: usize },

    #[error("{records} score records for a corpus of {texts} texts")]
    RecordCountMismatch { records: usize, texts: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type Result<T> = std::result::Result<T, PerplexityError>;
