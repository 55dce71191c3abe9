//! Error types for the language model boundary

/// Errors raised while resolving, loading, or running a language model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("unknown model variant: '{0}'")]
    UnknownVariant(String),

    #[error("download failed")]
    Download(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("model load failed")]
    ModelLoad(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("tokenizer load failed")]
    TokenizerLoad(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("inference failed")]
    Inference(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("{tokens} tokens do not fit in a context of {n_ctx}")]
    ContextOverflow { tokens: usize, n_ctx: u32 },

    #[error("malformed model output: {0}")]
    MalformedOutput(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
