pub mod aggregate;
pub mod bootstrap;
pub mod config;
pub mod corpus;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod scorer;
pub mod text;
pub mod window;

pub use aggregate::{FilterPolicy, PerplexityTable, TextScore, is_flagged};
pub use bootstrap::{BootstrapConfig, BootstrapEstimator, ConfidenceInterval, SamplingPolicy};
pub use config::Settings;
pub use corpus::{Corpus, CorpusError, Split};
pub use error::PerplexityError;
pub use model::{DeviceConfig, LanguageModel, LlamaCppModel, LogProbs, ModelSource, TokenId};
pub use pipeline::{FilterReport, RunConfig, TextReport, evaluate, run};
pub use scorer::{PerplexityScorer, ScoreRecord, ScorerConfig};
pub use text::normalize_nfkc;
pub use window::{TokenWindows, tokenize_text};
