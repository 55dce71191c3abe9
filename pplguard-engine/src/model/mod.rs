//! Language model boundary and the llama.cpp GGUF backend

mod backend;
mod capability;
pub mod error;
pub mod hf_download;
pub mod llamacpp;
pub mod model_config;

pub use backend::{DeviceConfig, ModelSource};
pub use capability::{LanguageModel, LogProbs, TokenId, log_softmax_in_place};
pub use error::ModelError;
pub use hf_download::{download_file, get_tokenizer_path, get_variant_path};
pub use llamacpp::LlamaCppModel;
pub use model_config::{ModelFamily, ModelRegistry, VariantConfig, registry};
