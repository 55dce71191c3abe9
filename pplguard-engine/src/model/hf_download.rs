//! HuggingFace model download utilities
//!
//! Downloads GGUF weights and tokenizers from HuggingFace Hub and caches them
//! locally. Model definitions come from `models.toml` via [`super::model_config`].

use super::error::{ModelError, Result};
use super::model_config::{ModelFamily, VariantConfig};
use hf_hub::{Repo, RepoType, api::sync::ApiBuilder};
use std::path::PathBuf;

/// Download a file from a HuggingFace model repository.
///
/// Returns the local path. Files are cached in the HuggingFace cache
/// directory (~/.cache/huggingface/hub/).
///
/// # Environment Variables
/// * `HF_TOKEN` - HuggingFace API token (required for private repositories)
pub fn download_file(repo_id: &str, filename: &str) -> Result<PathBuf> {
    let mut builder = ApiBuilder::new();
    if let Ok(token) = std::env::var("HF_TOKEN") {
        builder = builder.with_token(Some(token));
    }
    let api = builder
        .build()
        .map_err(|e| ModelError::Download(e.into()))?;

    let repo = api.repo(Repo::new(repo_id.to_string(), RepoType::Model));

    tracing::info!("Downloading {} from {}...", filename, repo_id);

    let path = repo
        .get(filename)
        .map_err(|e| ModelError::Download(e.into()))?;

    tracing::info!("Downloaded to {:?}", path);

    Ok(path)
}

/// Get local path for a variant, downloading if not cached.
pub fn get_variant_path(family: &ModelFamily, variant: &VariantConfig) -> Result<PathBuf> {
    download_file(&family.repo_id, &variant.filename)
}

/// Get the local path to `tokenizer.json` for a model family, downloading if necessary.
pub fn get_tokenizer_path(family: &ModelFamily) -> Result<PathBuf> {
    download_file(family.tokenizer_repo(), "tokenizer.json")
}
