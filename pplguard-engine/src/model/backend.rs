//! Model resolution: which weights to load and where to run them

use super::error::{ModelError, Result};
use super::hf_download::{get_tokenizer_path, get_variant_path};
use super::llamacpp::LlamaCppModel;
use super::model_config::registry;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Explicit device and runtime placement for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Layers offloaded to the GPU (0 = CPU only)
    pub n_gpu_layers: u32,
    /// Number of threads for llama.cpp inference (0 = llama.cpp default)
    pub n_threads: u32,
    /// Context size; must hold the largest scoring window
    pub n_ctx: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            n_gpu_layers: 0,
            n_threads: 0,
            n_ctx: 512,
        }
    }
}

/// Where the model weights come from, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// A variant listed in `models.toml`, fetched from HuggingFace
    Registry { variant_id: String },
    /// A local GGUF file with its `tokenizer.json`
    Gguf { gguf: PathBuf, tokenizer: PathBuf },
}

impl ModelSource {
    /// Resolve CLI/config inputs to a source.
    ///
    /// A GGUF path wins over a variant id and requires a tokenizer path.
    /// Without either, the registry default is used.
    pub fn resolve(
        variant_id: Option<&str>,
        gguf: Option<PathBuf>,
        tokenizer: Option<PathBuf>,
    ) -> Result<Self> {
        if let Some(gguf) = gguf {
            let tokenizer = tokenizer.ok_or_else(|| {
                ModelError::ModelLoad("a tokenizer.json path is required with a GGUF file".into())
            })?;
            return Ok(Self::Gguf { gguf, tokenizer });
        }

        let reg = registry();
        let (_, variant) = match variant_id {
            Some(id) => reg
                .find_variant(id)
                .ok_or_else(|| ModelError::UnknownVariant(id.to_string()))?,
            None => reg
                .default_variant()
                .ok_or_else(|| ModelError::UnknownVariant(reg.default_model.clone()))?,
        };
        Ok(Self::Registry {
            variant_id: variant.id.clone(),
        })
    }

    /// Name shown in logs and reports (variant id, or the GGUF file name)
    pub fn display_name(&self) -> String {
        match self {
            Self::Registry { variant_id } => variant_id.clone(),
            Self::Gguf { gguf, .. } => gguf
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "custom".to_string()),
        }
    }

    /// Fetch (if needed) and load the model onto the configured device.
    pub fn load(&self, device: &DeviceConfig) -> Result<LlamaCppModel> {
        match self {
            Self::Registry { variant_id } => {
                let (family, variant) = registry()
                    .find_variant(variant_id)
                    .ok_or_else(|| ModelError::UnknownVariant(variant_id.clone()))?;
                let path = get_variant_path(family, variant)?;
                let tokenizer = get_tokenizer_path(family)?;
                tracing::info!("Loading {} ({})", variant.display_name, path.display());
                LlamaCppModel::from_file(&path, &tokenizer, device)
            }
            Self::Gguf { gguf, tokenizer } => {
                tracing::info!("Loading GGUF from {}", gguf.display());
                LlamaCppModel::from_file(gguf, tokenizer, device)
            }
        }
    }
}
