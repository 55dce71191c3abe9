//! llama.cpp based GGUF inference
//!
//! Weights are evaluated by llama.cpp through the llama-cpp-2 crate, while
//! tokenization goes through an external HuggingFace `tokenizer.json` so that
//! token ids match the reference tokenizer exactly.

use super::backend::DeviceConfig;
use super::capability::{LanguageModel, LogProbs, TokenId, log_softmax_in_place};
use super::error::{ModelError, Result};
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::LlamaModel;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::token::LlamaToken;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::OnceLock;

/// Global llama.cpp backend (can only be initialized once)
static LLAMA_BACKEND: OnceLock<std::result::Result<LlamaBackend, String>> = OnceLock::new();

/// Get or initialize the global llama.cpp backend
fn get_backend() -> Result<&'static LlamaBackend> {
    let result = LLAMA_BACKEND.get_or_init(|| {
        let mut backend = LlamaBackend::init().map_err(|e| e.to_string())?;
        backend.void_logs();
        Ok(backend)
    });
    match result {
        Ok(backend) => Ok(backend),
        Err(e) => Err(ModelError::ModelLoad(
            format!("Failed to initialize llama.cpp backend: {}", e).into(),
        )),
    }
}

/// Convert bytes to hex display format for partial UTF-8 sequences
fn bytes_to_hex_display(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("<{:02X}>", b)).collect()
}

/// Load and configure an external HuggingFace tokenizer from a `tokenizer.json` file.
fn load_tokenizer<P: AsRef<Path>>(path: P) -> Result<tokenizers::Tokenizer> {
    let mut tokenizer =
        tokenizers::Tokenizer::from_file(path.as_ref()).map_err(ModelError::TokenizerLoad)?;
    // Windows are cut by the scorer; padding tokens would be scored as text.
    tokenizer.with_padding(None);
    tokenizer.with_truncation(None).ok();
    Ok(tokenizer)
}

/// GGUF causal language model evaluated by llama.cpp
pub struct LlamaCppModel {
    model: LlamaModel,
    /// External HuggingFace tokenizer (always required)
    external_tokenizer: tokenizers::Tokenizer,
    n_ctx: u32,
    /// Number of threads for inference (0 = use llama.cpp default)
    n_threads: u32,
}

impl LlamaCppModel {
    /// Load a GGUF model with an external tokenizer.
    ///
    /// Device placement comes from `device`: `n_gpu_layers == 0` keeps the
    /// whole model on the CPU.
    pub fn from_file<P: AsRef<Path>, T: AsRef<Path>>(
        path: P,
        tokenizer_json: T,
        device: &DeviceConfig,
    ) -> Result<Self> {
        if device.n_ctx == 0 {
            return Err(ModelError::ModelLoad("n_ctx must be non-zero".into()));
        }
        let backend = get_backend()?;

        let model_params = LlamaModelParams::default().with_n_gpu_layers(device.n_gpu_layers);

        let model = LlamaModel::load_from_file(backend, path.as_ref(), &model_params)
            .map_err(|e| ModelError::ModelLoad(e.into()))?;
        let external_tokenizer = load_tokenizer(tokenizer_json)?;

        tracing::debug!(
            "Loaded {:?} (n_vocab={}, n_ctx={}, n_gpu_layers={})",
            path.as_ref(),
            model.n_vocab(),
            device.n_ctx,
            device.n_gpu_layers
        );

        Ok(Self {
            model,
            external_tokenizer,
            n_ctx: device.n_ctx,
            n_threads: device.n_threads,
        })
    }

    /// Build LlamaContextParams sized so a full context decodes in one batch
    fn context_params(&self, n_ctx: NonZeroU32) -> LlamaContextParams {
        let params = LlamaContextParams::default()
            .with_n_ctx(Some(n_ctx))
            .with_n_batch(n_ctx.get())
            .with_n_ubatch(n_ctx.get());
        if self.n_threads > 0 {
            params
                .with_n_threads(self.n_threads as i32)
                .with_n_threads_batch(self.n_threads as i32)
        } else {
            params
        }
    }

    /// Decode a single token for display purposes.
    ///
    /// Byte-level BPE tokens that hold a partial UTF-8 sequence come back as
    /// hex like `<E3>` instead of replacement characters.
    pub fn decode_token_for_display(&self, token: TokenId) -> String {
        match self
            .model
            .token_to_piece_bytes(LlamaToken(token as i32), 32, true, None)
        {
            Ok(bytes) => match std::str::from_utf8(&bytes) {
                Ok(s) if s.chars().all(|c| !c.is_control() || c == ' ' || c == '\n') => {
                    s.to_string()
                }
                _ => bytes_to_hex_display(&bytes),
            },
            Err(_) => format!("<{}>", token),
        }
    }
}

impl LanguageModel for LlamaCppModel {
    /// Tokenize a string using the external tokenizer
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>> {
        let encoding = self
            .external_tokenizer
            .encode(text, false)
            .map_err(ModelError::Inference)?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Evaluate `tokens` in a fresh context with logits requested at every
    /// position, then log-softmax each row.
    fn forward(&self, tokens: &[TokenId]) -> Result<LogProbs> {
        let vocab_size = self.vocab_size();
        if tokens.is_empty() {
            return LogProbs::from_rows(vocab_size, Vec::new());
        }
        if tokens.len() > self.n_ctx as usize {
            return Err(ModelError::ContextOverflow {
                tokens: tokens.len(),
                n_ctx: self.n_ctx,
            });
        }
        let n_ctx = NonZeroU32::new(self.n_ctx)
            .ok_or_else(|| ModelError::Inference("n_ctx must be non-zero".into()))?;

        let backend = get_backend()?;
        let mut ctx = self
            .model
            .new_context(backend, self.context_params(n_ctx))
            .map_err(|e| ModelError::Inference(e.into()))?;

        let llama_tokens: Vec<LlamaToken> = tokens.iter().map(|&t| LlamaToken(t as i32)).collect();
        let mut batch = LlamaBatch::new(tokens.len(), 1);
        batch
            .add_sequence(&llama_tokens, 0, true)
            .map_err(|e| ModelError::Inference(e.into()))?;
        ctx.decode(&mut batch)
            .map_err(|e| ModelError::Inference(e.into()))?;

        let mut data = Vec::with_capacity(tokens.len() * vocab_size);
        for pos in 0..tokens.len() {
            let logits = ctx.get_logits_ith(pos as i32);
            if logits.len() < vocab_size {
                return Err(ModelError::MalformedOutput(format!(
                    "position {} has {} logits, expected {}",
                    pos,
                    logits.len(),
                    vocab_size
                )));
            }
            let start = data.len();
            data.extend_from_slice(&logits[..vocab_size]);
            log_softmax_in_place(&mut data[start..]);
        }

        LogProbs::from_rows(vocab_size, data)
    }

    fn vocab_size(&self) -> usize {
        self.model.n_vocab() as usize
    }
}
