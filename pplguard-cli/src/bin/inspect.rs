//! Per-window perplexity breakdown for a single text
//!
//! Usage:
//!   ppl-inspect "The quick brown fox jumps over the lazy dog"
//!   ppl-inspect --window-size 8 --model qwen2.5-1.5b-q5 "some text"

use anyhow::{Context, Result};
use clap::Parser;
use pplguard_engine::{
    ModelSource, PerplexityScorer, ScoreRecord, Settings, TextScore, TokenWindows, tokenize_text,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Settings come from the same config file as `ppl-filter`; flags override them.
#[derive(Parser)]
#[command(name = "ppl-inspect")]
#[command(about = "Show how a text splits into windows and how each window scores")]
struct Cli {
    /// Text to inspect
    text: String,

    /// Model variant id
    #[arg(long)]
    model: Option<String>,

    /// Direct GGUF file path (overrides --model)
    #[arg(long)]
    gguf: Option<PathBuf>,

    /// Path to tokenizer.json (required when using --gguf)
    #[arg(long)]
    tokenizer_json: Option<PathBuf>,

    /// Settings file (default: the user config file, if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum tokens per scoring window
    #[arg(long)]
    window_size: Option<usize>,

    /// NFKC-normalize the text before tokenization
    #[arg(long)]
    nfkc: bool,

    /// Context window size
    #[arg(long)]
    n_ctx: Option<u32>,

    /// Layers offloaded to the GPU
    #[arg(long)]
    n_gpu_layers: Option<u32>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(v) = self.window_size {
            settings.scoring.window_size = v;
        }
        if self.nfkc {
            settings.scoring.normalize_nfkc = true;
        }
        if let Some(v) = self.n_ctx {
            settings.device.n_ctx = v;
        }
        if let Some(v) = self.n_gpu_layers {
            settings.device.n_gpu_layers = v;
        }
        if self.model.is_some() {
            settings.model.variant = self.model.clone();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "ppl_inspect=debug,pplguard_engine=debug"
    } else {
        "ppl_inspect=warn,pplguard_engine=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::load().context("Failed to load settings")?,
    };
    cli.apply_overrides(&mut settings);
    let scoring = settings.scorer_config();

    let source = ModelSource::resolve(
        settings.model.variant.as_deref(),
        cli.gguf.clone(),
        cli.tokenizer_json.clone(),
    )?;
    let model = source
        .load(&settings.device)
        .with_context(|| format!("Failed to load model {}", source.display_name()))?;

    let scorer = PerplexityScorer::new(&model, scoring)?;

    let tokens = tokenize_text(&model, &cli.text, scoring.normalize_nfkc)?;
    let windows = TokenWindows::new(&tokens, scoring.window_size)?;

    println!("Model:   {}", source.display_name());
    println!("Tokens:  {}", tokens.len());
    println!("Windows: {} (size {})", windows.len(), windows.max_len());
    println!();

    let mut window_scores = Vec::with_capacity(windows.len());
    for (i, window) in windows.iter().enumerate() {
        let pieces: Vec<String> = window
            .iter()
            .map(|&t| model.decode_token_for_display(t))
            .collect();
        println!("[{}] {} token(s): |{}|", i, window.len(), pieces.join("|"));
        match scorer.score_window(window)? {
            Some(log_ppl) => {
                println!("    log_ppl={:.4} ppl={:.4}", log_ppl, log_ppl.exp());
                window_scores.push(log_ppl);
            }
            None => println!("    (too short to score)"),
        }
    }

    println!();
    let record = ScoreRecord {
        index: 0,
        window_scores,
    };
    match TextScore::from_record(&record) {
        Some(score) => {
            println!(
                "Text: log_ppl={:.4} ppl={:.4} (max window ppl {:.4})",
                score.log_perplexity, score.perplexity, score.max_window_perplexity
            );
        }
        None => println!("Text: nothing to score"),
    }

    Ok(())
}
