//! Perplexity filter for few-shot training data
//!
//! Scores every text of a corpus with a causal language model, flags texts
//! whose perplexity is above the threshold, and reports a bootstrap
//! confidence interval on the corpus mean perplexity.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pplguard_engine::corpus::DEFAULT_FIELD;
use pplguard_engine::model::registry;
use pplguard_engine::{
    Corpus, FilterReport, ModelSource, PerplexityScorer, RunConfig, SamplingPolicy, Settings,
    Split, evaluate,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Flag high-perplexity texts in a few-shot training corpus.
///
/// Settings come from the user config file (or --config), merged over the
/// built-in defaults; command-line flags override both.
#[derive(Parser)]
#[command(name = "ppl-filter")]
#[command(about = "Flag high-perplexity texts in a few-shot training corpus")]
struct Cli {
    /// Corpus file: .json array, .jsonl, or plain text (one text per line)
    #[arg(required_unless_present_any = ["task", "list_models"])]
    corpus: Option<PathBuf>,

    /// Record field holding the text in JSON corpora
    #[arg(long, default_value = DEFAULT_FIELD)]
    field: String,

    /// Comma-separated task names to load from --data-dir instead of a corpus file
    #[arg(long, requires = "data_dir", conflicts_with = "corpus")]
    task: Option<String>,

    /// Root of the task directory layout ({task}/{task}_{k}_{seed}_{split}.jsonl)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Examples per task in the file name
    #[arg(long, default_value_t = 16384)]
    k: usize,

    /// Data seed in the file name
    #[arg(long, default_value_t = 100)]
    data_seed: u64,

    /// Dataset split (train, dev, test)
    #[arg(long, default_value = "train")]
    split: Split,

    /// Model variant id (see --list-models)
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

    /// Perplexity strictly above which a text is flagged
    #[arg(long)]
    threshold: Option<f64>,

    /// Also flag texts with any window perplexity above this
    #[arg(long)]
    window_threshold: Option<f64>,

    /// NFKC-normalize texts before tokenization
    #[arg(long)]
    nfkc: bool,

    /// Texts drawn per bootstrap iteration
    #[arg(long)]
    subsample_size: Option<usize>,

    /// Number of bootstrap iterations
    #[arg(long)]
    iterations: Option<usize>,

    /// Resample with replacement instead of without
    #[arg(long)]
    with_replacement: bool,

    /// Bootstrap RNG seed
    #[arg(long)]
    seed: Option<u64>,

    /// Context window size
    #[arg(long)]
    n_ctx: Option<u32>,

    /// Layers offloaded to the GPU (0 = CPU only)
    #[arg(long)]
    n_gpu_layers: Option<u32>,

    /// llama.cpp threads per forward pass (0 = llama.cpp default)
    #[arg(long)]
    n_threads: Option<u32>,

    /// Texts scored in parallel (default: 1, sequential)
    #[arg(long)]
    threads: Option<usize>,

    /// Save the full report to JSON
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// List model variant ids and exit
    #[arg(long)]
    list_models: bool,

    /// Show only the summary
    #[arg(long)]
    quiet: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Command-line flags take precedence over file settings.
    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(v) = self.window_size {
            settings.scoring.window_size = v;
        }
        if let Some(v) = self.threshold {
            settings.scoring.threshold = v;
        }
        if self.window_threshold.is_some() {
            settings.scoring.window_threshold = self.window_threshold;
        }
        if self.nfkc {
            settings.scoring.normalize_nfkc = true;
        }
        if let Some(v) = self.subsample_size {
            settings.bootstrap.subsample_size = v;
        }
        if let Some(v) = self.iterations {
            settings.bootstrap.iterations = v;
        }
        if self.with_replacement {
            settings.bootstrap.policy = SamplingPolicy::WithReplacement;
        }
        if let Some(v) = self.seed {
            settings.bootstrap.seed = v;
        }
        if let Some(v) = self.n_ctx {
            settings.device.n_ctx = v;
        }
        if let Some(v) = self.n_gpu_layers {
            settings.device.n_gpu_layers = v;
        }
        if let Some(v) = self.n_threads {
            settings.device.n_threads = v;
        }
        if self.model.is_some() {
            settings.model.variant = self.model.clone();
        }
    }

    fn load_corpus(&self) -> Result<Corpus> {
        if let (Some(tasks), Some(data_dir)) = (&self.task, &self.data_dir) {
            eprintln!(
                "Loading {} split of {} from {}...",
                self.split,
                tasks,
                data_dir.display()
            );
            return Corpus::load_task(data_dir, tasks, self.k, self.data_seed, self.split, &self.field)
                .with_context(|| format!("Failed to load task data for {}", tasks));
        }
        let path = self
            .corpus
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("a corpus file or --task is required"))?;
        eprintln!("Loading corpus from {}...", path.display());
        Corpus::load(path, &self.field)
            .with_context(|| format!("Failed to load corpus from {}", path.display()))
    }
}

fn init_tracing(verbose: bool) {
    // Default: info level, with --verbose: debug level
    let default_filter = if verbose {
        "ppl_filter=debug,pplguard_engine=debug"
    } else {
        "ppl_filter=info,pplguard_engine=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn list_models() {
    let reg = registry();
    for id in reg.all_variant_ids() {
        let Some((family, variant)) = reg.find_variant(id) else {
            continue;
        };
        let marker = if id == reg.default_model { " (default)" } else { "" };
        println!(
            "{:<20} {} [{}]{}",
            id, variant.display_name, family.repo_id, marker
        );
    }
}

/// Shorten a text to `max_chars` characters for one-line display.
fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.replace('\n', " ");
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.replace('\n', " "))
}

fn print_report(report: &FilterReport, quiet: bool) {
    if !quiet {
        for text in &report.texts {
            let status = if text.flagged { "HIGH" } else { "ok" };
            match (text.perplexity, text.log_perplexity) {
                (Some(ppl), Some(log_ppl)) => println!(
                    "[{}] {:<4} ppl={:>10.4} log_ppl={:>7.4} windows={} | {}",
                    text.index,
                    status,
                    ppl,
                    log_ppl,
                    text.n_windows,
                    preview(&text.text, 60)
                ),
                _ => println!("[{}] (empty) | {}", text.index, preview(&text.text, 60)),
            }
        }
    }

    let ci = &report.confidence_interval;
    println!();
    println!("{}", "=".repeat(50));
    println!("Perplexity Filter Results ({})", report.model);
    println!("{}", "=".repeat(50));
    println!("Texts:              {}", report.n_texts);
    println!("Scored:             {}", report.n_scored);
    println!(
        "Flagged (> {}):    {}",
        report.threshold, report.n_flagged
    );
    println!("{}", "-".repeat(50));
    println!("Average perplexity: {:.4}", report.average_perplexity);
    println!(
        "{:.0}% interval:       [{:.4}, {:.4}]",
        ci.level * 100.0,
        ci.lower,
        ci.upper
    );
    println!("Half-width:         {:.4}", ci.half_width);
    println!(
        "Bootstrap:          {} x {} ({:?}, seed {})",
        report.bootstrap.iterations,
        report.bootstrap.subsample_size,
        report.bootstrap.policy,
        report.bootstrap.seed
    );
    println!("{}", "=".repeat(50));
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.list_models {
        list_models();
        return Ok(());
    }

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::load().context("Failed to load settings")?,
    };
    cli.apply_overrides(&mut settings);
    tracing::debug!("Effective settings: {:?}", settings);

    if settings.scoring.window_size > settings.device.n_ctx as usize {
        anyhow::bail!(
            "window size {} does not fit in n_ctx {}",
            settings.scoring.window_size,
            settings.device.n_ctx
        );
    }

    let source = ModelSource::resolve(
        settings.model.variant.as_deref(),
        cli.gguf.clone(),
        cli.tokenizer_json.clone(),
    )?;
    let corpus = cli.load_corpus()?;
    eprintln!("Loaded {} texts", corpus.len());

    let model = source
        .load(&settings.device)
        .with_context(|| format!("Failed to load model {}", source.display_name()))?;

    let config = RunConfig::from(&settings);
    let scorer = PerplexityScorer::new(&model, config.scoring)?;

    let pb = ProgressBar::new(corpus.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA: {eta})")?
            .progress_chars("=>-"),
    );

    let threads = cli.threads.unwrap_or(1).max(1);
    let records = if threads > 1 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok(); // ignore error if already initialized
        eprintln!("Scoring {} texts (threads={})...", corpus.len(), threads);
        scorer.score_corpus_parallel(&corpus, |_| pb.inc(1))?
    } else {
        eprintln!("Scoring {} texts...", corpus.len());
        scorer.score_corpus_with(&corpus, |_| pb.inc(1))?
    };
    pb.finish_with_message("done");

    let report = evaluate(&corpus, records, &config, &source.display_name())?;
    tracing::info!(
        "Flagged indices: {:?}",
        report.flagged_indices().collect::<Vec<_>>()
    );
    print_report(&report, cli.quiet);

    if let Some(output_path) = &cli.output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(output_path, &json)
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        eprintln!("Detailed results saved to {}", output_path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("line\nbreak", 20), "line break");
        assert_eq!(preview("abcdefghij", 4), "abcd...");
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from([
            "ppl-filter",
            "corpus.json",
            "--threshold",
            "50",
            "--with-replacement",
            "--window-size",
            "4",
            "--n-gpu-layers",
            "12",
        ]);
        let mut settings = Settings::default();
        cli.apply_overrides(&mut settings);
        assert_eq!(settings.scoring.threshold, 50.0);
        assert_eq!(settings.scoring.window_size, 4);
        assert_eq!(settings.bootstrap.policy, SamplingPolicy::WithReplacement);
        assert_eq!(settings.device.n_gpu_layers, 12);
        // untouched values keep their defaults
        assert_eq!(settings.bootstrap.iterations, 100);
    }

    #[test]
    fn test_task_conflicts_with_corpus() {
        let result = Cli::try_parse_from([
            "ppl-filter",
            "corpus.json",
            "--task",
            "glue-cola",
            "--data-dir",
            "/data",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_corpus_or_task_required() {
        assert!(Cli::try_parse_from(["ppl-filter"]).is_err());
        assert!(Cli::try_parse_from(["ppl-filter", "--list-models"]).is_ok());
        let cli = Cli::try_parse_from([
            "ppl-filter",
            "--task",
            "glue-cola,emo",
            "--data-dir",
            "/data",
            "--split",
            "dev",
        ])
        .unwrap();
        assert_eq!(cli.split, Split::Dev);
    }
}
