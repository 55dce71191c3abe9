//! Benchmarks for perplexity scoring throughput
//!
//! Run with: cargo bench
//!
//! Note: These benchmarks require downloading models from HuggingFace.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use pplguard_engine::{
    DeviceConfig, LanguageModel, ModelSource, PerplexityScorer, ScorerConfig,
};

const SAMPLE: &str = "The quick brown fox jumps over the lazy dog while the \
    committee reviews the quarterly report on regional rainfall.";

fn bench_scoring(c: &mut Criterion) {
    let model = match ModelSource::resolve(None, None, None)
        .ok()
        .and_then(|source| source.load(&DeviceConfig::default()).ok())
    {
        Some(m) => m,
        None => {
            eprintln!("Skipping scoring benchmarks: model not available");
            return;
        }
    };

    let mut group = c.benchmark_group("scoring");
    group.sample_size(10);
    group.measurement_time(std::time::Duration::from_secs(30));

    let tokens = model.tokenize(SAMPLE).unwrap();

    group.bench_function("forward_single_window", |b| {
        b.iter(|| model.forward(black_box(&tokens)).unwrap())
    });

    for window_size in [8, 32, 128] {
        let scorer = PerplexityScorer::new(
            &model,
            ScorerConfig {
                window_size,
                normalize_nfkc: false,
            },
        )
        .unwrap();
        group.bench_function(format!("score_text_w{}", window_size), |b| {
            b.iter(|| scorer.score_text(0, black_box(SAMPLE)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_scoring);
criterion_main!(benches);
