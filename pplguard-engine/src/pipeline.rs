//! End-to-end filtering run and its report

use crate::aggregate::{FilterPolicy, PerplexityTable};
use crate::bootstrap::{BootstrapConfig, BootstrapEstimator, ConfidenceInterval};
use crate::config::Settings;
use crate::corpus::Corpus;
use crate::error::{PerplexityError, Result};
use crate::model::LanguageModel;
use crate::scorer::{PerplexityScorer, ScoreRecord, ScorerConfig};
use serde::Serialize;

/// Everything a run needs besides the model and corpus.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunConfig {
    pub scoring: ScorerConfig,
    pub filter: FilterPolicy,
    pub bootstrap: BootstrapConfig,
}

impl From<&Settings> for RunConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            scoring: settings.scorer_config(),
            filter: settings.filter_policy(),
            bootstrap: settings.bootstrap,
        }
    }
}

/// Per-text line of the report. Scores are `None` for texts with nothing to score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextReport {
    pub index: usize,
    pub text: String,
    pub log_perplexity: Option<f64>,
    pub perplexity: Option<f64>,
    pub n_windows: usize,
    pub flagged: bool,
}

/// Outcome of a filtering run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterReport {
    pub model: String,
    pub window_size: usize,
    pub threshold: f64,
    pub window_threshold: Option<f64>,
    pub n_texts: usize,
    pub n_scored: usize,
    pub n_flagged: usize,
    /// Unweighted mean perplexity over scored texts
    pub average_perplexity: f64,
    pub confidence_interval: ConfidenceInterval,
    pub bootstrap: BootstrapConfig,
    pub texts: Vec<TextReport>,
}

impl FilterReport {
    pub fn flagged_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.texts.iter().filter(|t| t.flagged).map(|t| t.index)
    }
}

/// Aggregate already-scored records, apply the filter, and run the bootstrap.
pub fn evaluate(
    corpus: &Corpus,
    records: Vec<ScoreRecord>,
    config: &RunConfig,
    model_name: &str,
) -> Result<FilterReport> {
    if records.len() != corpus.len() {
        return Err(PerplexityError::RecordCountMismatch {
            records: records.len(),
            texts: corpus.len(),
        });
    }
    let table = PerplexityTable::from_records(records)?;
    let perplexities = table.perplexities();

    let estimator = BootstrapEstimator::new(config.bootstrap)?;
    let confidence_interval = estimator.estimate(&perplexities)?;
    let average_perplexity =
        table
            .corpus_average()
            .ok_or(PerplexityError::CorpusTooSmall {
                required: 1,
                available: 0,
            })?;

    let texts: Vec<TextReport> = corpus
        .iter()
        .zip(table.iter())
        .enumerate()
        .map(|(index, (text, score))| TextReport {
            index,
            text: text.to_string(),
            log_perplexity: score.map(|s| s.log_perplexity),
            perplexity: score.map(|s| s.perplexity),
            n_windows: score.map_or(0, |s| s.n_windows),
            flagged: score.is_some_and(|s| config.filter.is_flagged(s)),
        })
        .collect();
    let n_flagged = texts.iter().filter(|t| t.flagged).count();

    tracing::info!(
        "{} of {} scored texts flagged, average perplexity {:.4}",
        n_flagged,
        table.n_scored(),
        average_perplexity
    );

    Ok(FilterReport {
        model: model_name.to_string(),
        window_size: config.scoring.window_size,
        threshold: config.filter.threshold,
        window_threshold: config.filter.window_threshold,
        n_texts: corpus.len(),
        n_scored: table.n_scored(),
        n_flagged,
        average_perplexity,
        confidence_interval,
        bootstrap: config.bootstrap,
        texts,
    })
}

/// Score the corpus sequentially and evaluate it.
pub fn run<M: LanguageModel + ?Sized>(
    model: &M,
    corpus: &Corpus,
    config: &RunConfig,
    model_name: &str,
) -> Result<FilterReport> {
    let scorer = PerplexityScorer::new(model, config.scoring)?;
    let records = scorer.score_corpus(corpus)?;
    evaluate(corpus, records, config, model_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, perplexity: f64) -> ScoreRecord {
        ScoreRecord {
            index,
            window_scores: vec![perplexity.ln()],
        }
    }

    fn corpus(n: usize) -> Corpus {
        Corpus::from_texts((0..n).map(|i| format!("text {i}")).collect())
    }

    fn run_config(threshold: f64) -> RunConfig {
        RunConfig {
            filter: FilterPolicy {
                threshold,
                window_threshold: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_evaluate_flags_and_averages() {
        let records = vec![
            record(0, 10.0),
            record(1, 20.0),
            record(2, 30.0),
            record(3, 40.0),
            record(4, 250.0),
        ];
        let report = evaluate(&corpus(5), records, &run_config(100.0), "toy").unwrap();
        assert_eq!(report.n_texts, 5);
        assert_eq!(report.n_scored, 5);
        assert_eq!(report.n_flagged, 1);
        assert_eq!(report.flagged_indices().collect::<Vec<_>>(), vec![4]);
        assert!((report.average_perplexity - 70.0).abs() < 1e-9);
        // five texts, subsample of five: every draw is the whole corpus
        assert!((report.confidence_interval.lower - 70.0).abs() < 1e-9);
        assert_eq!(report.confidence_interval.half_width, 0.0);
    }

    #[test]
    fn test_empty_text_reported_as_unscored() {
        let mut records: Vec<ScoreRecord> = (0..5).map(|i| record(i, 5.0)).collect();
        records.push(ScoreRecord {
            index: 5,
            window_scores: Vec::new(),
        });
        let report = evaluate(&corpus(6), records, &run_config(1.0), "toy").unwrap();
        assert_eq!(report.n_scored, 5);
        let empty = &report.texts[5];
        assert_eq!(empty.perplexity, None);
        assert!(!empty.flagged);
        assert_eq!(report.n_flagged, 5);
    }

    #[test]
    fn test_too_few_scored_texts_is_fatal() {
        let records = vec![record(0, 3.0), record(1, 4.0)];
        let err = evaluate(&corpus(2), records, &run_config(100.0), "toy").unwrap_err();
        assert!(matches!(
            err,
            PerplexityError::CorpusTooSmall {
                required: 5,
                available: 2
            }
        ));
    }

    #[test]
    fn test_record_count_must_match_corpus() {
        let records = vec![record(0, 3.0)];
        let err = evaluate(&corpus(2), records, &run_config(100.0), "toy").unwrap_err();
        assert!(matches!(
            err,
            PerplexityError::RecordCountMismatch {
                records: 1,
                texts: 2
            }
        ));
    }

    #[test]
    fn test_report_serializes_null_scores() {
        let mut records: Vec<ScoreRecord> = (0..5).map(|i| record(i, 5.0)).collect();
        records.push(ScoreRecord {
            index: 5,
            window_scores: Vec::new(),
        });
        let report = evaluate(&corpus(6), records, &run_config(100.0), "toy").unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["texts"][5]["perplexity"].is_null());
        assert_eq!(json["bootstrap"]["policy"], "without_replacement");
        assert_eq!(json["model"], "toy");
    }
}
