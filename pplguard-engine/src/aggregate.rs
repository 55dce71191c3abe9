//! Per-text and corpus-level perplexity, and the threshold filter
//!
//! The filtered and reported quantity is perplexity, `exp` of the mean window
//! log-perplexity. Log-perplexity is kept alongside for display.

use crate::error::{PerplexityError, Result};
use crate::scorer::ScoreRecord;
use serde::Serialize;

/// Aggregated score of one text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextScore {
    pub index: usize,
    /// Mean of the window log-perplexities (nats per token)
    pub log_perplexity: f64,
    /// `exp(log_perplexity)`
    pub perplexity: f64,
    /// Number of windows that contributed
    pub n_windows: usize,
    /// Highest single-window perplexity
    pub max_window_perplexity: f64,
}

impl TextScore {
    /// `None` when the record has no scored window.
    pub fn from_record(record: &ScoreRecord) -> Option<Self> {
        let log_perplexity = mean(&record.window_scores)?;
        let max_window = record
            .window_scores
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            index: record.index,
            log_perplexity,
            perplexity: log_perplexity.exp(),
            n_windows: record.window_scores.len(),
            max_window_perplexity: max_window.exp(),
        })
    }
}

/// Arithmetic mean, summed left to right.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Strictly-greater-than threshold test.
pub fn is_flagged(perplexity: f64, threshold: f64) -> bool {
    perplexity > threshold
}

/// When a text counts as high-perplexity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterPolicy {
    /// Per-text perplexity above which a text is flagged
    pub threshold: f64,
    /// Optional per-window perplexity limit; any window above it flags the text
    pub window_threshold: Option<f64>,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            threshold: 100.0,
            window_threshold: None,
        }
    }
}

impl FilterPolicy {
    pub fn is_flagged(&self, score: &TextScore) -> bool {
        is_flagged(score.perplexity, self.threshold)
            || self
                .window_threshold
                .is_some_and(|limit| is_flagged(score.max_window_perplexity, limit))
    }
}

/// One entry per corpus text, in corpus order. Unscored texts hold `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerplexityTable {
    entries: Vec<Option<TextScore>>,
}

impl PerplexityTable {
    /// Build the table from one record per text.
    ///
    /// Records may arrive in any order but their indices must be exactly
    /// `0..records.len()`.
    pub fn from_records(mut records: Vec<ScoreRecord>) -> Result<Self> {
        records.sort_by_key(|r| r.index);
        if let Some((expected, record)) = records
            .iter()
            .enumerate()
            .find(|(i, r)| r.index != *i)
        {
            return Err(PerplexityError::RecordMismatch {
                expected,
                found: record.index,
            });
        }
        Ok(Self {
            entries: records.iter().map(TextScore::from_record).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TextScore> {
        self.entries.get(index)?.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&TextScore>> {
        self.entries.iter().map(Option::as_ref)
    }

    /// Scored texts only, in corpus order.
    pub fn scored(&self) -> impl Iterator<Item = &TextScore> {
        self.entries.iter().flatten()
    }

    pub fn n_scored(&self) -> usize {
        self.scored().count()
    }

    /// Perplexities of scored texts, in corpus order.
    pub fn perplexities(&self) -> Vec<f64> {
        self.scored().map(|s| s.perplexity).collect()
    }

    /// Unweighted mean perplexity over scored texts.
    pub fn corpus_average(&self) -> Option<f64> {
        mean(&self.perplexities())
    }

    /// Indices of texts the policy flags. Unscored texts are never flagged.
    pub fn flagged(&self, policy: &FilterPolicy) -> Vec<usize> {
        self.scored()
            .filter(|s| policy.is_flagged(s))
            .map(|s| s.index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, window_scores: &[f64]) -> ScoreRecord {
        ScoreRecord {
            index,
            window_scores: window_scores.to_vec(),
        }
    }

    fn score_with_perplexity(perplexity: f64) -> TextScore {
        TextScore {
            index: 0,
            log_perplexity: perplexity.ln(),
            perplexity,
            n_windows: 1,
            max_window_perplexity: perplexity,
        }
    }

    #[test]
    fn test_text_score_is_mean_of_windows() {
        let score = TextScore::from_record(&record(2, &[1.0, 2.0, 3.0])).unwrap();
        assert_eq!(score.index, 2);
        assert_eq!(score.log_perplexity, 2.0);
        assert_eq!(score.perplexity, 2.0f64.exp());
        assert_eq!(score.n_windows, 3);
        assert_eq!(score.max_window_perplexity, 3.0f64.exp());
    }

    #[test]
    fn test_empty_record_has_no_score() {
        assert!(TextScore::from_record(&record(0, &[])).is_none());
    }

    #[test]
    fn test_corpus_average_excludes_unscored() {
        let table = PerplexityTable::from_records(vec![
            record(0, &[0.0]),
            record(1, &[]),
            record(2, &[2.0f64.ln()]),
        ])
        .unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.n_scored(), 2);
        assert!(table.get(1).is_none());
        let avg = table.corpus_average().unwrap();
        assert!((avg - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_average_is_unweighted_by_length() {
        // text 0 has three windows, text 1 one window; each text counts once
        let table = PerplexityTable::from_records(vec![
            record(0, &[0.0, 0.0, 0.0]),
            record(1, &[3.0f64.ln()]),
        ])
        .unwrap();
        assert!((table.corpus_average().unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_scored_text_has_no_average() {
        let table = PerplexityTable::from_records(vec![record(0, &[])]).unwrap();
        assert_eq!(table.corpus_average(), None);
        assert!(table.flagged(&FilterPolicy::default()).is_empty());
    }

    #[test]
    fn test_records_are_reordered_by_index() {
        let table = PerplexityTable::from_records(vec![record(1, &[1.0]), record(0, &[0.5])]).unwrap();
        let indices: Vec<usize> = table.scored().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_gap_in_indices_rejected() {
        let result = PerplexityTable::from_records(vec![record(0, &[1.0]), record(2, &[1.0])]);
        assert!(matches!(
            result,
            Err(PerplexityError::RecordMismatch {
                expected: 1,
                found: 2
            })
        ));
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let result = PerplexityTable::from_records(vec![
            record(0, &[1.0]),
            record(1, &[1.0]),
            record(1, &[2.0]),
        ]);
        assert!(matches!(
            result,
            Err(PerplexityError::RecordMismatch {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn test_aggregation_is_deterministic() {
        let records = vec![
            record(0, &[0.1, 0.7, 2.9]),
            record(1, &[4.2]),
            record(2, &[1.1, 1.3]),
        ];
        let a = PerplexityTable::from_records(records.clone()).unwrap();
        let b = PerplexityTable::from_records(records).unwrap();
        assert_eq!(
            a.corpus_average().unwrap().to_bits(),
            b.corpus_average().unwrap().to_bits()
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_threshold_is_strict() {
        assert!(!is_flagged(50.0, 50.0));
        assert!(is_flagged(51.0, 50.0));
        assert!(!is_flagged(49.0, 50.0));

        let policy = FilterPolicy {
            threshold: 50.0,
            window_threshold: None,
        };
        assert!(!policy.is_flagged(&score_with_perplexity(50.0)));
        assert!(policy.is_flagged(&score_with_perplexity(51.0)));
    }

    #[test]
    fn test_window_threshold_flags_single_spike() {
        // mean perplexity stays under the text threshold, one window spikes
        let table = PerplexityTable::from_records(vec![record(0, &[0.0, 0.0, 0.0, 10.0f64.ln()])])
            .unwrap();
        let text_only = FilterPolicy {
            threshold: 5.0,
            window_threshold: None,
        };
        assert!(table.flagged(&text_only).is_empty());

        let with_window = FilterPolicy {
            threshold: 5.0,
            window_threshold: Some(8.0),
        };
        assert_eq!(table.flagged(&with_window), vec![0]);
    }
}
