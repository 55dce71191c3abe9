//! Resampled-mean confidence interval
//!
//! Each iteration draws `subsample_size` scores and records their mean; the
//! 2.5th and 97.5th percentiles of those means bound a 95% interval.
//!
//! The default draw is *without* replacement from the scored texts, a
//! subsampling estimate rather than Efron's bootstrap. Classical resampling
//! with replacement is available through [`SamplingPolicy::WithReplacement`].

use crate::error::{PerplexityError, Result};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

const LOWER_PERCENTILE: f64 = 2.5;
const UPPER_PERCENTILE: f64 = 97.5;

/// How each draw picks its values.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingPolicy {
    /// Distinct values per draw
    #[default]
    WithoutReplacement,
    /// Independent uniform picks per slot
    WithReplacement,
}

/// Bootstrap parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Values drawn per iteration
    pub subsample_size: usize,
    /// Number of resampled means
    pub iterations: usize,
    #[serde(default)]
    pub policy: SamplingPolicy,
    /// RNG seed; a fixed seed reproduces the interval exactly
    pub seed: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            subsample_size: 5,
            iterations: 100,
            policy: SamplingPolicy::WithoutReplacement,
            seed: 100,
        }
    }
}

/// A two-sided percentile interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    /// `upper - midpoint`
    pub half_width: f64,
    /// Coverage, e.g. `0.95`
    pub level: f64,
}

impl ConfidenceInterval {
    pub fn new(lower: f64, upper: f64, level: f64) -> Self {
        let midpoint = (lower + upper) / 2.0;
        Self {
            lower,
            upper,
            half_width: upper - midpoint,
            level,
        }
    }

    pub fn midpoint(&self) -> f64 {
        (self.lower + self.upper) / 2.0
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// Percentile of sorted data with linear interpolation between closest ranks.
///
/// `q` is in `[0, 100]`. Returns `None` for empty input.
pub fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = (q / 100.0).clamp(0.0, 1.0) * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

#[derive(Debug, Clone)]
pub struct BootstrapEstimator {
    config: BootstrapConfig,
}

impl BootstrapEstimator {
    pub fn new(config: BootstrapConfig) -> Result<Self> {
        if config.subsample_size == 0 {
            return Err(PerplexityError::InvalidConfig(
                "bootstrap subsample size must be at least 1".to_string(),
            ));
        }
        if config.iterations == 0 {
            return Err(PerplexityError::InvalidConfig(
                "bootstrap iterations must be at least 1".to_string(),
            ));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// The raw sample set: one mean per iteration, in draw order.
    ///
    /// Fewer values than `subsample_size` is an error under either policy.
    pub fn resample_means(&self, values: &[f64]) -> Result<Vec<f64>> {
        let required = self.config.subsample_size;
        if values.len() < required {
            return Err(PerplexityError::CorpusTooSmall {
                required,
                available: values.len(),
            });
        }

        let n = self.config.subsample_size;
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut picks = Vec::with_capacity(n);
        let mut means = Vec::with_capacity(self.config.iterations);

        for _ in 0..self.config.iterations {
            picks.clear();
            match self.config.policy {
                SamplingPolicy::WithoutReplacement => {
                    picks.extend(index::sample(&mut rng, values.len(), n).iter());
                }
                SamplingPolicy::WithReplacement => {
                    picks.extend((0..n).map(|_| rng.random_range(0..values.len())));
                }
            }
            // summed in input order so a draw's mean does not depend on pick order
            picks.sort_unstable();
            let sum: f64 = picks.iter().map(|&i| values[i]).sum();
            means.push(sum / n as f64);
        }

        Ok(means)
    }

    /// 95% percentile interval of the resampled means.
    pub fn estimate(&self, values: &[f64]) -> Result<ConfidenceInterval> {
        let mut means = self.resample_means(values)?;
        means.sort_by(f64::total_cmp);

        let (Some(lower), Some(upper)) = (
            percentile(&means, LOWER_PERCENTILE),
            percentile(&means, UPPER_PERCENTILE),
        ) else {
            return Err(PerplexityError::InvalidConfig(
                "bootstrap produced no samples".to_string(),
            ));
        };

        tracing::debug!(
            "bootstrap: {} draws of {} ({:?}) -> [{:.4}, {:.4}]",
            self.config.iterations,
            self.config.subsample_size,
            self.config.policy,
            lower,
            upper
        );

        Ok(ConfidenceInterval::new(
            lower,
            upper,
            (UPPER_PERCENTILE - LOWER_PERCENTILE) / 100.0,
        ))
    }
}
