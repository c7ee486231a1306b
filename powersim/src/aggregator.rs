//! Power Aggregator
//!
//! Repeats Generator -> Evaluator for one grid cell and reduces the
//! replicate outcomes to an empirical power with an uncertainty band.
//! Two strategies are kept side by side because the two studies report
//! their intervals differently:
//! - [`AggregationStrategy::OuterRepetition`]: rerun the whole replicate
//!   batch `k` times, report mean and sd of the batch powers, CI
//!   `mean ± z * sd / sqrt(k)`
//! - [`AggregationStrategy::AnalyticBinomial`]: one batch, standard error
//!   `sqrt(p (1 - p) / n)`, CI `p ± z * se`

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{check_sample_size, SimError, SimResult};
use crate::evaluator::TrialEvaluator;
use crate::generator::SampleGenerator;
use crate::stats::{mean, std_dev, z_critical};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum AggregationStrategy {
    OuterRepetition { repetitions: usize },
    AnalyticBinomial,
}

impl AggregationStrategy {
    pub fn validate(&self) -> SimResult<()> {
        match self {
            AggregationStrategy::OuterRepetition { repetitions } if *repetitions < 2 => {
                Err(SimError::invalid(
                    "repetitions",
                    format!("need at least 2 outer repetitions for an sd, got {}", repetitions),
                ))
            }
            _ => Ok(()),
        }
    }

    pub fn batches(&self) -> usize {
        match self {
            AggregationStrategy::OuterRepetition { repetitions } => *repetitions,
            AggregationStrategy::AnalyticBinomial => 1,
        }
    }
}

/// What a degenerate replicate counts as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegeneratePolicy {
    /// Stays in the denominator as a trial that failed to reject
    #[default]
    CountAsNonRejection,
    /// Dropped from numerator and denominator
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregationSettings {
    /// Generator -> Evaluator cycles per batch
    pub replicates: usize,
    pub confidence_level: f64,
    pub degenerate_policy: DegeneratePolicy,
}

impl AggregationSettings {
    pub fn validate(&self) -> SimResult<()> {
        check_sample_size("replicates", self.replicates)?;
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(SimError::invalid(
                "confidence_level",
                format!("must lie in (0, 1), got {}", self.confidence_level),
            ));
        }
        Ok(())
    }
}

/// Counts from one batch of replicates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub replicates: usize,
    pub rejected: usize,
    pub degenerate: usize,
    pub out_of_range: usize,
    median_reference_sum: f64,
    median_treated_sum: f64,
    medians: usize,
}

impl BatchSummary {
    pub fn evaluable(&self) -> usize {
        self.replicates - self.degenerate
    }

    /// Rejection fraction under `policy`, `None` if nothing is left to count
    pub fn power(&self, policy: DegeneratePolicy) -> Option<f64> {
        let denominator = self.denominator(policy);
        if denominator == 0 {
            return None;
        }
        Some(self.rejected as f64 / denominator as f64)
    }

    fn denominator(&self, policy: DegeneratePolicy) -> usize {
        match policy {
            DegeneratePolicy::CountAsNonRejection => self.replicates,
            DegeneratePolicy::Exclude => self.evaluable(),
        }
    }
}

/// Run `replicates` independent trials
pub fn run_batch<R: Rng + ?Sized>(
    generator: &SampleGenerator,
    evaluator: &TrialEvaluator,
    replicates: usize,
    rng: &mut R,
) -> BatchSummary {
    let mut summary = BatchSummary {
        replicates,
        ..BatchSummary::default()
    };
    for _ in 0..replicates {
        let sample = generator.generate(rng);
        summary.out_of_range += sample.out_of_range();
        match evaluator.evaluate(&sample) {
            Ok(outcome) => {
                if outcome.rejected {
                    summary.rejected += 1;
                }
                if let (Some(r), Some(t)) = (outcome.median_reference, outcome.median_treated) {
                    summary.median_reference_sum += r;
                    summary.median_treated_sum += t;
                    summary.medians += 1;
                }
            }
            Err(_) => summary.degenerate += 1,
        }
    }
    summary
}

/// Aggregate result for one cell, before it is labelled by the sweep
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerSummary {
    pub power: f64,
    /// sd across outer repetitions, or the binomial standard error
    pub power_sd_or_se: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub batches: usize,
    pub replicates_per_batch: usize,
    pub degenerate_replicates: usize,
    pub out_of_range_values: usize,
    pub mean_median_reference: Option<f64>,
    pub mean_median_treated: Option<f64>,
}

pub fn estimate_power<R: Rng + ?Sized>(
    cell: usize,
    generator: &SampleGenerator,
    evaluator: &TrialEvaluator,
    strategy: AggregationStrategy,
    settings: &AggregationSettings,
    rng: &mut R,
) -> SimResult<PowerSummary> {
    strategy.validate()?;
    settings.validate()?;

    let batches: Vec<BatchSummary> = (0..strategy.batches())
        .map(|_| run_batch(generator, evaluator, settings.replicates, rng))
        .collect();

    let policy = settings.degenerate_policy;
    let powers = batches
        .iter()
        .map(|b| b.power(policy))
        .collect::<Option<Vec<f64>>>()
        .ok_or(SimError::NoEvaluableReplicates {
            cell,
            replicates: settings.replicates,
        })?;

    let z = z_critical(settings.confidence_level);
    let (power, spread, half_width) = match strategy {
        AggregationStrategy::OuterRepetition { repetitions } => {
            let (power, sd) = match (mean(&powers), std_dev(&powers)) {
                (Some(power), Some(sd)) => (power, sd),
                _ => {
                    return Err(SimError::invalid(
                        "repetitions",
                        format!("need at least 2 outer repetitions, got {}", repetitions),
                    ))
                }
            };
            (power, sd, z * sd / (repetitions as f64).sqrt())
        }
        AggregationStrategy::AnalyticBinomial => {
            let power = powers[0];
            let n = batches[0].denominator(policy) as f64;
            let se = (power * (1.0 - power) / n).sqrt();
            (power, se, z * se)
        }
    };

    let medians: usize = batches.iter().map(|b| b.medians).sum();
    let mean_of = |f: fn(&BatchSummary) -> f64| {
        (medians > 0).then(|| batches.iter().map(f).sum::<f64>() / medians as f64)
    };

    Ok(PowerSummary {
        power,
        power_sd_or_se: spread,
        ci_lower: power - half_width,
        ci_upper: power + half_width,
        batches: batches.len(),
        replicates_per_batch: settings.replicates,
        degenerate_replicates: batches.iter().map(|b| b.degenerate).sum(),
        out_of_range_values: batches.iter().map(|b| b.out_of_range).sum(),
        mean_median_reference: mean_of(|b| b.median_reference_sum),
        mean_median_treated: mean_of(|b| b.median_treated_sum),
    })
}
