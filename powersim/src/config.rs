//! Run configuration
//!
//! A run is one seed, one worker-pool size, one replicate count and a list
//! of studies. Every field has a default, and `RunConfig::default()`
//! reproduces the paired and two-arm Ki67 studies.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::aggregator::{AggregationSettings, AggregationStrategy, DegeneratePolicy};
use crate::error::{check_sample_size, SimResult};
use crate::evaluator::{SignificanceRule, TrialEvaluator};
use crate::generator::{Baseline, OutOfRangePolicy, SkewNormalParams};
use crate::grid::{GridCell, PairedGrid, StudyGrid, TwoArmGrid};
use crate::stats::Alternative;

// =============================================================================
// Study configuration
// =============================================================================

/// One study: a grid plus how its cells are tested and aggregated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyConfig {
    pub label: String,
    #[serde(flatten)]
    pub grid: StudyGrid,
    /// Overrides the design's default aggregation strategy
    #[serde(default)]
    pub aggregation: Option<AggregationStrategy>,
    #[serde(default)]
    pub significance: Option<SignificanceRule>,
    #[serde(default)]
    pub alternative: Option<Alternative>,
}

impl StudyConfig {
    /// Paired: outer repetition x10. Two-arm: analytic binomial SE.
    pub fn aggregation(&self) -> AggregationStrategy {
        self.aggregation.unwrap_or(match self.grid {
            StudyGrid::Paired(_) => AggregationStrategy::OuterRepetition {
                repetitions: default_outer_repetitions(),
            },
            StudyGrid::TwoArm(_) => AggregationStrategy::AnalyticBinomial,
        })
    }

    /// Paired: two-sided at alpha. Two-arm: "greater" at alpha / 2.
    pub fn evaluator(&self, alpha: f64) -> SimResult<TrialEvaluator> {
        let (alternative, rule) = match self.grid {
            StudyGrid::Paired(_) => (Alternative::TwoSided, SignificanceRule::Nominal),
            StudyGrid::TwoArm(_) => (Alternative::Greater, SignificanceRule::HalvedAlpha),
        };
        TrialEvaluator::new(
            alpha,
            self.alternative.unwrap_or(alternative),
            self.significance.unwrap_or(rule),
        )
    }

    /// Single-arm pre/post study with a skew-normal log2 fold change
    pub fn paired_default() -> Self {
        Self {
            label: "paired".to_string(),
            grid: StudyGrid::Paired(PairedGrid {
                baseline: default_baseline(),
                effect: SkewNormalParams::new(-1.0, 0.6, -0.03),
                n_values: vec![5, 8, 10, 12, 15, 20],
                p_non_values: vec![0.0, 0.1, 0.2, 0.3, 0.4],
                out_of_range: OutOfRangePolicy::Keep,
            }),
            aggregation: None,
            significance: None,
            alternative: None,
        }
    }

    /// Untreated vs treated groups with dropout in the treated arm
    pub fn two_arm_default() -> Self {
        Self {
            label: "two_arm".to_string(),
            grid: StudyGrid::TwoArm(TwoArmGrid {
                baseline: default_baseline(),
                n_values: vec![10, 15, 20, 25, 30, 40],
                arm_sizes: Vec::new(),
                p_non_values: vec![0.05, 0.1, 0.2],
                reference_multiplier: 1.0,
                location_multipliers: vec![0.25, 0.5],
                dropout_values: vec![0.1],
            }),
            aggregation: None,
            significance: None,
            alternative: None,
        }
    }
}

fn default_baseline() -> Baseline {
    Baseline::new(0.065, 0.19)
}

// =============================================================================
// Run configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Worker-pool size; results do not depend on it
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Replicates per batch
    #[serde(default = "default_replicates")]
    pub replicates: usize,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_confidence")]
    pub confidence_level: f64,
    #[serde(default)]
    pub degenerate_policy: DegeneratePolicy,
    #[serde(default = "default_studies")]
    pub studies: Vec<StudyConfig>,
}

fn default_seed() -> u64 {
    42
}
fn default_workers() -> usize {
    4
}
fn default_replicates() -> usize {
    1000
}
fn default_alpha() -> f64 {
    0.05
}
fn default_confidence() -> f64 {
    0.95
}
fn default_outer_repetitions() -> usize {
    10
}
fn default_studies() -> Vec<StudyConfig> {
    vec![StudyConfig::paired_default(), StudyConfig::two_arm_default()]
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            workers: default_workers(),
            replicates: default_replicates(),
            alpha: default_alpha(),
            confidence_level: default_confidence(),
            degenerate_policy: DegeneratePolicy::default(),
            studies: default_studies(),
        }
    }
}

impl RunConfig {
    /// Load from a JSON file
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: RunConfig = serde_json::from_str(content).context("Malformed JSON")?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn aggregation_settings(&self) -> AggregationSettings {
        AggregationSettings {
            replicates: self.replicates,
            confidence_level: self.confidence_level,
            degenerate_policy: self.degenerate_policy,
        }
    }

    /// Check every setting and every cell, without simulating anything
    pub fn validate(&self) -> SimResult<()> {
        self.cells().map(|_| ())
    }

    /// Expand all studies into validated cells, indexed across the run
    pub fn cells(&self) -> SimResult<Vec<GridCell>> {
        check_sample_size("workers", self.workers)?;
        self.aggregation_settings().validate()?;

        let mut cells = Vec::new();
        for study in &self.studies {
            let evaluator = study.evaluator(self.alpha)?;
            let strategy = study.aggregation();
            strategy.validate()?;
            for parameters in study.grid.validated_cells()? {
                cells.push(GridCell {
                    index: cells.len(),
                    study: study.label.clone(),
                    parameters,
                    evaluator,
                    strategy,
                });
            }
        }
        Ok(cells)
    }
}
