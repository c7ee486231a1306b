//! Parameter grids
//!
//! Each study declares value lists; expansion produces the cartesian
//! product as an ordered list of cells. Order is fixed (outermost list
//! first) because the cell index selects the random stream.

use serde::{Deserialize, Serialize};

use crate::aggregator::AggregationStrategy;
use crate::error::{SimError, SimResult};
use crate::evaluator::TrialEvaluator;
use crate::generator::{
    Baseline, DesignParameters, OutOfRangePolicy, SimulationParameters, SkewNormalParams,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedGrid {
    pub baseline: Baseline,
    pub effect: SkewNormalParams,
    pub n_values: Vec<usize>,
    pub p_non_values: Vec<f64>,
    #[serde(default)]
    pub out_of_range: OutOfRangePolicy,
}

impl PairedGrid {
    /// `n` outer, `p_non` inner
    pub fn cells(&self) -> Vec<SimulationParameters> {
        let mut cells = Vec::with_capacity(self.n_values.len() * self.p_non_values.len());
        for &n in &self.n_values {
            for &p_non in &self.p_non_values {
                cells.push(SimulationParameters {
                    baseline: self.baseline,
                    p_non,
                    design: DesignParameters::Paired {
                        n,
                        effect: self.effect,
                        out_of_range: self.out_of_range,
                    },
                });
            }
        }
        cells
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoArmGrid {
    pub baseline: Baseline,
    /// Balanced designs, n0 = n1 = n
    #[serde(default)]
    pub n_values: Vec<usize>,
    /// Unbalanced designs as explicit (n0, n1) pairs
    #[serde(default)]
    pub arm_sizes: Vec<(usize, usize)>,
    pub p_non_values: Vec<f64>,
    /// Reference-arm location multiplier, 1.0 leaves the baseline as is
    #[serde(default = "default_reference_multiplier")]
    pub reference_multiplier: f64,
    /// Treated-arm location multipliers (0.25 = 75% reduction)
    pub location_multipliers: Vec<f64>,
    #[serde(default = "default_dropout_values")]
    pub dropout_values: Vec<f64>,
}

fn default_reference_multiplier() -> f64 {
    1.0
}

fn default_dropout_values() -> Vec<f64> {
    vec![0.0]
}

impl TwoArmGrid {
    pub fn arm_size_pairs(&self) -> Vec<(usize, usize)> {
        self.n_values
            .iter()
            .map(|&n| (n, n))
            .chain(self.arm_sizes.iter().copied())
            .collect()
    }

    /// multiplier, dropout, arm sizes, `p_non` (innermost)
    pub fn cells(&self) -> Vec<SimulationParameters> {
        let sizes = self.arm_size_pairs();
        let mut cells = Vec::new();
        for &multiplier in &self.location_multipliers {
            for &dropout in &self.dropout_values {
                for &(n0, n1) in &sizes {
                    for &p_non in &self.p_non_values {
                        cells.push(SimulationParameters {
                            baseline: self.baseline,
                            p_non,
                            design: DesignParameters::TwoArm {
                                n0,
                                n1,
                                reference_multiplier: self.reference_multiplier,
                                treated_multiplier: multiplier,
                                dropout,
                            },
                        });
                    }
                }
            }
        }
        cells
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "design", rename_all = "snake_case")]
pub enum StudyGrid {
    Paired(PairedGrid),
    TwoArm(TwoArmGrid),
}

impl StudyGrid {
    pub fn cells(&self) -> Vec<SimulationParameters> {
        match self {
            StudyGrid::Paired(g) => g.cells(),
            StudyGrid::TwoArm(g) => g.cells(),
        }
    }

    /// Expand and validate; an empty value list is an error, not an empty study
    pub fn validated_cells(&self) -> SimResult<Vec<SimulationParameters>> {
        let cells = self.cells();
        if cells.is_empty() {
            return Err(SimError::invalid(
                "grid",
                "every value list must contain at least one entry",
            ));
        }
        for cell in &cells {
            cell.validate()?;
        }
        Ok(cells)
    }
}

/// One unit of work for the sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    /// Position in the whole run, across studies
    pub index: usize,
    pub study: String,
    pub parameters: SimulationParameters,
    pub evaluator: TrialEvaluator,
    pub strategy: AggregationStrategy,
}
