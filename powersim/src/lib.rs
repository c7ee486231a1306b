//! Ki67 power simulation library.
//!
//! Monte Carlo estimation of statistical power for Ki67 biomarker trials:
//! synthetic trials are drawn for every cell of a parameter grid, tested
//! with a Wilcoxon rank test, and the rejection fractions are reduced to
//! power estimates with confidence intervals. Two designs are supported,
//! a single-arm pre/post study and an untreated vs treated two-arm study.

pub mod aggregator;
pub mod calibration;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod generator;
pub mod grid;
pub mod report;
pub mod rng;
pub mod stats;
pub mod sweep;

pub use aggregator::{
    estimate_power, AggregationSettings, AggregationStrategy, DegeneratePolicy, PowerSummary,
};
pub use config::{RunConfig, StudyConfig};
pub use error::{DegenerateSample, SimError, SimResult};
pub use evaluator::{ReplicateOutcome, SignificanceRule, TrialEvaluator};
pub use generator::{
    Baseline, DesignParameters, OutOfRangePolicy, SampleGenerator, SimulationParameters,
    SkewNormalParams, SyntheticSample,
};
pub use grid::{GridCell, PairedGrid, StudyGrid, TwoArmGrid};
pub use sweep::{run_config, run_sweep, PowerEstimate, SweepSettings};
