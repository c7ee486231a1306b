//! Error taxonomy for the power simulation.
//!
//! Parameter problems are reported before any worker starts. Degenerate
//! samples are a per-replicate condition and never abort a sweep on their
//! own; the aggregator decides what they count as.

use thiserror::Error;

/// Errors surfaced to the caller of a sweep
#[derive(Debug, Error)]
pub enum SimError {
    /// A configured value violates its domain (n = 0, probability outside [0,1], ...)
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// Every replicate of a cell was degenerate and the policy excludes them
    #[error("cell {cell}: no evaluable replicates (all {replicates} were degenerate)")]
    NoEvaluableReplicates { cell: usize, replicates: usize },

    /// A worker panicked while simulating a cell; the whole run is void
    #[error("worker failed on cell {cell}: {message}")]
    WorkerFailed { cell: usize, message: String },

    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl SimError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        SimError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Why a rank test could not produce a p-value for one replicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DegenerateSample {
    #[error("group `{group}` is empty")]
    EmptyGroup { group: &'static str },

    /// Paired design where every difference is exactly zero
    #[error("all paired differences are zero")]
    NoNonZeroDifferences,

    /// Rank statistic has zero variance (every pooled value identical)
    #[error("rank statistic has zero variance")]
    ZeroVariance,
}

pub type SimResult<T> = Result<T, SimError>;

/// Check that `value` is a probability
pub(crate) fn check_probability(name: &'static str, value: f64) -> SimResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(SimError::invalid(
            name,
            format!("probability must lie in [0, 1], got {}", value),
        ));
    }
    Ok(())
}

/// Check that `value` is a finite, strictly positive scale
pub(crate) fn check_positive(name: &'static str, value: f64) -> SimResult<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(SimError::invalid(
            name,
            format!("must be finite and > 0, got {}", value),
        ));
    }
    Ok(())
}

pub(crate) fn check_finite(name: &'static str, value: f64) -> SimResult<()> {
    if !value.is_finite() {
        return Err(SimError::invalid(name, format!("must be finite, got {}", value)));
    }
    Ok(())
}

pub(crate) fn check_sample_size(name: &'static str, value: usize) -> SimResult<()> {
    if value == 0 {
        return Err(SimError::invalid(name, "sample size must be a positive integer"));
    }
    Ok(())
}
