//! Trial Evaluator
//!
//! Applies the Wilcoxon test matching the sample's design (signed-rank on
//! paired `pre - post`, rank-sum on reference vs treated) and compares the
//! p-value against the significance threshold.

use serde::{Deserialize, Serialize};

use crate::error::{DegenerateSample, SimError, SimResult};
use crate::generator::SyntheticSample;
use crate::stats::{median, rank_sum_test, signed_rank_test, Alternative, RankTestResult};

/// How the p-value is compared against alpha
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignificanceRule {
    /// Reject when `p < alpha`
    #[default]
    Nominal,
    /// Reject when `p < alpha / 2`; pairs a one-sided alternative with a
    /// two-sided error budget
    HalvedAlpha,
}

impl SignificanceRule {
    pub fn threshold(&self, alpha: f64) -> f64 {
        match self {
            SignificanceRule::Nominal => alpha,
            SignificanceRule::HalvedAlpha => alpha / 2.0,
        }
    }
}

/// Result of evaluating one synthetic trial
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplicateOutcome {
    pub p_value: f64,
    pub rejected: bool,
    /// Pre median (paired) or reference-arm median (two-arm)
    pub median_reference: Option<f64>,
    /// Post median (paired) or retained treated-arm median (two-arm)
    pub median_treated: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialEvaluator {
    pub alpha: f64,
    /// Direction for `pre - post` or `reference - treated`
    pub alternative: Alternative,
    pub rule: SignificanceRule,
}

impl TrialEvaluator {
    pub fn new(alpha: f64, alternative: Alternative, rule: SignificanceRule) -> SimResult<Self> {
        let evaluator = Self {
            alpha,
            alternative,
            rule,
        };
        evaluator.validate()?;
        Ok(evaluator)
    }

    pub fn validate(&self) -> SimResult<()> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(SimError::invalid(
                "alpha",
                format!("significance level must lie in (0, 1), got {}", self.alpha),
            ));
        }
        Ok(())
    }

    /// Two-sided test at nominal alpha
    pub fn two_sided(alpha: f64) -> SimResult<Self> {
        Self::new(alpha, Alternative::TwoSided, SignificanceRule::Nominal)
    }

    pub fn threshold(&self) -> f64 {
        self.rule.threshold(self.alpha)
    }

    pub fn test(&self, sample: &SyntheticSample) -> Result<RankTestResult, DegenerateSample> {
        match sample {
            SyntheticSample::Paired(s) => signed_rank_test(&s.differences(), self.alternative),
            SyntheticSample::TwoArm(s) => rank_sum_test(
                &s.reference_values(),
                &s.treated_values(),
                self.alternative,
            ),
        }
    }

    pub fn evaluate(&self, sample: &SyntheticSample) -> Result<ReplicateOutcome, DegenerateSample> {
        let result = self.test(sample)?;
        let (reference, treated) = match sample {
            SyntheticSample::Paired(s) => (s.pre_values(), s.post_values()),
            SyntheticSample::TwoArm(s) => (s.reference_values(), s.treated_values()),
        };
        Ok(ReplicateOutcome {
            p_value: result.p_value,
            rejected: result.p_value < self.threshold(),
            median_reference: median(&reference),
            median_treated: median(&treated),
        })
    }
}
