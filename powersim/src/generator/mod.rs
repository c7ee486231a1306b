//! Sample Generator
//!
//! Turns one set of [`SimulationParameters`] into synthetic Ki67 fractions:
//! - baseline values from a truncated normal on [0, 1]
//! - paired design: skew-normal log2 fold change applied to responders
//! - two-arm design: arm distributions scaled from the baseline by a
//!   location multiplier `m` (scale multiplied by `sqrt(m)`), with dropout
//!   thinning the treated arm
//!
//! Non-responders always receive a fresh draw from the baseline, so they
//! carry no treatment effect.

pub mod distributions;
pub mod paired;
pub mod two_arm;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{check_positive, check_probability, check_sample_size, SimResult};

pub use distributions::{SkewNormalParams, TruncatedNormal};
pub use paired::{PairedGenerator, PairedSample, PairedSubject};
pub use two_arm::{ArmSubject, TwoArmGenerator, TwoArmSample};

// =============================================================================
// Parameters
// =============================================================================

/// Untreated Ki67 distribution, as fractions in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Location of the parent normal
    pub ki0: f64,
    /// Scale of the parent normal
    pub sigma: f64,
}

impl Baseline {
    pub fn new(ki0: f64, sigma: f64) -> Self {
        Self { ki0, sigma }
    }

    pub fn distribution(&self) -> SimResult<TruncatedNormal> {
        check_positive("sigma", self.sigma)?;
        TruncatedNormal::unit(self.ki0, self.sigma)
    }

    /// Location scaled by `multiplier`, scale by its square root
    pub fn scaled(&self, multiplier: f64) -> SimResult<TruncatedNormal> {
        check_positive("location_multiplier", multiplier)?;
        TruncatedNormal::unit(self.ki0 * multiplier, self.sigma * multiplier.sqrt())
    }
}

/// What to do with treatment-transformed values that leave [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutOfRangePolicy {
    /// Leave the value as computed (and count it)
    #[default]
    Keep,
    Clamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DesignParameters {
    /// Pre/post measurements on the same `n` subjects
    Paired {
        n: usize,
        effect: SkewNormalParams,
        #[serde(default)]
        out_of_range: OutOfRangePolicy,
    },
    /// Independent reference (`n0`) and treated (`n1`) groups
    TwoArm {
        n0: usize,
        n1: usize,
        reference_multiplier: f64,
        treated_multiplier: f64,
        dropout: f64,
    },
}

/// One grid cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParameters {
    pub baseline: Baseline,
    /// Probability that a subject is a non-responder
    pub p_non: f64,
    pub design: DesignParameters,
}

impl SimulationParameters {
    pub fn paired(baseline: Baseline, n: usize, p_non: f64, effect: SkewNormalParams) -> Self {
        Self {
            baseline,
            p_non,
            design: DesignParameters::Paired {
                n,
                effect,
                out_of_range: OutOfRangePolicy::Keep,
            },
        }
    }

    /// Two-arm cell with an unscaled reference arm
    pub fn two_arm(
        baseline: Baseline,
        n0: usize,
        n1: usize,
        p_non: f64,
        treated_multiplier: f64,
        dropout: f64,
    ) -> Self {
        Self {
            baseline,
            p_non,
            design: DesignParameters::TwoArm {
                n0,
                n1,
                reference_multiplier: 1.0,
                treated_multiplier,
                dropout,
            },
        }
    }

    pub fn validate(&self) -> SimResult<()> {
        self.generator().map(|_| ())
    }

    /// Validate and build the generator, resolving every distribution once
    pub fn generator(&self) -> SimResult<SampleGenerator> {
        check_probability("p_non", self.p_non)?;
        let baseline = self.baseline.distribution()?;

        match &self.design {
            DesignParameters::Paired {
                n,
                effect,
                out_of_range,
            } => {
                check_sample_size("n", *n)?;
                Ok(SampleGenerator::Paired(PairedGenerator {
                    n: *n,
                    baseline,
                    effect: effect.distribution()?,
                    p_non: self.p_non,
                    out_of_range: *out_of_range,
                }))
            }
            DesignParameters::TwoArm {
                n0,
                n1,
                reference_multiplier,
                treated_multiplier,
                dropout,
            } => {
                check_sample_size("n0", *n0)?;
                check_sample_size("n1", *n1)?;
                check_probability("dropout", *dropout)?;
                Ok(SampleGenerator::TwoArm(TwoArmGenerator {
                    n0: *n0,
                    n1: *n1,
                    baseline,
                    reference: self.baseline.scaled(*reference_multiplier)?,
                    treated: self.baseline.scaled(*treated_multiplier)?,
                    p_non: self.p_non,
                    dropout: *dropout,
                }))
            }
        }
    }

    /// Planned subjects per group, before dropout
    pub fn group_sizes(&self) -> (usize, usize) {
        match &self.design {
            DesignParameters::Paired { n, .. } => (*n, *n),
            DesignParameters::TwoArm { n0, n1, .. } => (*n0, *n1),
        }
    }
}

// =============================================================================
// Samples
// =============================================================================

/// One simulated trial realisation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyntheticSample {
    Paired(PairedSample),
    TwoArm(TwoArmSample),
}

impl SyntheticSample {
    pub fn out_of_range(&self) -> usize {
        match self {
            SyntheticSample::Paired(sample) => sample.out_of_range,
            SyntheticSample::TwoArm(_) => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SampleGenerator {
    Paired(PairedGenerator),
    TwoArm(TwoArmGenerator),
}

impl SampleGenerator {
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> SyntheticSample {
        match self {
            SampleGenerator::Paired(g) => SyntheticSample::Paired(g.generate(rng)),
            SampleGenerator::TwoArm(g) => SyntheticSample::TwoArm(g.generate(rng)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::median;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn baseline() -> Baseline {
        Baseline::new(0.065, 0.19)
    }

    fn effect() -> SkewNormalParams {
        SkewNormalParams::new(-1.0, 0.6, -0.03)
    }

    #[test]
    fn test_zero_sample_size_rejected() {
        let params = SimulationParameters::paired(baseline(), 0, 0.1, effect());
        assert!(params.validate().is_err());

        let params = SimulationParameters::two_arm(baseline(), 20, 0, 0.1, 0.25, 0.1);
        let err = params.validate().unwrap_err();
        assert!(err.to_string().contains("n1"));
    }

    #[test]
    fn test_invalid_probabilities_rejected() {
        assert!(SimulationParameters::paired(baseline(), 10, 1.2, effect())
            .validate()
            .is_err());
        assert!(
            SimulationParameters::two_arm(baseline(), 10, 10, 0.1, 0.25, -0.1)
                .validate()
                .is_err()
        );
        assert!(
            SimulationParameters::two_arm(baseline(), 10, 10, 0.1, 0.0, 0.1)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_paired_sample_shape() {
        let params = SimulationParameters::paired(baseline(), 17, 0.2, effect());
        let generator = params.generator().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        match generator.generate(&mut rng) {
            SyntheticSample::Paired(sample) => {
                assert_eq!(sample.subjects.len(), 17);
                assert!(sample.subjects.iter().all(|s| (0.0..=1.0).contains(&s.pre)));
                // log2 FC near -1 cannot push a unit-interval value above 1
                assert_eq!(sample.out_of_range, 0);
            }
            other => panic!("unexpected sample {:?}", other),
        }
    }

    #[test]
    fn test_all_non_responders_carry_no_effect() {
        let params = SimulationParameters::paired(baseline(), 50, 1.0, effect());
        let generator = params.generator().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        if let SyntheticSample::Paired(sample) = generator.generate(&mut rng) {
            assert!(sample.subjects.iter().all(|s| !s.responder));
            assert!(sample.subjects.iter().all(|s| (0.0..=1.0).contains(&s.post)));
        } else {
            panic!("expected paired sample");
        }
    }

    #[test]
    fn test_clamp_policy_keeps_values_in_unit_interval() {
        let effect = SkewNormalParams::new(1.5, 0.5, 0.0);
        let mut params = SimulationParameters::paired(Baseline::new(0.6, 0.2), 200, 0.0, effect);
        if let DesignParameters::Paired { out_of_range, .. } = &mut params.design {
            *out_of_range = OutOfRangePolicy::Clamp;
        }
        let generator = params.generator().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(9);
        if let SyntheticSample::Paired(sample) = generator.generate(&mut rng) {
            assert!(sample.out_of_range > 0);
            assert!(sample.subjects.iter().all(|s| (0.0..=1.0).contains(&s.post)));
        } else {
            panic!("expected paired sample");
        }
    }

    #[test]
    fn test_dropout_only_thins_treated_arm() {
        let params = SimulationParameters::two_arm(baseline(), 40, 40, 0.05, 0.25, 0.5);
        let generator = params.generator().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        if let SyntheticSample::TwoArm(sample) = generator.generate(&mut rng) {
            assert_eq!(sample.reference_values().len(), 40);
            assert_eq!(sample.treated.len(), 40);
            assert_eq!(sample.treated_values().len() + sample.dropped_out(), 40);
            assert!(sample.dropped_out() > 0);
        } else {
            panic!("expected two-arm sample");
        }
    }

    #[test]
    fn test_treated_median_below_reference() {
        let params = SimulationParameters::two_arm(baseline(), 20, 20, 0.05, 0.25, 0.0);
        let generator = params.generator().unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(2024);
        let runs = 200;
        let lower = (0..runs)
            .filter(|_| match generator.generate(&mut rng) {
                SyntheticSample::TwoArm(s) => {
                    median(&s.treated_values()).unwrap() < median(&s.reference_values()).unwrap()
                }
                _ => false,
            })
            .count();
        assert!(lower as f64 / runs as f64 > 0.85, "lower in {}/{}", lower, runs);
    }
}
