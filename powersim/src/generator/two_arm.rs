//! Two-arm design: an untreated reference group against a treated group
//! whose location and scale are scaled down from the baseline.

use rand::Rng;
use rand_distr::Distribution;
use serde::{Deserialize, Serialize};

use super::TruncatedNormal;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmSubject {
    pub value: f64,
    pub responder: bool,
    /// False when the subject dropped out before the measurement
    pub retained: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoArmSample {
    pub reference: Vec<ArmSubject>,
    pub treated: Vec<ArmSubject>,
}

fn retained_values(arm: &[ArmSubject]) -> Vec<f64> {
    arm.iter().filter(|s| s.retained).map(|s| s.value).collect()
}

impl TwoArmSample {
    pub fn reference_values(&self) -> Vec<f64> {
        retained_values(&self.reference)
    }

    /// Treated measurements that survived dropout
    pub fn treated_values(&self) -> Vec<f64> {
        retained_values(&self.treated)
    }

    pub fn dropped_out(&self) -> usize {
        self.treated.iter().filter(|s| !s.retained).count()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TwoArmGenerator {
    pub(crate) n0: usize,
    pub(crate) n1: usize,
    pub(crate) baseline: TruncatedNormal,
    pub(crate) reference: TruncatedNormal,
    pub(crate) treated: TruncatedNormal,
    pub(crate) p_non: f64,
    pub(crate) dropout: f64,
}

impl TwoArmGenerator {
    fn draw_arm<R: Rng + ?Sized>(
        &self,
        arm: &TruncatedNormal,
        n: usize,
        dropout: f64,
        rng: &mut R,
    ) -> Vec<ArmSubject> {
        (0..n)
            .map(|_| {
                let responder = !rng.gen_bool(self.p_non);
                let value = if responder {
                    arm.sample(rng)
                } else {
                    self.baseline.sample(rng)
                };
                let retained = !rng.gen_bool(dropout);
                ArmSubject {
                    value,
                    responder,
                    retained,
                }
            })
            .collect()
    }

    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> TwoArmSample {
        // dropout only thins the post-treatment arm
        let reference = self.draw_arm(&self.reference, self.n0, 0.0, rng);
        let treated = self.draw_arm(&self.treated, self.n1, self.dropout, rng);
        TwoArmSample { reference, treated }
    }
}
