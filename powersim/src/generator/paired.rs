//! Single-arm paired design: pre and post Ki67 fractions per subject.

use rand::Rng;
use rand_distr::{Distribution, SkewNormal};
use serde::{Deserialize, Serialize};

use super::{OutOfRangePolicy, TruncatedNormal};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairedSubject {
    pub pre: f64,
    pub post: f64,
    pub responder: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedSample {
    pub subjects: Vec<PairedSubject>,
    /// Post values that left [0, 1] after the fold-change transform
    /// (counted before any clamping)
    pub out_of_range: usize,
}

impl PairedSample {
    /// `pre - post` per subject, positive when Ki67 dropped
    pub fn differences(&self) -> Vec<f64> {
        self.subjects.iter().map(|s| s.pre - s.post).collect()
    }

    pub fn pre_values(&self) -> Vec<f64> {
        self.subjects.iter().map(|s| s.pre).collect()
    }

    pub fn post_values(&self) -> Vec<f64> {
        self.subjects.iter().map(|s| s.post).collect()
    }
}

/// Draws pre values from the baseline, then applies a skew-normal log2 fold
/// change to responders. Non-responders get an independent baseline draw.
#[derive(Debug, Clone)]
pub struct PairedGenerator {
    pub(crate) n: usize,
    pub(crate) baseline: TruncatedNormal,
    pub(crate) effect: SkewNormal<f64>,
    pub(crate) p_non: f64,
    pub(crate) out_of_range: OutOfRangePolicy,
}

impl PairedGenerator {
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> PairedSample {
        let mut subjects = Vec::with_capacity(self.n);
        let mut out_of_range = 0;

        for _ in 0..self.n {
            let pre = self.baseline.sample(rng);
            let responder = !rng.gen_bool(self.p_non);
            let post = if responder {
                let log2_fc = self.effect.sample(rng);
                // 2^(log2(pre) + lfc), written so pre = 0 stays 0
                let post = pre * log2_fc.exp2();
                if !(0.0..=1.0).contains(&post) {
                    out_of_range += 1;
                }
                match self.out_of_range {
                    OutOfRangePolicy::Keep => post,
                    OutOfRangePolicy::Clamp => post.clamp(0.0, 1.0),
                }
            } else {
                self.baseline.sample(rng)
            };
            subjects.push(PairedSubject {
                pre,
                post,
                responder,
            });
        }

        PairedSample {
            subjects,
            out_of_range,
        }
    }
}
