//! Parametric distributions used by the sample generator.

use std::f64::consts::PI;

use rand::Rng;
use rand_distr::{Distribution, Normal, SkewNormal};
use serde::{Deserialize, Serialize};

use crate::error::{check_finite, check_positive, SimError, SimResult};
use crate::stats::normal::{normal_cdf, normal_quantile};

/// Below this acceptance probability rejection sampling switches to the
/// inverse-CDF method.
const MIN_REJECTION_MASS: f64 = 0.1;

const MAX_FIT_SKEWNESS: f64 = 0.99;

/// Normal distribution restricted to `[lower, upper]` and renormalised
#[derive(Debug, Clone, Copy)]
pub struct TruncatedNormal {
    mean: f64,
    sd: f64,
    lower: f64,
    upper: f64,
    normal: Normal<f64>,
    cdf_lower: f64,
    cdf_upper: f64,
}

impl TruncatedNormal {
    pub fn new(mean: f64, sd: f64, lower: f64, upper: f64) -> SimResult<Self> {
        check_finite("mean", mean)?;
        check_positive("sd", sd)?;
        if !(lower < upper) {
            return Err(SimError::invalid(
                "bounds",
                format!("lower bound {} must be below upper bound {}", lower, upper),
            ));
        }
        let normal = Normal::new(mean, sd).map_err(|e| SimError::invalid("sd", e.to_string()))?;
        let cdf_lower = normal_cdf((lower - mean) / sd);
        let cdf_upper = normal_cdf((upper - mean) / sd);
        if cdf_upper - cdf_lower <= 0.0 {
            return Err(SimError::invalid(
                "bounds",
                format!(
                    "N({}, {}) has no numerical mass on [{}, {}]",
                    mean, sd, lower, upper
                ),
            ));
        }
        Ok(Self {
            mean,
            sd,
            lower,
            upper,
            normal,
            cdf_lower,
            cdf_upper,
        })
    }

    /// Truncated to the unit interval, the support of a percentage fraction
    pub fn unit(mean: f64, sd: f64) -> SimResult<Self> {
        Self::new(mean, sd, 0.0, 1.0)
    }

    /// Probability mass of the parent normal inside the bounds
    pub fn mass(&self) -> f64 {
        self.cdf_upper - self.cdf_lower
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }
}

impl Distribution<f64> for TruncatedNormal {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.mass() >= MIN_REJECTION_MASS {
            loop {
                let x = self.normal.sample(rng);
                if x >= self.lower && x <= self.upper {
                    return x;
                }
            }
        }
        let u = self.cdf_lower + self.mass() * rng.gen::<f64>();
        (self.mean + self.sd * normal_quantile(u)).clamp(self.lower, self.upper)
    }
}

/// Skew-normal log2 fold change (location, scale, shape parametrisation)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkewNormalParams {
    pub location: f64,
    pub scale: f64,
    pub shape: f64,
}

impl SkewNormalParams {
    pub fn new(location: f64, scale: f64, shape: f64) -> Self {
        Self {
            location,
            scale,
            shape,
        }
    }

    pub fn validate(&self) -> SimResult<()> {
        check_finite("effect.location", self.location)?;
        check_positive("effect.scale", self.scale)?;
        check_finite("effect.shape", self.shape)
    }

    pub fn distribution(&self) -> SimResult<SkewNormal<f64>> {
        self.validate()?;
        SkewNormal::new(self.location, self.scale, self.shape)
            .map_err(|e| SimError::invalid("effect", e.to_string()))
    }

    /// `delta = shape / sqrt(1 + shape^2)`
    pub fn delta(&self) -> f64 {
        self.shape / (1.0 + self.shape * self.shape).sqrt()
    }

    /// Expected value `location + scale * delta * sqrt(2 / pi)`
    pub fn mean(&self) -> f64 {
        self.location + self.scale * self.delta() * (2.0 / PI).sqrt()
    }

    pub fn variance(&self) -> f64 {
        let d = self.delta();
        self.scale * self.scale * (1.0 - 2.0 * d * d / PI)
    }

    /// Third standardised moment
    pub fn skewness(&self) -> f64 {
        let md = self.delta() * (2.0 / PI).sqrt();
        (4.0 - PI) / 2.0 * md.powi(3) / (1.0 - md * md).powf(1.5)
    }

    /// Method-of-moments fit. Skewness is capped just inside the family's
    /// attainable range (|skewness| < 0.9953).
    pub fn from_moments(mean: f64, sd: f64, skewness: f64) -> Self {
        let gamma = skewness.clamp(-MAX_FIT_SKEWNESS, MAX_FIT_SKEWNESS);
        let a = gamma.abs().powf(2.0 / 3.0);
        let b = ((4.0 - PI) / 2.0).powf(2.0 / 3.0);
        let delta = gamma.signum() * (PI / 2.0 * a / (a + b)).sqrt();
        let delta = if gamma == 0.0 { 0.0 } else { delta };
        let shape = delta / (1.0 - delta * delta).sqrt();
        let scale = sd / (1.0 - 2.0 * delta * delta / PI).sqrt();
        let location = mean - scale * delta * (2.0 / PI).sqrt();
        Self {
            location,
            scale,
            shape,
        }
    }
}
