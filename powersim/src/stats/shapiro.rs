//! Shapiro-Wilk normality test (Royston 1995 approximation, 3 <= n <= 5000).
//!
//! Used only when calibrating against the reference dataset, to check
//! whether the observed log2 fold changes look normal before a skewed
//! generator is chosen.

use serde::{Deserialize, Serialize};

use crate::stats::normal::{normal_quantile, normal_sf};

const C1: [f64; 6] = [0.0, 0.221157, -0.147981, -2.07119, 4.434685, -2.706056];
const C2: [f64; 6] = [0.0, 0.042981, -0.293762, -1.752461, 5.682633, -3.582633];
const C3: [f64; 4] = [0.544, -0.39978, 0.025054, -6.714e-4];
const C4: [f64; 4] = [1.3822, -0.77857, 0.062767, -0.0020322];
const C5: [f64; 4] = [-1.5861, -0.31082, -0.083751, 0.0038915];
const C6: [f64; 3] = [-0.4803, -0.082676, 0.0030302];
const G: [f64; 2] = [-2.273, 0.459];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapiroWilk {
    pub w: f64,
    pub p_value: f64,
    pub n: usize,
}

fn poly(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Upper-half coefficients `a_1 >= a_2 >= ...` of the W statistic
fn coefficients(n: usize) -> Vec<f64> {
    let half = n / 2;
    if n == 3 {
        return vec![std::f64::consts::FRAC_1_SQRT_2];
    }

    let an25 = n as f64 + 0.25;
    // m[0] is the most negative expected normal order statistic
    let m: Vec<f64> = (1..=half)
        .map(|i| normal_quantile((i as f64 - 0.375) / an25))
        .collect();
    let summ2 = 2.0 * m.iter().map(|v| v * v).sum::<f64>();
    let ssumm2 = summ2.sqrt();
    let rsn = 1.0 / (n as f64).sqrt();
    let a1 = poly(&C1, rsn) - m[0] / ssumm2;

    let mut a = vec![0.0; half];
    a[0] = a1;
    let (first, fac) = if n > 5 {
        let a2 = -m[1] / ssumm2 + poly(&C2, rsn);
        a[1] = a2;
        let fac = ((summ2 - 2.0 * m[0] * m[0] - 2.0 * m[1] * m[1])
            / (1.0 - 2.0 * a1 * a1 - 2.0 * a2 * a2))
            .sqrt();
        (2, fac)
    } else {
        let fac = ((summ2 - 2.0 * m[0] * m[0]) / (1.0 - 2.0 * a1 * a1)).sqrt();
        (1, fac)
    };
    for i in first..half {
        a[i] = -m[i] / fac;
    }
    a
}

/// Run the test. Returns `None` outside 3..=5000 observations or for a
/// constant sample.
pub fn shapiro_wilk(values: &[f64]) -> Option<ShapiroWilk> {
    let n = values.len();
    if !(3..=5000).contains(&n) {
        return None;
    }
    let mut x = values.to_vec();
    x.sort_by(|a, b| a.total_cmp(b));
    if x[n - 1] - x[0] <= 0.0 {
        return None;
    }

    let a = coefficients(n);
    let numerator: f64 = a
        .iter()
        .enumerate()
        .map(|(i, ai)| ai * (x[n - 1 - i] - x[i]))
        .sum();
    let mean = x.iter().sum::<f64>() / n as f64;
    let ssq: f64 = x.iter().map(|v| (v - mean).powi(2)).sum();
    let w = (numerator * numerator / ssq).min(1.0);

    let p_value = if n == 3 {
        let pi6 = 6.0 / std::f64::consts::PI;
        let stqr = std::f64::consts::FRAC_PI_3;
        (pi6 * (w.sqrt().asin() - stqr)).max(0.0)
    } else {
        let w1 = 1.0 - w;
        if w1 <= 0.0 {
            1.0
        } else {
            let an = n as f64;
            let mut y = w1.ln();
            let (mu, sigma) = if n <= 11 {
                let gamma = poly(&G, an);
                if y >= gamma {
                    return Some(ShapiroWilk {
                        w,
                        p_value: 1e-99,
                        n,
                    });
                }
                y = -(gamma - y).ln();
                (poly(&C3, an), poly(&C4, an).exp())
            } else {
                let ln_n = an.ln();
                (poly(&C5, ln_n), poly(&C6, ln_n).exp())
            };
            normal_sf((y - mu) / sigma)
        }
    };

    Some(ShapiroWilk { w, p_value, n })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coefficients_are_normalised() {
        for n in [4usize, 5, 6, 11, 20, 57] {
            let a = coefficients(n);
            let norm: f64 = 2.0 * a.iter().map(|v| v * v).sum::<f64>();
            assert!((norm - 1.0).abs() < 1e-6, "n={} norm={}", n, norm);
        }
    }

    #[test]
    fn test_normal_scores_are_accepted() {
        let n = 30;
        let x: Vec<f64> = (1..=n)
            .map(|i| normal_quantile((i as f64 - 0.375) / (n as f64 + 0.25)))
            .collect();
        let result = shapiro_wilk(&x).unwrap();
        assert!(result.w > 0.98);
        assert!(result.p_value > 0.5, "p={}", result.p_value);
    }

    #[test]
    fn test_heavily_skewed_sample_is_rejected() {
        let x: Vec<f64> = (0..20).map(|i| 2f64.powi(i)).collect();
        let result = shapiro_wilk(&x).unwrap();
        assert!(result.p_value < 0.01, "p={}", result.p_value);
    }

    #[test]
    fn test_small_and_constant_samples() {
        assert!(shapiro_wilk(&[1.0, 2.0]).is_none());
        assert!(shapiro_wilk(&[1.0, 1.0, 1.0, 1.0]).is_none());
        // equally spaced triple is as normal as three points can be
        let r = shapiro_wilk(&[1.0, 2.0, 3.0]).unwrap();
        assert!((r.w - 1.0).abs() < 1e-12);
        assert!((r.p_value - 1.0).abs() < 1e-6);
    }
}
