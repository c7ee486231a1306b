//! Wilcoxon signed-rank and rank-sum tests.
//!
//! P-values follow the conventional implementation: the exact null
//! distribution is used when every group has fewer than
//! [`EXACT_THRESHOLD`] observations and there are no ties (or zero
//! differences); otherwise a normal approximation with tie-corrected
//! variance and a 0.5 continuity correction is used.

use serde::{Deserialize, Serialize};

use crate::error::DegenerateSample;
use crate::stats::normal::{normal_cdf, normal_sf};

/// Group size below which the exact null distribution is used
pub const EXACT_THRESHOLD: usize = 50;

/// Alternative hypothesis, phrased for the first group (or `x - y`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alternative {
    #[default]
    TwoSided,
    /// First group tends to be larger
    Greater,
    /// First group tends to be smaller
    Less,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PValueMethod {
    Exact,
    NormalApproximation,
}

/// Outcome of a rank test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankTestResult {
    /// V (signed-rank) or W (rank-sum, Mann-Whitney form)
    pub statistic: f64,
    pub p_value: f64,
    pub method: PValueMethod,
}

// =============================================================================
// Ranking
// =============================================================================

/// Ranks starting at 1, ties receive the average rank of their run
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // positions start..end (0-based) share ranks start+1..=end
        let rank = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

/// Sum of `t^3 - t` over tie groups of the ranks, and whether any tie exists
fn tie_adjustment(ranks: &[f64]) -> (f64, bool) {
    let mut sorted = ranks.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut total = 0.0;
    let mut has_ties = false;
    let mut start = 0;
    while start < sorted.len() {
        let mut end = start + 1;
        while end < sorted.len() && sorted[end] == sorted[start] {
            end += 1;
        }
        let t = (end - start) as f64;
        if t > 1.0 {
            has_ties = true;
            total += t * t * t - t;
        }
        start = end;
    }
    (total, has_ties)
}

// =============================================================================
// Exact null distributions
// =============================================================================

/// Frequencies of V = 0..=n(n+1)/2 over the 2^n sign assignments
fn signed_rank_counts(n: usize) -> Vec<u64> {
    let max = n * (n + 1) / 2;
    let mut counts = vec![0u64; max + 1];
    counts[0] = 1;
    for k in 1..=n {
        for s in (k..=max).rev() {
            counts[s] += counts[s - k];
        }
    }
    counts
}

/// Frequencies of W = 0..=m*n, the coefficients of the Gaussian binomial
/// `[m+n choose m]_q` built one factor `(1 - q^(n+i)) / (1 - q^i)` at a time.
fn rank_sum_counts(m: usize, n: usize) -> Vec<i128> {
    let len = m * n + 1;
    let mut poly = vec![0i128; len];
    poly[0] = 1;
    for i in 1..=m {
        let up = n + i;
        for s in (up..len).rev() {
            poly[s] -= poly[s - up];
        }
        for s in i..len {
            poly[s] += poly[s - i];
        }
    }
    poly
}

/// P(S <= q) from frequencies of S = 0, 1, 2, ...
fn lower_tail(counts: &[f64], q: i64, total: f64) -> f64 {
    if q < 0 {
        return 0.0;
    }
    let upto = (q as usize).min(counts.len() - 1);
    counts[..=upto].iter().sum::<f64>() / total
}

/// P(S >= q)
fn upper_tail(counts: &[f64], q: i64, total: f64) -> f64 {
    let from = q.max(0) as usize;
    if from >= counts.len() {
        return 0.0;
    }
    counts[from..].iter().sum::<f64>() / total
}

/// Exact p-value for an integer statistic with a symmetric null centred at `centre`
fn exact_p_value(
    lower: impl Fn(i64) -> f64,
    upper: impl Fn(i64) -> f64,
    statistic: i64,
    centre: f64,
    alternative: Alternative,
) -> f64 {
    match alternative {
        Alternative::TwoSided => {
            let p = if statistic as f64 > centre {
                upper(statistic)
            } else {
                lower(statistic)
            };
            (2.0 * p).min(1.0)
        }
        Alternative::Greater => upper(statistic),
        Alternative::Less => lower(statistic),
    }
}

fn normal_p_value(z: f64, sigma: f64, alternative: Alternative) -> f64 {
    let correction = match alternative {
        Alternative::TwoSided if z > 0.0 => 0.5,
        Alternative::TwoSided if z < 0.0 => -0.5,
        Alternative::TwoSided => 0.0,
        Alternative::Greater => 0.5,
        Alternative::Less => -0.5,
    };
    let z = (z - correction) / sigma;
    match alternative {
        Alternative::Less => normal_cdf(z),
        Alternative::Greater => normal_sf(z),
        Alternative::TwoSided => (2.0 * normal_cdf(z).min(normal_sf(z))).min(1.0),
    }
}

// =============================================================================
// Rank tests
// =============================================================================

/// Paired Wilcoxon signed-rank test on differences `x - y`.
///
/// Zero differences are dropped before ranking; their presence forces the
/// normal approximation.
pub fn signed_rank_test(
    differences: &[f64],
    alternative: Alternative,
) -> Result<RankTestResult, DegenerateSample> {
    if differences.is_empty() {
        return Err(DegenerateSample::EmptyGroup {
            group: "differences",
        });
    }
    let nonzero: Vec<f64> = differences.iter().copied().filter(|&d| d != 0.0).collect();
    let has_zeros = nonzero.len() != differences.len();
    let n = nonzero.len();
    if n == 0 {
        return Err(DegenerateSample::NoNonZeroDifferences);
    }

    let abs: Vec<f64> = nonzero.iter().map(|d| d.abs()).collect();
    let ranks = average_ranks(&abs);
    let statistic: f64 = nonzero
        .iter()
        .zip(&ranks)
        .filter(|(d, _)| **d > 0.0)
        .map(|(_, r)| r)
        .sum();
    let (tie_sum, has_ties) = tie_adjustment(&ranks);
    let nf = n as f64;

    if n < EXACT_THRESHOLD && !has_ties && !has_zeros {
        let counts: Vec<f64> = signed_rank_counts(n).into_iter().map(|c| c as f64).collect();
        let total = (1u64 << n) as f64;
        let p_value = exact_p_value(
            |q| lower_tail(&counts, q, total),
            |q| upper_tail(&counts, q, total),
            statistic.round() as i64,
            nf * (nf + 1.0) / 4.0,
            alternative,
        );
        return Ok(RankTestResult {
            statistic,
            p_value,
            method: PValueMethod::Exact,
        });
    }

    let z = statistic - nf * (nf + 1.0) / 4.0;
    let variance = nf * (nf + 1.0) * (2.0 * nf + 1.0) / 24.0 - tie_sum / 48.0;
    if variance <= 0.0 {
        return Err(DegenerateSample::ZeroVariance);
    }
    Ok(RankTestResult {
        statistic,
        p_value: normal_p_value(z, variance.sqrt(), alternative),
        method: PValueMethod::NormalApproximation,
    })
}

/// Two-sample Wilcoxon rank-sum (Mann-Whitney) test of `x` against `y`.
pub fn rank_sum_test(
    x: &[f64],
    y: &[f64],
    alternative: Alternative,
) -> Result<RankTestResult, DegenerateSample> {
    if x.is_empty() {
        return Err(DegenerateSample::EmptyGroup { group: "x" });
    }
    if y.is_empty() {
        return Err(DegenerateSample::EmptyGroup { group: "y" });
    }

    let (m, n) = (x.len(), y.len());
    let pooled: Vec<f64> = x.iter().chain(y).copied().collect();
    let ranks = average_ranks(&pooled);
    let (mf, nf) = (m as f64, n as f64);
    let statistic = ranks[..m].iter().sum::<f64>() - mf * (mf + 1.0) / 2.0;
    let (tie_sum, has_ties) = tie_adjustment(&ranks);

    if m < EXACT_THRESHOLD && n < EXACT_THRESHOLD && !has_ties {
        let counts: Vec<f64> = rank_sum_counts(m, n).into_iter().map(|c| c as f64).collect();
        let total: f64 = counts.iter().sum();
        let p_value = exact_p_value(
            |q| lower_tail(&counts, q, total),
            |q| upper_tail(&counts, q, total),
            statistic.round() as i64,
            mf * nf / 2.0,
            alternative,
        );
        return Ok(RankTestResult {
            statistic,
            p_value,
            method: PValueMethod::Exact,
        });
    }

    let big_n = mf + nf;
    let z = statistic - mf * nf / 2.0;
    let variance = (mf * nf / 12.0) * ((big_n + 1.0) - tie_sum / (big_n * (big_n - 1.0)));
    if variance <= 0.0 {
        return Err(DegenerateSample::ZeroVariance);
    }
    Ok(RankTestResult {
        statistic,
        p_value: normal_p_value(z, variance.sqrt(), alternative),
        method: PValueMethod::NormalApproximation,
    })
}
