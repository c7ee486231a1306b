//! Calibration against a reference dataset
//!
//! Reads per-sample pre/post Ki67 values from a CSV export and derives the
//! generator parameters from them: baseline location and scale, moments of
//! the log2 fold change, a Shapiro-Wilk check of its normality, and a
//! method-of-moments skew-normal fit. [`check_effect_model`] then asks
//! whether a chosen effect model reproduces the observed fold changes.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use rand::Rng;
use rand_distr::Distribution;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{check_probability, check_sample_size, SimError, SimResult};
use crate::generator::{Baseline, SkewNormalParams};
use crate::stats::{
    mean, shapiro_wilk, signed_rank_test, skewness, std_dev, Alternative, ShapiroWilk,
};

/// Cell contents treated as a missing measurement
const MISSING: [&str; 4] = ["", ".", "NA", "NaN"];

// =============================================================================
// Loading
// =============================================================================

/// Unit of the values stored in the CSV
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueScale {
    /// 0..100, divided by 100 on load
    #[default]
    Percent,
    /// Already in [0, 1]
    Fraction,
}

impl ValueScale {
    fn divisor(&self) -> f64 {
        match self {
            ValueScale::Percent => 100.0,
            ValueScale::Fraction => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub pre: String,
    pub post: String,
    pub scale: ValueScale,
}

impl Default for ColumnSpec {
    fn default() -> Self {
        Self {
            pre: "pre".to_string(),
            post: "post".to_string(),
            scale: ValueScale::Percent,
        }
    }
}

/// One subject's measurements, as fractions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairedObservation {
    pub pre: f64,
    pub post: f64,
}

impl PairedObservation {
    /// `log2(post / pre)`, `None` when either value is not positive
    pub fn log2_fold_change(&self) -> Option<f64> {
        (self.pre > 0.0 && self.post > 0.0).then(|| (self.post / self.pre).log2())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceDataset {
    pub observations: Vec<PairedObservation>,
    /// Rows with a missing pre or post value
    pub skipped_rows: usize,
}

impl ReferenceDataset {
    /// Load dataset from CSV file
    pub fn from_csv(path: &Path, columns: &ColumnSpec) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;

        Self::parse_csv(&content, columns)
    }

    /// Parse CSV content. Comma and semicolon delimiters are both accepted;
    /// a trailing `%` on a value is ignored.
    pub fn parse_csv(content: &str, columns: &ColumnSpec) -> Result<Self> {
        let mut lines = content.lines();

        let header = lines.next().context("Empty CSV file")?;
        let delimiter = if header.contains(';') && !header.contains(',') {
            ';'
        } else {
            ','
        };
        let names: Vec<&str> = header
            .split(delimiter)
            .map(|s| s.trim().trim_matches('"'))
            .collect();

        let pre_idx = names
            .iter()
            .position(|&c| c == columns.pre)
            .with_context(|| format!("Missing {} column", columns.pre))?;
        let post_idx = names
            .iter()
            .position(|&c| c == columns.post)
            .with_context(|| format!("Missing {} column", columns.post))?;

        let divisor = columns.scale.divisor();
        let mut observations = Vec::new();
        let mut skipped_rows = 0;

        for (line_num, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let values: Vec<&str> = line
                .split(delimiter)
                .map(|s| s.trim().trim_matches('"'))
                .collect();
            if values.len() != names.len() {
                bail!(
                    "Line {} has {} columns, expected {}",
                    line_num + 2,
                    values.len(),
                    names.len()
                );
            }

            let pre = parse_value(values[pre_idx], &columns.pre, line_num + 2)?;
            let post = parse_value(values[post_idx], &columns.post, line_num + 2)?;
            match (pre, post) {
                (Some(pre), Some(post)) => observations.push(PairedObservation {
                    pre: pre / divisor,
                    post: post / divisor,
                }),
                _ => skipped_rows += 1,
            }
        }

        if observations.is_empty() {
            bail!("No complete {}/{} pairs in CSV", columns.pre, columns.post);
        }

        Ok(Self {
            observations,
            skipped_rows,
        })
    }

    pub fn pre_values(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.pre).collect()
    }

    /// Fold changes of the rows where the log is defined
    pub fn log2_fold_changes(&self) -> Vec<f64> {
        self.observations
            .iter()
            .filter_map(PairedObservation::log2_fold_change)
            .collect()
    }
}

fn parse_value(raw: &str, column: &str, line: usize) -> Result<Option<f64>> {
    if MISSING.contains(&raw) {
        return Ok(None);
    }
    let value: f64 = raw
        .trim_end_matches('%')
        .trim()
        .parse()
        .with_context(|| format!("Invalid {} at line {}", column, line))?;
    if !value.is_finite() || value < 0.0 {
        bail!("Invalid {} at line {}: {}", column, line, raw);
    }
    Ok(Some(value))
}

// =============================================================================
// Parameter calibration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub pairs: usize,
    pub skipped_rows: usize,
    /// Pairs with a zero value, excluded from the fold-change summaries
    pub undefined_log2_fc: usize,
    /// Mean and sd of the pre values
    pub baseline: Baseline,
    pub log2_fc_mean: f64,
    pub log2_fc_sd: f64,
    pub log2_fc_skewness: Option<f64>,
    /// `None` below three fold changes or when they are all equal
    pub normality: Option<ShapiroWilk>,
    pub effect: SkewNormalParams,
}

pub fn calibrate(dataset: &ReferenceDataset) -> Result<Calibration> {
    let pre = dataset.pre_values();
    let lfc = dataset.log2_fold_changes();
    let undefined = dataset.observations.len() - lfc.len();
    if undefined > 0 {
        warn!(pairs = undefined, "pairs with a zero value have no log2 fold change");
    }

    let ki0 = mean(&pre).context("No baseline values")?;
    let sigma = std_dev(&pre).context("Need at least two baseline values")?;
    let lfc_mean = mean(&lfc).context("No defined log2 fold changes")?;
    let lfc_sd = std_dev(&lfc).context("Need at least two defined log2 fold changes")?;
    if !(lfc_sd > 0.0) {
        bail!("log2 fold changes have zero spread");
    }
    let lfc_skewness = skewness(&lfc);

    let calibration = Calibration {
        pairs: dataset.observations.len(),
        skipped_rows: dataset.skipped_rows,
        undefined_log2_fc: undefined,
        baseline: Baseline::new(ki0, sigma),
        log2_fc_mean: lfc_mean,
        log2_fc_sd: lfc_sd,
        log2_fc_skewness: lfc_skewness,
        normality: shapiro_wilk(&lfc),
        effect: SkewNormalParams::from_moments(lfc_mean, lfc_sd, lfc_skewness.unwrap_or(0.0)),
    };
    info!(
        pairs = calibration.pairs,
        ki0 = ki0,
        sigma = sigma,
        log2_fc_mean = lfc_mean,
        log2_fc_sd = lfc_sd,
        "calibrated against reference data"
    );
    Ok(calibration)
}

// =============================================================================
// Effect-model check
// =============================================================================

/// Agreement between simulated and observed fold changes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectModelCheck {
    pub repetitions: usize,
    /// Repetitions where the paired test did not reject
    pub accepted: usize,
    pub acceptance_rate: f64,
    /// Mean over every simulated fold change
    pub mean_simulated_log2_fc: f64,
}

/// Draw `reference.len()` fold changes from `effect`, pair them with the
/// reference values and run a two-sided signed-rank test, `repetitions`
/// times. A repetition is accepted when `p >= alpha`; a degenerate test
/// (all differences zero) is accepted as well.
pub fn check_effect_model<R: Rng + ?Sized>(
    reference: &[f64],
    effect: &SkewNormalParams,
    repetitions: usize,
    alpha: f64,
    rng: &mut R,
) -> SimResult<EffectModelCheck> {
    check_sample_size("reference", reference.len())?;
    check_sample_size("repetitions", repetitions)?;
    check_probability("alpha", alpha)?;
    if alpha == 0.0 || alpha == 1.0 {
        return Err(SimError::invalid("alpha", "must lie strictly inside (0, 1)"));
    }
    let dist = effect.distribution()?;

    let mut accepted = 0;
    let mut total = 0.0;
    for _ in 0..repetitions {
        let differences: Vec<f64> = reference
            .iter()
            .map(|r| {
                let simulated = dist.sample(rng);
                total += simulated;
                simulated - r
            })
            .collect();
        match signed_rank_test(&differences, Alternative::TwoSided) {
            Ok(result) if result.p_value < alpha => {}
            _ => accepted += 1,
        }
    }

    Ok(EffectModelCheck {
        repetitions,
        accepted,
        acceptance_rate: accepted as f64 / repetitions as f64,
        mean_simulated_log2_fc: total / (repetitions * reference.len()) as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use std::io::Write;

    #[test]
    fn test_parse_percentages() {
        let csv = "id,pre,post\n1,20,10\n2,8,2\n3,NA,4\n4,12.5%,5\n";
        let data = ReferenceDataset::parse_csv(csv, &ColumnSpec::default()).unwrap();
        assert_eq!(data.observations.len(), 3);
        assert_eq!(data.skipped_rows, 1);
        assert!((data.observations[0].pre - 0.2).abs() < 1e-12);
        assert!((data.observations[2].pre - 0.125).abs() < 1e-12);
        assert!((data.log2_fold_changes()[1] + 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_semicolon_and_custom_columns() {
        let csv = "Ki67_pre;Ki67_post\n0.2;0.1\n0.4;0.1\n";
        let columns = ColumnSpec {
            pre: "Ki67_pre".to_string(),
            post: "Ki67_post".to_string(),
            scale: ValueScale::Fraction,
        };
        let data = ReferenceDataset::parse_csv(csv, &columns).unwrap();
        assert_eq!(data.log2_fold_changes(), vec![-1.0, -2.0]);
    }

    #[test]
    fn test_parse_errors() {
        let columns = ColumnSpec::default();
        assert!(ReferenceDataset::parse_csv("", &columns).is_err());
        assert!(ReferenceDataset::parse_csv("pre,after\n1,2\n", &columns).is_err());
        assert!(ReferenceDataset::parse_csv("pre,post\n1\n", &columns).is_err());
        assert!(ReferenceDataset::parse_csv("pre,post\nabc,2\n", &columns).is_err());
        assert!(ReferenceDataset::parse_csv("pre,post\n-1,2\n", &columns).is_err());
        assert!(ReferenceDataset::parse_csv("pre,post\nNA,2\n", &columns).is_err());
    }

    #[test]
    fn test_calibrate_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pre,post").unwrap();
        for (pre, post) in [(10.0, 5.0), (20.0, 8.0), (6.0, 3.5), (15.0, 6.0), (8.0, 0.0)] {
            writeln!(file, "{},{}", pre, post).unwrap();
        }

        let data = ReferenceDataset::from_csv(file.path(), &ColumnSpec::default()).unwrap();
        let calibration = calibrate(&data).unwrap();
        assert_eq!(calibration.pairs, 5);
        assert_eq!(calibration.undefined_log2_fc, 1);
        assert!((calibration.baseline.ki0 - 0.118).abs() < 1e-12);
        assert!(calibration.log2_fc_mean < -0.7 && calibration.log2_fc_mean > -1.4);
        assert!(calibration.normality.is_some());
        // the fit reproduces the observed first two moments
        assert!((calibration.effect.mean() - calibration.log2_fc_mean).abs() < 1e-9);
        assert!((calibration.effect.variance().sqrt() - calibration.log2_fc_sd).abs() < 1e-9);
    }

    #[test]
    fn test_missing_file_has_context() {
        let path = Path::new("/nonexistent/ki67.csv");
        let err = ReferenceDataset::from_csv(path, &ColumnSpec::default()).unwrap_err();
        assert!(err.to_string().contains("Failed to read CSV file"));
    }

    #[test]
    fn test_effect_model_rejects_shifted_reference() {
        let effect = SkewNormalParams::new(-1.0, 0.6, -0.03);
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        // observed changes centred at +1, far from the model
        let reference: Vec<f64> = (0..17).map(|i| 1.0 + 0.05 * (i as f64 - 8.0)).collect();
        let check = check_effect_model(&reference, &effect, 50, 0.05, &mut rng).unwrap();
        assert_eq!(check.repetitions, 50);
        assert!(check.acceptance_rate < 0.05, "rate={}", check.acceptance_rate);
    }

    #[test]
    fn test_effect_model_argument_checks() {
        let effect = SkewNormalParams::new(-1.0, 0.6, -0.03);
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        assert!(check_effect_model(&[], &effect, 10, 0.05, &mut rng).is_err());
        assert!(check_effect_model(&[0.0], &effect, 0, 0.05, &mut rng).is_err());
        assert!(check_effect_model(&[0.0], &effect, 10, 0.0, &mut rng).is_err());
    }
}
