//! Report rendering
//!
//! The sweep's structured records rendered as a Markdown power table (one
//! section per study) or as pretty JSON.

use serde::{Deserialize, Serialize};

use crate::aggregator::AggregationStrategy;
use crate::generator::{DesignParameters, SimulationParameters};
use crate::sweep::PowerEstimate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    #[default]
    Markdown,
    Json,
}

pub fn render(
    estimates: &[PowerEstimate],
    format: ReportFormat,
) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Markdown => Ok(power_table_markdown(estimates)),
        ReportFormat::Json => estimates_json(estimates),
    }
}

pub fn estimates_json(estimates: &[PowerEstimate]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(estimates)
}

/// Short human-readable label for a cell's design point
pub fn parameter_label(parameters: &SimulationParameters) -> String {
    match &parameters.design {
        DesignParameters::Paired { n, .. } => {
            format!("n={}, p_non={:.2}", n, parameters.p_non)
        }
        DesignParameters::TwoArm {
            n0,
            n1,
            treated_multiplier,
            dropout,
            ..
        } => format!(
            "n0={}, n1={}, m={:.2}, dropout={:.2}, p_non={:.2}",
            n0, n1, treated_multiplier, dropout, parameters.p_non
        ),
    }
}

fn strategy_label(strategy: AggregationStrategy) -> String {
    match strategy {
        AggregationStrategy::OuterRepetition { repetitions } => {
            format!("outer repetition x{} (sd)", repetitions)
        }
        AggregationStrategy::AnalyticBinomial => "analytic binomial (se)".to_string(),
    }
}

fn fmt_median(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}%", v * 100.0))
        .unwrap_or("---".into())
}

pub fn power_table_markdown(estimates: &[PowerEstimate]) -> String {
    let mut md = String::new();

    md.push_str("# Ki67 Power Simulation\n\n");
    md.push_str(&format!("- **Cells**: {}\n", estimates.len()));
    let degenerate: usize = estimates.iter().map(|e| e.summary.degenerate_replicates).sum();
    let out_of_range: usize = estimates.iter().map(|e| e.summary.out_of_range_values).sum();
    md.push_str(&format!("- **Degenerate replicates**: {}\n", degenerate));
    md.push_str(&format!("- **Values outside [0, 1]**: {}\n", out_of_range));

    // estimates arrive in cell order, so each study is one contiguous run
    let mut start = 0;
    while start < estimates.len() {
        let study = &estimates[start].study;
        let end = estimates[start..]
            .iter()
            .position(|e| &e.study != study)
            .map_or(estimates.len(), |offset| start + offset);
        let group = &estimates[start..end];

        md.push_str(&format!("\n## {}\n\n", study));
        md.push_str(&format!(
            "Aggregation: {}, {} replicates per batch\n\n",
            strategy_label(group[0].strategy),
            group[0].summary.replicates_per_batch
        ));
        md.push_str("| Cell | Parameters | Power | SD/SE | CI | Median ref | Median treated |\n");
        md.push_str("|------|------------|-------|-------|----|------------|----------------|\n");
        for e in group {
            let s = &e.summary;
            md.push_str(&format!(
                "| {} | {} | {:.3} | {:.4} | [{:.3}, {:.3}] | {} | {} |\n",
                e.cell,
                parameter_label(&e.parameters),
                s.power,
                s.power_sd_or_se,
                s.ci_lower,
                s.ci_upper,
                fmt_median(s.mean_median_reference),
                fmt_median(s.mean_median_treated),
            ));
        }
        start = end;
    }

    md
}
