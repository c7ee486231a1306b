//! Parallel sweep over grid cells
//!
//! One rayon task per cell on a dedicated pool of fixed size. Cells share
//! nothing but read-only parameters; each draws from its own stream
//! (see [`crate::rng`]). The collect is the join: either every cell
//! produced an estimate or the run failed.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregator::{estimate_power, AggregationSettings, AggregationStrategy, PowerSummary};
use crate::config::RunConfig;
use crate::error::{check_sample_size, SimError, SimResult};
use crate::generator::SimulationParameters;
use crate::grid::GridCell;
use crate::rng::cell_rng;

/// Structured record per grid cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerEstimate {
    pub cell: usize,
    pub study: String,
    pub parameters: SimulationParameters,
    pub strategy: AggregationStrategy,
    #[serde(flatten)]
    pub summary: PowerSummary,
}

impl PowerEstimate {
    pub fn power(&self) -> f64 {
        self.summary.power
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepSettings {
    pub seed: u64,
    pub workers: usize,
    pub aggregation: AggregationSettings,
}

impl SweepSettings {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            seed: config.seed,
            workers: config.workers,
            aggregation: config.aggregation_settings(),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run `task` for `cell`, turning a panic into `WorkerFailed`
fn guarded<F>(cell: usize, task: F) -> SimResult<PowerEstimate>
where
    F: FnOnce() -> SimResult<PowerEstimate>,
{
    catch_unwind(AssertUnwindSafe(task)).unwrap_or_else(|payload| {
        Err(SimError::WorkerFailed {
            cell,
            message: panic_message(payload.as_ref()),
        })
    })
}

/// One task per cell on a fresh pool; the first failure fails the run
fn run_on_pool<F>(cells: &[GridCell], workers: usize, task: F) -> SimResult<Vec<PowerEstimate>>
where
    F: Fn(&GridCell) -> SimResult<PowerEstimate> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("powersim-{}", i))
        .build()?;

    pool.install(|| {
        cells
            .par_iter()
            .map(|cell| guarded(cell.index, || task(cell)))
            .collect::<SimResult<Vec<_>>>()
    })
}

/// Simulate one cell on its own stream
pub fn run_cell(cell: &GridCell, settings: &SweepSettings) -> SimResult<PowerEstimate> {
    let generator = cell.parameters.generator()?;
    let mut rng = cell_rng(settings.seed, cell.index);
    let summary = estimate_power(
        cell.index,
        &generator,
        &cell.evaluator,
        cell.strategy,
        &settings.aggregation,
        &mut rng,
    )?;

    if summary.degenerate_replicates > 0 {
        warn!(
            cell = cell.index,
            study = %cell.study,
            degenerate = summary.degenerate_replicates,
            policy = ?settings.aggregation.degenerate_policy,
            "degenerate replicates in cell"
        );
    }
    if summary.out_of_range_values > 0 {
        warn!(
            cell = cell.index,
            study = %cell.study,
            values = summary.out_of_range_values,
            "treated values outside [0, 1]"
        );
    }
    debug!(cell = cell.index, study = %cell.study, power = summary.power, "cell complete");

    Ok(PowerEstimate {
        cell: cell.index,
        study: cell.study.clone(),
        parameters: cell.parameters.clone(),
        strategy: cell.strategy,
        summary,
    })
}

/// Evaluate every cell on a pool of `settings.workers` threads.
///
/// Parameters are validated before the pool starts. Results come back in
/// cell order.
pub fn run_sweep(cells: &[GridCell], settings: &SweepSettings) -> SimResult<Vec<PowerEstimate>> {
    check_sample_size("workers", settings.workers)?;
    settings.aggregation.validate()?;
    for cell in cells {
        cell.parameters.validate()?;
        cell.evaluator.validate()?;
        cell.strategy.validate()?;
    }

    info!(
        cells = cells.len(),
        workers = settings.workers,
        seed = settings.seed,
        replicates = settings.aggregation.replicates,
        "starting power sweep"
    );
    let started = Instant::now();

    let estimates = run_on_pool(cells, settings.workers, |cell| run_cell(cell, settings))?;

    info!(
        cells = estimates.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "power sweep complete"
    );
    Ok(estimates)
}

/// Expand the config and run it
pub fn run_config(config: &RunConfig) -> SimResult<Vec<PowerEstimate>> {
    let cells = config.cells()?;
    run_sweep(&cells, &SweepSettings::from_config(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::DegeneratePolicy;
    use crate::evaluator::TrialEvaluator;
    use crate::generator::{Baseline, SkewNormalParams};

    fn cell(index: usize, n: usize) -> GridCell {
        GridCell {
            index,
            study: "test".to_string(),
            parameters: SimulationParameters::paired(
                Baseline::new(0.065, 0.19),
                n,
                0.2,
                SkewNormalParams::new(-1.0, 0.6, -0.03),
            ),
            evaluator: TrialEvaluator::two_sided(0.05).unwrap(),
            strategy: AggregationStrategy::OuterRepetition { repetitions: 3 },
        }
    }

    fn settings(workers: usize) -> SweepSettings {
        SweepSettings {
            seed: 99,
            workers,
            aggregation: AggregationSettings {
                replicates: 50,
                confidence_level: 0.95,
                degenerate_policy: DegeneratePolicy::CountAsNonRejection,
            },
        }
    }

    #[test]
    fn test_results_in_cell_order() {
        let cells: Vec<GridCell> = (0..6).map(|i| cell(i, 5 + i)).collect();
        let estimates = run_sweep(&cells, &settings(3)).unwrap();
        assert_eq!(estimates.len(), 6);
        for (i, e) in estimates.iter().enumerate() {
            assert_eq!(e.cell, i);
            assert_eq!(e.parameters.group_sizes(), (5 + i, 5 + i));
        }
    }

    #[test]
    fn test_invalid_cell_fails_before_running() {
        let cells = vec![cell(0, 10), cell(1, 0)];
        let err = run_sweep(&cells, &settings(2)).unwrap_err();
        assert!(matches!(err, SimError::InvalidParameter { name: "n", .. }));
    }

    #[test]
    fn test_invalid_evaluator_fails_before_running() {
        let mut bad = cell(1, 10);
        bad.evaluator = TrialEvaluator {
            alpha: 2.0,
            ..bad.evaluator
        };
        let err = run_sweep(&[cell(0, 10), bad], &settings(2)).unwrap_err();
        assert!(matches!(err, SimError::InvalidParameter { name: "alpha", .. }));
    }

    #[test]
    fn test_panicking_cell_fails_the_whole_run() {
        let cells: Vec<GridCell> = (0..4).map(|i| cell(i, 8)).collect();
        let sweep = settings(2);
        let result = run_on_pool(&cells, 2, |c| {
            if c.index == 2 {
                panic!("cell blew up");
            }
            run_cell(c, &sweep)
        });
        match result {
            Err(SimError::WorkerFailed { cell, message }) => {
                assert_eq!(cell, 2);
                assert_eq!(message, "cell blew up");
            }
            other => panic!("expected worker failure, got {:?}", other),
        }
    }

    #[test]
    fn test_guarded_passes_results_through() {
        let err = guarded(5, || Err(SimError::invalid("n", "bad"))).unwrap_err();
        assert!(matches!(err, SimError::InvalidParameter { name: "n", .. }));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = run_sweep(&[cell(0, 10)], &settings(0)).unwrap_err();
        assert!(matches!(err, SimError::InvalidParameter { name: "workers", .. }));
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
