//! End-to-end scenarios: reproducibility, the effect-model check and the
//! two-arm median shift

use ki67power::calibration::check_effect_model;
use ki67power::rng::cell_rng;
use ki67power::stats::{median, normal_quantile};
use ki67power::{
    run_config, run_sweep, Baseline, RunConfig, SimulationParameters, SkewNormalParams,
    SweepSettings, SyntheticSample,
};

fn effect() -> SkewNormalParams {
    SkewNormalParams::new(-1.0, 0.6, -0.03)
}

fn small_config() -> RunConfig {
    let json = r#"{
        "seed": 11,
        "workers": 1,
        "replicates": 60,
        "studies": [
            {
                "label": "paired",
                "design": "paired",
                "baseline": { "ki0": 0.065, "sigma": 0.19 },
                "effect": { "location": -1.0, "scale": 0.6, "shape": -0.03 },
                "n_values": [5, 10],
                "p_non_values": [0.0, 0.3],
                "aggregation": { "strategy": "outer_repetition", "repetitions": 3 }
            },
            {
                "label": "two_arm",
                "design": "two_arm",
                "baseline": { "ki0": 0.065, "sigma": 0.19 },
                "n_values": [10, 20],
                "p_non_values": [0.05],
                "location_multipliers": [0.25],
                "dropout_values": [0.1]
            }
        ]
    }"#;
    RunConfig::from_json(json).unwrap()
}

#[test]
fn test_same_seed_gives_identical_samples_and_outcomes() {
    let params = SimulationParameters::paired(Baseline::new(0.065, 0.19), 12, 0.2, effect());
    let generator = params.generator().unwrap();
    let evaluator = ki67power::TrialEvaluator::two_sided(0.05).unwrap();

    let draw = |seed: u64| {
        let mut rng = cell_rng(seed, 4);
        (0..25)
            .map(|_| {
                let sample = generator.generate(&mut rng);
                let outcome = evaluator.evaluate(&sample);
                (sample, outcome)
            })
            .collect::<Vec<_>>()
    };

    let first = draw(42);
    let second = draw(42);
    assert_eq!(first, second);
    assert_ne!(first, draw(43));
}

#[test]
fn test_sweep_independent_of_worker_count() {
    let config = small_config();
    let cells = config.cells().unwrap();
    let one = run_sweep(
        &cells,
        &SweepSettings {
            workers: 1,
            ..SweepSettings::from_config(&config)
        },
    )
    .unwrap();
    let four = run_sweep(
        &cells,
        &SweepSettings {
            workers: 4,
            ..SweepSettings::from_config(&config)
        },
    )
    .unwrap();
    assert_eq!(one.len(), 6);
    assert_eq!(one, four);
}

#[test]
fn test_run_config_reports_every_cell() {
    let estimates = run_config(&small_config()).unwrap();
    assert_eq!(estimates.len(), 6);
    assert!(estimates.iter().all(|e| (0.0..=1.0).contains(&e.power())));
    assert_eq!(estimates[0].summary.batches, 3);
    assert_eq!(estimates[5].summary.batches, 1);
    // n = 5 cannot reach p < 0.05 with an exact two-sided signed-rank test
    assert_eq!(estimates[0].power(), 0.0);
}

#[test]
fn test_effect_model_reproduces_reference_fold_changes() {
    // 17 observed fold changes at the normal scores of the model
    let n = 17;
    let reference: Vec<f64> = (1..=n)
        .map(|i| -1.0 + 0.6 * normal_quantile((i as f64 - 0.5) / n as f64))
        .collect();
    let mut rng = cell_rng(17, 0);
    let check = check_effect_model(&reference, &effect(), 1_000, 0.05, &mut rng).unwrap();

    assert_eq!(check.repetitions, 1_000);
    assert!(
        (check.mean_simulated_log2_fc + 1.0).abs() < 0.05,
        "mean log2 fc {}",
        check.mean_simulated_log2_fc
    );
    assert!(check.acceptance_rate > 0.9, "acceptance {}", check.acceptance_rate);
}

#[test]
fn test_treated_median_below_reference_median() {
    // 75% location reduction, 5% non-responders, no dropout
    let generator =
        SimulationParameters::two_arm(Baseline::new(0.065, 0.19), 20, 20, 0.05, 0.25, 0.0)
            .generator()
            .unwrap();
    let mut rng = cell_rng(3, 0);
    let runs = 500;
    let lower = (0..runs)
        .filter(|_| match generator.generate(&mut rng) {
            SyntheticSample::TwoArm(sample) => {
                median(&sample.treated_values()) < median(&sample.reference_values())
            }
            SyntheticSample::Paired(_) => false,
        })
        .count();
    assert!(
        lower as f64 / runs as f64 > 0.95,
        "treated median lower in {}/{} runs",
        lower,
        runs
    );
}
