// Ki67 power simulation CLI
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ki67power::calibration::{
    calibrate, check_effect_model, ColumnSpec, ReferenceDataset, ValueScale,
};
use ki67power::report::{render, ReportFormat};
use ki67power::{run_config, RunConfig, SkewNormalParams};

#[derive(Parser)]
#[command(name = "ki67power")]
#[command(version)]
#[command(about = "Monte Carlo power simulation for Ki67 biomarker trials", long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the power sweep
    Run {
        /// JSON run configuration (built-in studies when omitted)
        #[arg(short, long, value_name = "CONFIG")]
        config: Option<PathBuf>,

        /// Override the run seed
        #[arg(long)]
        seed: Option<u64>,

        /// Override the worker-pool size
        #[arg(short, long)]
        workers: Option<usize>,

        /// Override the replicates per batch
        #[arg(short, long)]
        replicates: Option<usize>,

        /// Output file (defaults to stdout)
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,

        /// Report format (markdown or json)
        #[arg(short, long, default_value = "markdown")]
        format: String,
    },

    /// Calibrate generator parameters against a reference CSV
    Calibrate {
        /// CSV with one row per subject
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[arg(long, default_value = "pre")]
        pre_column: String,

        #[arg(long, default_value = "post")]
        post_column: String,

        /// Values are fractions in [0, 1] rather than percentages
        #[arg(long)]
        fractions: bool,

        /// Repetitions of the effect-model check
        #[arg(long, default_value = "1000")]
        repetitions: usize,

        /// Check the fitted skew-normal instead of the default effect model
        #[arg(long)]
        use_fit: bool,

        #[arg(long, default_value = "0.05")]
        alpha: f64,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output JSON file (defaults to stdout)
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Print the built-in run configuration as JSON
    DefaultConfig {
        /// Output file (defaults to stdout)
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Run {
            config,
            seed,
            workers,
            replicates,
            output,
            format,
        } => run_command(config, seed, workers, replicates, output, format),
        Commands::Calibrate {
            input,
            pre_column,
            post_column,
            fractions,
            repetitions,
            use_fit,
            alpha,
            seed,
            output,
        } => {
            let columns = ColumnSpec {
                pre: pre_column,
                post: post_column,
                scale: if fractions {
                    ValueScale::Fraction
                } else {
                    ValueScale::Percent
                },
            };
            calibrate_command(input, columns, repetitions, use_fit, alpha, seed, output)
        }
        Commands::DefaultConfig { output } => {
            let json = RunConfig::default().to_json()?;
            write_output(output.as_deref(), &json)
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log level: {}", level))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(())
}

fn write_output(output: Option<&Path>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, content)
                .with_context(|| format!("Failed to write output file: {}", path.display()))?;
            info!(path = %path.display(), "wrote report");
        }
        None => println!("{}", content),
    }
    Ok(())
}

fn run_command(
    config: Option<PathBuf>,
    seed: Option<u64>,
    workers: Option<usize>,
    replicates: Option<usize>,
    output: Option<PathBuf>,
    format: String,
) -> Result<()> {
    let format = match format.as_str() {
        "markdown" | "md" => ReportFormat::Markdown,
        "json" => ReportFormat::Json,
        other => bail!("Unknown report format: {} (expected markdown or json)", other),
    };

    let mut config = match config {
        Some(path) => RunConfig::from_path(&path)?,
        None => RunConfig::default(),
    };
    if let Some(seed) = seed {
        config.seed = seed;
    }
    if let Some(workers) = workers {
        config.workers = workers;
    }
    if let Some(replicates) = replicates {
        config.replicates = replicates;
    }

    let estimates = run_config(&config).context("Power sweep failed")?;
    let report = render(&estimates, format)?;
    write_output(output.as_deref(), &report)
}

fn calibrate_command(
    input: PathBuf,
    columns: ColumnSpec,
    repetitions: usize,
    use_fit: bool,
    alpha: f64,
    seed: u64,
    output: Option<PathBuf>,
) -> Result<()> {
    let dataset = ReferenceDataset::from_csv(&input, &columns)?;
    let calibration = calibrate(&dataset)?;

    let effect = if use_fit {
        calibration.effect
    } else {
        SkewNormalParams::new(-1.0, 0.6, -0.03)
    };
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let check = check_effect_model(
        &dataset.log2_fold_changes(),
        &effect,
        repetitions,
        alpha,
        &mut rng,
    )?;
    info!(
        acceptance_rate = check.acceptance_rate,
        mean_simulated_log2_fc = check.mean_simulated_log2_fc,
        "effect-model check complete"
    );

    let report = json!({
        "input": input.display().to_string(),
        "calibration": calibration,
        "effect_model": effect,
        "effect_model_check": check,
    });
    write_output(output.as_deref(), &serde_json::to_string_pretty(&report)?)
}
