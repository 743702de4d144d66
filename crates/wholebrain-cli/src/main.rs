//! # Whole-brain CLI
//!
//! Fit the Chen-Campbell whole-brain model to an empirical fMRI cohort.

mod config;
mod data;
mod output;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use wholebrain_chen_campbell::{ChenCampbell, ModelConstants};
use wholebrain_core::{ParamPoint, Reparameterize};
use wholebrain_fitting::{
    BandPassed, BoldSimulation, DistanceMetric, ParameterSweep, RunContext, SlidingWindowFcd,
    StaticFc, SubjectSimulator, SweepOutcome, TrWindowMean,
};
use wholebrain_heun::{Simulation, StimulusSpec};

#[derive(Parser)]
#[command(name = "wholebrain")]
#[command(version = "0.1.0")]
#[command(about = "Whole-brain model fitting to fMRI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep the configured parameter and fit FC / swFCD
    Run {
        /// Configuration file
        config: PathBuf,
        /// Override the output file suffix
        #[arg(short, long)]
        suffix: Option<String>,
    },

    /// Simulate one subject at the fixed parameters and write its BOLD series
    Simulate {
        /// Configuration file
        config: PathBuf,
        /// Extra parameter, as NAME=VALUE (repeatable)
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,
        /// Output file
        #[arg(short, long, default_value = "simulated.json")]
        output: PathBuf,
    },

    /// Write a default configuration
    InitConfig {
        #[arg(default_value = "wholebrain.json")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, suffix } => run(&config, suffix),
        Commands::Simulate {
            config,
            params,
            output,
        } => simulate(&config, &params, &output),
        Commands::InitConfig { path, force } => {
            if path.exists() && !force {
                bail!("{} exists; pass --force to overwrite", path.display());
            }
            Config::default().save(&path)?;
            println!(
                "{} {}",
                "Wrote default configuration:".green().bold(),
                path.display()
            );
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load(path).with_context(|| format!("loading configuration {}", path.display()))
}

fn base_model(config: &Config, sc: Array2<f64>) -> anyhow::Result<ChenCampbell> {
    Ok(ChenCampbell::new(sc)?.with_constants(ModelConstants::from(&config.model)))
}

fn bold_simulation(
    config: &Config,
) -> anyhow::Result<BoldSimulation<TrWindowMean, StimulusSpec>> {
    Ok(BoldSimulation {
        simulation: Simulation::new(config.simulation_params())?,
        hemodynamics: TrWindowMean::new(config.bold.clone()),
        stimulus: config.stimulus,
        observed_index: config.observed.index(),
    })
}

fn progress_bar(total: usize) -> anyhow::Result<ProgressBar> {
    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} runs ({eta})",
        )?
        .progress_chars("#>-"),
    );
    Ok(bar)
}

/// FC and swFCD, band-passed when the configuration asks for it
fn metrics(config: &Config) -> anyhow::Result<Vec<Box<dyn DistanceMetric>>> {
    let fcd = SlidingWindowFcd {
        window: config.sweep.fcd_window,
        step: config.sweep.fcd_step,
    };
    let metrics: Vec<Box<dyn DistanceMetric>> = match config.band_pass()? {
        Some(filter) => vec![
            Box::new(BandPassed::new(filter.clone(), StaticFc)),
            Box::new(BandPassed::new(filter, fcd)),
        ],
        None => vec![Box::new(StaticFc), Box::new(fcd)],
    };
    Ok(metrics)
}

fn run(config_path: &Path, suffix: Option<String>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(suffix) = suffix {
        config.output.suffix = suffix;
    }

    println!(
        "{} {}",
        "Loading data:".green().bold(),
        config.data.subjects_path.display()
    );
    let (sc, cohort) = data::load(&config.data).context("loading empirical data")?;
    println!(
        "  {} regions, {} subjects ({} excluded)",
        sc.nrows(),
        cohort.ids.len(),
        cohort.excluded.len()
    );
    if cohort.series.is_empty() {
        bail!("no subject data left after exclusions");
    }

    let base = base_model(&config, sc)?;
    let simulator = bold_simulation(&config)?;
    let metrics = metrics(&config)?;

    let grid = config.sweep.points()?;
    let total = grid.len() * config.sweep.simulated_subjects;
    let mut sweep =
        ParameterSweep::new(&config.sweep.label, grid, config.sweep.simulated_subjects)
            .with_seed(config.simulation.seed)
            .with_progress(progress_bar(total)?);
    if let Some(threads) = config.sweep.threads {
        sweep = sweep.with_threads(threads);
    }

    println!(
        "{} {} over {} points x {} subjects",
        "Sweeping".green().bold(),
        sweep.label().cyan(),
        sweep.grid().len(),
        config.sweep.simulated_subjects
    );
    let outcome = sweep
        .run(&base, &simulator, &cohort.series, &metrics)
        .context("parameter sweep")?;

    let path = config.output.path();
    output::write_outcome(&outcome, &path)?;
    print_summary(&outcome);
    println!("{} {}", "Results:".green().bold(), path.display());
    Ok(())
}

fn print_summary(outcome: &SweepOutcome) {
    println!();
    println!("{}", "Optimal values:".green().bold());
    for (metric, curve) in &outcome.curves {
        match outcome.optima.get(metric) {
            Some(best) => println!(
                "  {:<6} {} = {:.4}  (score {:.4}, {:?})",
                metric.cyan(),
                outcome.label,
                best.value,
                best.score,
                best.direction
            ),
            None => println!("  {:<6} {}", metric.cyan(), "no valid score".red()),
        }
        let missing = curve.iter().filter(|s| s.is_none()).count();
        if missing > 0 {
            let note = format!("{missing} of {} points unscored", curve.len());
            println!("         {}", note.yellow());
        }
    }
    for failure in &outcome.failures {
        let scope = failure.metric.as_deref().unwrap_or("run");
        println!(
            "  {} {} = {} [{}]: {}",
            "failed".red(),
            outcome.label,
            failure.value,
            scope,
            failure.reason
        );
    }
}

fn parse_param(arg: &str) -> anyhow::Result<(String, f64)> {
    let Some((name, value)) = arg.split_once('=') else {
        bail!("expected NAME=VALUE, got '{arg}'");
    };
    let value = value
        .trim()
        .parse()
        .with_context(|| format!("parameter '{name}' is not a number"))?;
    Ok((name.trim().to_string(), value))
}

fn simulate(config_path: &Path, params: &[String], output_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let sc = data::load_connectivity(&config.data.sc_path, config.data.sc_scale)
        .context("loading structural connectivity")?;

    let mut point: ParamPoint = config.sweep.fixed.clone();
    for arg in params {
        let (name, value) = parse_param(arg)?;
        point.insert(name, value);
    }
    let model = base_model(&config, sc)?.with_parameters(&point)?;

    println!("{} G = {}, J = {}", "Simulating".green().bold(), model.g, model.j);
    let simulator = bold_simulation(&config)?;
    let bold = simulator.simulate(&model, RunContext::single(config.simulation.seed))?;

    let series = output::SimulatedSeries::new(point, config.bold.tr, &bold);
    output::write_series(&series, output_path)?;
    println!(
        "{} {} regions x {} samples -> {}",
        "Done:".green().bold(),
        bold.nrows(),
        bold.ncols(),
        output_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("J=1.25").unwrap(), ("J".to_string(), 1.25));
        assert_eq!(parse_param(" we = 700.2").unwrap(), ("we".to_string(), 700.2));
        assert!(parse_param("J").is_err());
        assert!(parse_param("J=abc").is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli =
            Cli::try_parse_from(["wholebrain", "run", "cfg.json", "--suffix", "_rest"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { suffix: Some(ref s), .. } if s == "_rest"));

        let args = ["wholebrain", "simulate", "cfg.json", "-p", "J=1.1", "-p", "we=700"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(cli.command, Commands::Simulate { ref params, .. } if params.len() == 2));

        let cli = Cli::try_parse_from(["wholebrain", "init-config"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::InitConfig { ref path, force: false } if path == Path::new("wholebrain.json")
        ));
    }

    #[test]
    fn test_metrics_keep_names_with_band_pass() {
        fn names(metrics: &[Box<dyn DistanceMetric>]) -> Vec<String> {
            metrics.iter().map(|m| m.name().to_string()).collect()
        }
        let mut config = Config::default();
        assert!(config.bold.band.is_some());
        assert_eq!(names(&metrics(&config).unwrap()), ["FC", "swFCD"]);

        config.bold.band = None;
        assert_eq!(names(&metrics(&config).unwrap()), ["FC", "swFCD"]);

        config.bold.band = Some((0.02, 0.4));
        assert!(metrics(&config).is_err());
    }

    #[test]
    fn test_sweep_over_small_cohort() {
        let dir = tempfile::tempdir().unwrap();
        let sc_path = dir.path().join("sc.json");
        std::fs::write(&sc_path, "[[0, 1, 0.5], [1, 0, 0.2], [0.5, 0.2, 0]]").unwrap();

        let mut config = Config::default();
        config.simulation.t_max = 0.4;
        config.simulation.warm_up = wholebrain_core::WarmUp::Duration(0.02);
        config.bold.tr = 0.01;
        config.bold.band = None;
        config.sweep.grid = config::GridSpec::Values(vec![0.9, 1.0]);
        config.sweep.simulated_subjects = 1;
        config.sweep.fcd_window = 10;
        config.sweep.fcd_step = 5;
        config.data.sc_path = sc_path;
        config.data.time_points = None;
        config.validate().unwrap();

        let sc = data::load_connectivity(&config.data.sc_path, config.data.sc_scale).unwrap();
        let base = base_model(&config, sc).unwrap();
        let simulator = bold_simulation(&config).unwrap();
        let empirical = vec![simulator
            .simulate(&base, RunContext::single(0))
            .unwrap()];
        assert_eq!(empirical[0].dim(), (3, 40));

        let metrics: Vec<Box<dyn DistanceMetric>> = vec![Box::new(StaticFc)];
        let outcome = ParameterSweep::new("J", config.sweep.points().unwrap(), 1)
            .run(&base, &simulator, &empirical, &metrics)
            .unwrap();
        assert_eq!(outcome.values, vec![0.9, 1.0]);

        let path = dir.path().join("out").join("fitting.json");
        output::write_outcome(&outcome, &path).unwrap();
        assert!(path.exists());
    }
}
