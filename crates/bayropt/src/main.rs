//! bayropt CLI
//!
//! Inspect and maintain the sample database of a tuning experiment, and
//! evaluate single points of its objective function.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, anyhow, bail};
use bayropt_core::config::{ExperimentConfig, ExperimentDatabase};
use bayropt_core::error::format_error_with_remediation;
use bayropt_core::generator::{remove_runs, sample_from_results};
use bayropt_core::logging::{LogConfig, LogLevel, init_logging};
use bayropt_core::params::display_params;
use bayropt_core::{OptimizerPoint, ParamHash, ParamValue, Sample, StorageError};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::debug;

#[derive(Parser)]
#[command(name = "bayropt")]
#[command(about = "Evaluation cache and objective function for Bayesian parameter tuning")]
#[command(version)]
struct Cli {
    /// Experiment file (YAML or TOML)
    #[arg(
        short,
        long,
        global = true,
        env = "BAYROPT_EXPERIMENT",
        default_value = "experiment.yaml"
    )]
    experiment: PathBuf,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Plain)]
    format: OutputFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate the objective function at one point (may run the pipeline)
    Evaluate {
        /// Optimized parameters as name=value
        #[arg(required = true)]
        assignments: Vec<String>,
    },

    /// List stored samples
    List,

    /// Remove stored samples by hash (or unique hash prefix)
    Remove {
        #[arg(required = true)]
        hashes: Vec<String>,
    },

    /// Import finished pipeline results directories
    Add {
        #[arg(required = true)]
        results: Vec<PathBuf>,

        /// Replace an existing sample with the same parameters or name
        #[arg(long = "override")]
        override_existing: bool,
    },

    /// Add a newly introduced parameter to every stored sample lacking it
    AddParam {
        name: String,

        /// Value that reproduces the behavior from before the parameter existed
        value: String,

        /// Apply the change; without it only the affected samples are counted
        #[arg(long)]
        yes: bool,
    },

    /// Check the index against the stored payloads
    Verify,

    /// Delete pipeline run directories that never made it into the database
    CleanRuns {
        /// Delete them; without it the directories are only listed
        #[arg(long)]
        yes: bool,
    },

    /// Print stored evaluations of this experiment in optimizer space
    Observations {
        /// Skip evaluations that scored zero
        #[arg(long)]
        only_nonzero: bool,
    },

    /// Show the best stored evaluation of this experiment
    Best,

    /// Print the resolved experiment configuration
    ShowConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = ExperimentConfig::load(&cli.experiment);
    let mut log_config = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_else(|_| LogConfig::default());
    if cli.verbose > 0 || cli.quiet {
        log_config.level = LogLevel::from_verbosity(cli.verbose, cli.quiet)
            .as_str()
            .to_string();
    }
    if let Err(err) = init_logging(&log_config) {
        eprintln!("warning: {err}");
    }

    let result = config
        .map_err(anyhow::Error::from)
        .and_then(|config| run(&cli, &config));

    match result {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

fn report_error(err: &anyhow::Error) {
    if let Some(core) = err.downcast_ref::<bayropt_core::Error>() {
        eprintln!("{}", format_error_with_remediation(core));
    } else {
        eprintln!("Error: {err:#}");
    }
}

fn run(cli: &Cli, config: &ExperimentConfig) -> anyhow::Result<ExitCode> {
    debug!(experiment = %cli.experiment.display(), "Running command");
    let format = cli.format;
    match &cli.command {
        Commands::Evaluate { assignments } => evaluate(config, assignments, format),
        Commands::List => list(config, format),
        Commands::Remove { hashes } => remove(config, hashes, format),
        Commands::Add {
            results,
            override_existing,
        } => add(config, results, *override_existing, format),
        Commands::AddParam { name, value, yes } => add_param(config, name, value, *yes, format),
        Commands::Verify => verify(config, format),
        Commands::CleanRuns { yes } => clean_runs(config, *yes, format),
        Commands::Observations { only_nonzero } => observations(config, *only_nonzero, format),
        Commands::Best => best(config, format),
        Commands::ShowConfig => show_config(config, format),
    }
}

// =============================================================================
// Commands
// =============================================================================

fn evaluate(
    config: &ExperimentConfig,
    assignments: &[String],
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    let point = parse_point(assignments)?;
    let mut objective = config.objective()?;
    let eval = objective.evaluate_point(&point)?;

    match format {
        OutputFormat::Json => print_json(&json!({
            "hash": eval.hash,
            "value": eval.value,
            "parameters": eval.params,
            "sample": eval.sample.name(),
        }))?,
        OutputFormat::Plain => {
            println!("value:      {}", eval.value);
            println!("hash:       {}", eval.hash);
            println!("sample:     {}", eval.sample.name().unwrap_or("-"));
            println!("parameters: {}", display_params(&eval.params));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn list(config: &ExperimentConfig, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let db = config.open_database()?;
    match format {
        OutputFormat::Json => {
            let records: Vec<_> = db
                .records()
                .map(|(hash, record)| {
                    json!({
                        "hash": hash,
                        "sample_name": record.sample_name,
                        "parameters": record.parameters,
                    })
                })
                .collect();
            print_json(&json!({
                "origin": db.origin(),
                "count": records.len(),
                "samples": records,
            }))?;
        }
        OutputFormat::Plain => {
            if db.is_empty() {
                println!("No samples stored in {}", db.index_path().display());
            } else {
                println!("{} {} samples:", db.len(), db.origin());
                for (hash, record) in db.records() {
                    println!(
                        "  {}  {}  {}",
                        hash.short(),
                        record.sample_name,
                        display_params(&record.parameters)
                    );
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn remove(
    config: &ExperimentConfig,
    hashes: &[String],
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    let mut db = config.open_database()?;
    let mut removed = Vec::new();
    for raw in hashes {
        let hash = resolve_hash(&db, raw)?;
        let record = db.remove_sample(&hash)?;
        removed.push(json!({ "hash": hash, "sample_name": record.sample_name }));
        if format == OutputFormat::Plain {
            println!("Removed {} ({})", hash.short(), record.sample_name);
        }
    }
    if format == OutputFormat::Json {
        print_json(&json!({ "removed": removed }))?;
    }
    Ok(ExitCode::SUCCESS)
}

fn add(
    config: &ExperimentConfig,
    results: &[PathBuf],
    override_existing: bool,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    let mut db = config.open_database()?;
    let mut added = Vec::new();
    for dir in results {
        let (params, mut sample) = sample_from_results(dir)?;
        let hash = db.add_sample(&mut sample, &params, override_existing)?;
        let name = sample.name().unwrap_or_default().to_string();
        if format == OutputFormat::Plain {
            println!("Added {} ({}) from {}", hash.short(), name, dir.display());
        }
        added.push(json!({ "hash": hash, "sample_name": name }));
    }
    if format == OutputFormat::Json {
        print_json(&json!({ "added": added }))?;
    }
    Ok(ExitCode::SUCCESS)
}

fn add_param(
    config: &ExperimentConfig,
    name: &str,
    raw_value: &str,
    yes: bool,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    let value = ParamValue::parse_loose(raw_value);
    let mut db = config.open_database()?;
    let affected = db
        .records()
        .filter(|(_, r)| !r.parameters.contains_key(name))
        .count();

    if !yes {
        match format {
            OutputFormat::Json => print_json(&json!({
                "param": name,
                "value": value,
                "affected": affected,
                "applied": false,
            }))?,
            OutputFormat::Plain => {
                println!("{affected} of {} samples lack '{name}'.", db.len());
                println!("Re-run with --yes to set {name} = {value} on them.");
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let patched = db.add_parameter(name, value.clone())?;
    match format {
        OutputFormat::Json => print_json(&json!({
            "param": name,
            "value": value,
            "affected": patched,
            "applied": true,
        }))?,
        OutputFormat::Plain => println!("Set {name} = {value} on {patched} samples."),
    }
    Ok(ExitCode::SUCCESS)
}

fn verify(config: &ExperimentConfig, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let db = config.open_database()?;
    let report = db.verify()?;
    match format {
        OutputFormat::Json => print_json(&json!({
            "clean": report.is_clean(),
            "report": report,
        }))?,
        OutputFormat::Plain => {
            println!("Checked {} records.", report.checked);
            for hash in &report.mismatched {
                println!("  hash mismatch:   {hash}");
            }
            for hash in &report.missing_payloads {
                println!("  missing payload: {hash}");
            }
            for path in &report.orphan_payloads {
                println!("  orphan payload:  {}", path.display());
            }
            if report.is_clean() {
                println!("Database is consistent.");
            }
        }
    }
    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn clean_runs(config: &ExperimentConfig, yes: bool, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let db = config.open_database()?;
    let runs = config.unrecorded_runs(&db)?;
    let removed = if yes { remove_runs(&runs)? } else { 0 };

    match format {
        OutputFormat::Json => print_json(&json!({
            "runs": runs,
            "count": runs.len(),
            "applied": yes,
            "removed": removed,
        }))?,
        OutputFormat::Plain => {
            for run in &runs {
                println!("  {}", run.display());
            }
            if runs.is_empty() {
                println!("No unrecorded run directories.");
            } else if yes {
                println!("Removed {removed} run directories.");
            } else {
                println!("{} run directories have no sample. Re-run with --yes to delete them.", runs.len());
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn observations(
    config: &ExperimentConfig,
    only_nonzero: bool,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    let objective = config.objective()?;
    let observations = objective.observations(only_nonzero)?;
    match format {
        OutputFormat::Json => print_json(&observations)?,
        OutputFormat::Plain => {
            if observations.is_empty() {
                println!("No stored evaluations for this experiment.");
            }
            for obs in &observations {
                let coords = obs
                    .point
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                println!("{:.6}  {}  {coords}", obs.value, obs.hash.short());
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn best(config: &ExperimentConfig, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let objective = config.objective()?;
    let Some(best) = objective.best()? else {
        match format {
            OutputFormat::Json => print_json(&serde_json::Value::Null)?,
            OutputFormat::Plain => println!("No stored evaluations for this experiment."),
        }
        return Ok(ExitCode::SUCCESS);
    };

    match format {
        OutputFormat::Json => print_json(&json!({
            "hash": best.hash(),
            "value": best.value,
            "parameters": best.params,
            "sample": best.sample.name(),
        }))?,
        OutputFormat::Plain => {
            println!("value:      {}", best.value);
            println!("hash:       {}", best.hash());
            println!("sample:     {}", best.sample.name().unwrap_or("-"));
            println!("parameters: {}", display_params(&best.params));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn show_config(config: &ExperimentConfig, format: OutputFormat) -> anyhow::Result<ExitCode> {
    match format {
        OutputFormat::Json => print_json(config)?,
        OutputFormat::Plain => {
            println!("database:   {}", config.database.index.display());
            println!("samples:    {}", config.database.sample_dir.display());
            println!("generator:  {}", config.generator.origin());
            println!("measure:    {}", config.measure.build().name());
            println!("defaults:   {}", display_params(&config.defaults));
            let optimized: BTreeSet<&str> = config.parameters.keys().map(String::as_str).collect();
            println!(
                "optimized:  {}",
                optimized.into_iter().collect::<Vec<_>>().join(", ")
            );
            println!("normalized: {}", config.normalization);
        }
    }
    Ok(ExitCode::SUCCESS)
}

// =============================================================================
// Helpers
// =============================================================================

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse `name=value` assignments into an optimizer point.
fn parse_point(assignments: &[String]) -> anyhow::Result<OptimizerPoint> {
    let mut point = OptimizerPoint::new();
    for assignment in assignments {
        let (name, value) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("expected name=value, got '{assignment}'"))?;
        let value: f64 = value
            .trim()
            .parse()
            .with_context(|| format!("value of '{name}' is not a number"))?;
        if point.insert(name.trim().to_string(), value).is_some() {
            bail!("parameter '{name}' given twice");
        }
    }
    Ok(point)
}

/// Resolve a full hash or a unique prefix of one.
fn resolve_hash(db: &ExperimentDatabase, raw: &str) -> anyhow::Result<ParamHash> {
    let raw = raw.trim().to_lowercase();
    if raw.is_empty() {
        bail!("empty sample hash");
    }
    let exact = ParamHash::from_hex(raw.clone());
    if db.contains_hash(&exact) {
        return Ok(exact);
    }
    let matches: Vec<&ParamHash> = db
        .records()
        .map(|(hash, _)| hash)
        .filter(|hash| hash.as_str().starts_with(&raw))
        .collect();
    match matches.as_slice() {
        [] => Err(bayropt_core::Error::from(StorageError::NotFound(raw)).into()),
        [only] => Ok((*only).clone()),
        _ => bail!("hash prefix '{raw}' matches {} samples", matches.len()),
    }
}
