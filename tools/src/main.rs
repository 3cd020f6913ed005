//! feature-runner: headless runner for the client feature pipeline.
//!
//! Usage:
//!   feature-runner run                       # transform, then upload (with retries)
//!   feature-runner transform                 # transform task once
//!   feature-runner upload                    # upload task once
//!   feature-runner restore --dump-file dump.sql
//!   feature-runner inspect [path]
//!
//! Configuration comes from `--config <file.json>` or from the environment
//! (a `.env` file is loaded first when present).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_features_core::{
    artifact::{read_artifact, ArtifactWriter},
    clock::RunClock,
    config::{DatabaseConfig, PipelineConfig, RetryPolicy, SourceConfig},
    decision::DecisionSummary,
    engine::{transform_task, upload_task, PipelineEngine},
    event::{PipelineEvent, RunReport},
    restore::restore_database,
};
use std::path::{Path, PathBuf};

const DEFAULT_ENV_FILE: &str = ".env";

#[derive(Parser)]
#[command(name = "feature-runner", version, about = "Client feature ETL runner")]
struct Cli {
    /// JSON configuration file. Environment variables are used when absent.
    #[arg(long, global = true, env = "FEATURE_RUNNER_CONFIG")]
    config: Option<PathBuf>,

    /// Dotenv file loaded before reading the environment.
    #[arg(long, global = true, default_value = DEFAULT_ENV_FILE)]
    env_file: PathBuf,

    /// Print the run report as JSON instead of the text summary.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Transform then upload, applying the configured retry policy per task.
    Run,
    /// Extract, decide and write the Parquet artifact (single attempt).
    Transform,
    /// Upload the existing Parquet artifact (single attempt).
    Upload,
    /// Drop, recreate and reload the source database. Destructive.
    Restore {
        #[arg(long)]
        dump_file: PathBuf,
    },
    /// Summarise an artifact. Defaults to the configured output file.
    Inspect { path: Option<PathBuf> },
}

fn main() {
    // The dotenv file may set RUST_LOG and FEATURE_RUNNER_CONFIG, so it is
    // loaded before the logger and before clap reads the environment.
    let env_file = env_file_arg(std::env::args());
    let loaded = load_env_file(&env_file);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = loaded.and_then(|()| run()) {
        log::error!("{e:#}");
        std::process::exit(1);
    }
}

/// Value of `--env-file` scanned from raw arguments, before clap runs.
fn env_file_arg(args: impl IntoIterator<Item = String>) -> PathBuf {
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--" {
            break;
        }
        if arg == "--env-file" {
            if let Some(value) = args.next() {
                return PathBuf::from(value);
            }
        } else if let Some(value) = arg.strip_prefix("--env-file=") {
            return PathBuf::from(value);
        }
    }
    PathBuf::from(DEFAULT_ENV_FILE)
}

fn load_env_file(path: &Path) -> Result<()> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    match &cli.config {
        Some(path) => Ok(PipelineConfig::load(path)?),
        None => PipelineConfig::from_env().context("loading configuration from environment"),
    }
}

/// Restore only needs the database settings; output and object store
/// variables are not required.
fn load_restore_target(cli: &Cli) -> Result<DatabaseConfig> {
    match &cli.config {
        Some(path) => match PipelineConfig::load(path)?.source {
            SourceConfig::Postgres(db) => Ok(db),
            SourceConfig::Sqlite { .. } => bail!("restore requires a postgres source"),
        },
        None => DatabaseConfig::from_env().context("loading database settings from environment"),
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    log::debug!("Environment file: {}", cli.env_file.display());

    match &cli.command {
        Cmd::Run => {
            let config = load_config(&cli)?;
            let mut engine = PipelineEngine::build(&config, RunClock::start())?;
            let report = engine.run()?;
            print_report(&report, cli.json)?;
        }
        Cmd::Transform => {
            let config = load_config(&cli)?;
            let mut engine = PipelineEngine::new(RunClock::start(), RetryPolicy::none());
            engine.register(Box::new(transform_task(&config)));
            let report = engine.run()?;
            print_report(&report, cli.json)?;
        }
        Cmd::Upload => {
            let config = load_config(&cli)?;
            let mut engine = PipelineEngine::new(RunClock::start(), RetryPolicy::none());
            engine.register(Box::new(upload_task(&config)?));
            let report = engine.run()?;
            print_report(&report, cli.json)?;
        }
        Cmd::Restore { dump_file } => {
            let db = load_restore_target(&cli)?;
            restore_database(&db, dump_file)
                .with_context(|| format!("restoring '{}' from {}", db.name, dump_file.display()))?;
            println!("Database '{}' restored from {}", db.name, dump_file.display());
        }
        Cmd::Inspect { path } => {
            let path = match path {
                Some(path) => path.clone(),
                None => ArtifactWriter::new(load_config(&cli)?.output_dir).artifact_path(),
            };
            let rows = read_artifact(&path).with_context(|| format!("reading {}", path.display()))?;
            let summary = DecisionSummary::of(&rows);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("=== ARTIFACT SUMMARY ===");
                println!("  path:      {}", path.display());
                println!("  clients:   {}", summary.clients);
                println!("  accepted:  {}", summary.accepted);
                println!("  rejected:  {}", summary.rejected);
            }
        }
    }
    Ok(())
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("=== RUN SUMMARY ===");
    println!("  run_id:   {}", report.run_id);
    println!("  retries:  {}", report.retries());
    for event in &report.events {
        match event {
            PipelineEvent::FeaturesExtracted { paid_loans, days_since_late, profit_rate_90d, window_start } => {
                println!("  features: paid_loans={paid_loans} days_since_late={days_since_late} profit_rate_90d={profit_rate_90d}");
                if let Some(start) = window_start {
                    println!("  window:   loans created on/after {start}");
                }
            }
            PipelineEvent::DecisionsComputed { clients, accepted, rejected } => {
                println!("  clients:  {clients} ({accepted} ACCEPT / {rejected} REJECT)");
            }
            PipelineEvent::ArtifactWritten { path, rows, bytes } => {
                println!("  written:  {path} ({rows} rows, {bytes} bytes)");
            }
            PipelineEvent::ArtifactPublished { bucket, key, bytes } => {
                println!("  uploaded: {bucket}/{key} ({bytes} bytes)");
            }
            _ => {}
        }
    }
    Ok(())
}
