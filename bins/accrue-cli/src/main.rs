//! accrue-cli: Run scripted accrual scenarios against an in-process system.
//!
//! Records are printed to stdout as JSON lines; logs go to stderr.

mod script;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use accrue_core::clock::ManualClock;
use accrue_node::{AccrueConfig, AccrueSystem, LogFormat};

/// Proportional reward accrual with claim-time beneficiary splits.
#[derive(Parser, Debug)]
#[command(name = "accrue-cli", version, about = "Run and inspect Accrue scenarios")]
struct Cli {
    /// Configuration file (default: <config dir>/accrue/accrue.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override the configured log format ("text" or "json")
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a JSON scenario script.
    Run(RunArgs),
    /// Print the effective configuration as JSON.
    Config,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to the scenario script.
    script: PathBuf,

    /// Stop at the first failing step and exit non-zero.
    #[arg(long)]
    strict: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AccrueConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.log_format = match format.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };
    }

    init_logging(&config.log_level, config.log_format);

    match cli.command {
        Commands::Run(args) => run(&config, args),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn run(config: &AccrueConfig, args: RunArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.script)
        .with_context(|| format!("cannot read {}", args.script.display()))?;
    let script = script::parse(&text)?;

    let clock = Arc::new(ManualClock::new(script.start));
    let system = AccrueSystem::build(config, clock.clone()).context("failed to build system")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let stats = script::run(&system, &clock, &script, args.strict, &mut out)?;

    info!(steps = stats.steps, failed = stats.failed, "script finished");
    if let Err(problem) = system.check_consistency() {
        anyhow::bail!("consistency check failed: {problem}");
    }
    Ok(())
}

/// Initialize tracing on stderr with the given level and format.
///
/// `RUST_LOG`, when set, takes precedence over `level_str`.
fn init_logging(level_str: &str, format: LogFormat) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}
