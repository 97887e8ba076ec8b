//! BT-RADS CLI - assess follow-up MRI cases from the terminal
//!
//! - `assess`: run one patient record through the decision graph
//! - `batch`: run a file of records concurrently and summarize agreement
//! - `graph`: inspect, export or validate a decision graph definition
//! - `rules`: evaluate the quantitative rules on raw measurements
//! - `config`: show the effective engine configuration

#![deny(unsafe_code)]

use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod error;
mod output;
mod settings;

use commands::{assess, batch, graph, rules};
pub use error::{CliError, CliResult};
pub use output::OutputFormat;
pub use settings::load_config;

/// BT-RADS CLI application
#[derive(Parser)]
#[command(name = "btrads")]
#[command(about = "BT-RADS - brain tumor follow-up scoring", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table", global = true)]
    output: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Engine configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "BTRADS_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Score a single patient record
    Assess(assess::AssessArgs),

    /// Score a file of patient records
    Batch(batch::BatchArgs),

    /// Inspect decision graphs
    Graph {
        #[command(subcommand)]
        command: graph::GraphCommands,
    },

    /// Evaluate quantitative rules directly
    Rules {
        #[command(subcommand)]
        command: rules::RulesCommands,
    },

    /// Show the effective engine configuration
    Config,
}

/// Run using the current process arguments.
pub async fn run() -> CliResult<()> {
    run_with_args(std::env::args_os()).await
}

/// Run using the provided argument iterator.
pub async fn run_with_args<I, T>(args: I) -> CliResult<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    // Logs go to stderr so structured output stays parseable
    let filter = if cli.verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .try_init();

    let config = settings::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Assess(args) => assess::execute(args, config, cli.output).await,
        Commands::Batch(args) => batch::execute(args, config, cli.output).await,
        Commands::Graph { command } => graph::execute(command, cli.output),
        Commands::Rules { command } => rules::execute(command, cli.output),
        Commands::Config => show_config(&config, cli.output),
    }
}

fn show_config(config: &btrads_engine::EngineConfig, format: OutputFormat) -> CliResult<()> {
    if format != OutputFormat::Table {
        return output::print_structured(config, format);
    }

    output::print_header("BT-RADS Engine Configuration");
    output::print_field("Max attempts", config.extraction.max_attempts);
    output::print_field("Retry backoff (ms)", config.extraction.retry_backoff_ms);
    output::print_field("Extractor timeout (ms)", config.extraction.timeout_ms);
    output::print_field("Low confidence below", config.extraction.low_confidence_threshold);
    output::print_field("Prefer rules", config.rules.prefer_rules);
    output::print_field("Rule confidence", config.rules.rule_confidence);
    output::print_field("Validation", format!("{:?}", config.validation.mode));
    output::print_field(
        "Validation timeout",
        config
            .validation
            .timeout_secs
            .map_or_else(|| "none".to_string(), |s| format!("{s}s")),
    );
    output::print_field("Correction factor", config.validation.correction_confidence_factor);
    output::print_field("Batch concurrency", config.batch.concurrency);
    output::print_field("Max hops", config.traversal.max_hops);
    Ok(())
}
