//! docflow - administration CLI for the document workflow engine
//!
//! Loads workflow definitions, lists registered state actions, renders
//! workflow diagrams and launches workflows over a batch of documents.

#![deny(unsafe_code)]

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod definitions;
mod error;
mod output;

use commands::workflow::WorkflowCommands;
use config::DocflowConfig;
use definitions::DefinitionsFile;
use error::CliResult;
use output::OutputFormat;

/// docflow CLI
#[derive(Parser)]
#[command(name = "docflow")]
#[command(about = "docflow - Document workflow engine administration", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "DOCFLOW_CONFIG")]
    config: Option<String>,

    /// Definitions file loaded before the command runs
    #[arg(short, long, env = "DOCFLOW_DEFINITIONS", global = true)]
    definitions: Option<String>,

    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table", global = true)]
    output: OutputFormat,

    /// Log level, overrides the configuration file
    #[arg(long, env = "DOCFLOW_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "DOCFLOW_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// List registered state actions
    Actions,

    /// Manage workflow definitions
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },

    /// Launch attached workflows for every listed document
    LaunchAll {
        /// Document list: JSON lines, or a JSON or YAML array of {id, document_type}
        #[arg(long)]
        documents: String,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        output::print_error(&err.to_string());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = DocflowConfig::load(cli.config.as_deref())?;
    init_tracing(&cli, &config);

    if let Commands::Config = cli.command {
        return output::print_single(&config, cli.output);
    }

    let engine = commands::build_engine(&config).await?;
    if let Some(path) = &cli.definitions {
        let summary = DefinitionsFile::read(path)?.apply(engine.definitions()).await?;
        tracing::info!(
            path = %path,
            created = summary.created.len(),
            skipped = summary.skipped.len(),
            "Definitions loaded"
        );
    }

    match cli.command {
        Commands::Actions => commands::actions::list(&engine, cli.output),
        Commands::Workflow { command } => commands::workflow::execute(command, &engine, cli.output).await,
        Commands::LaunchAll { documents } => commands::documents::launch_all(&engine, &documents, cli.output).await,
        Commands::Config => Ok(()),
    }
}

fn init_tracing(cli: &Cli, config: &DocflowConfig) {
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into());

    // Logs go to stderr so command output stays parseable
    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
