//! Workflow definition commands

use crate::definitions::DefinitionsFile;
use crate::error::{CliError, CliResult};
use crate::output::{print_info, print_output, print_single, print_success, OutputFormat};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;
use workflow_engine::visualization::DEFAULT_FORMAT;
use workflow_engine::WorkflowEngine;
use workflow_types::Workflow;

/// Workflow subcommands
#[derive(Subcommand)]
pub enum WorkflowCommands {
    /// List workflow definitions
    List,

    /// Show a workflow with its states and transitions
    Show {
        /// Internal name of the workflow
        name: String,
    },

    /// Load workflow definitions from a YAML or JSON file
    Load {
        /// Path to definitions file
        #[arg(short, long)]
        file: String,
    },

    /// Render a workflow diagram with Graphviz
    Render {
        /// Internal name of the workflow
        name: String,

        /// Graphviz output format; `dot` writes the source without running Graphviz
        #[arg(short, long, default_value = DEFAULT_FORMAT)]
        format: String,

        /// Output path, defaults to `<name>.<format>`
        #[arg(long)]
        out: Option<String>,
    },
}

/// Table row for workflow display
#[derive(Debug, Serialize, Tabled)]
struct WorkflowRow {
    internal_name: String,
    label: String,
    document_types: String,
    states: usize,
    transitions: usize,
}

/// Execute a workflow command
pub async fn execute(command: WorkflowCommands, engine: &WorkflowEngine, format: OutputFormat) -> CliResult<()> {
    match command {
        WorkflowCommands::List => list(engine, format).await,
        WorkflowCommands::Show { name } => show(engine, &name, format).await,
        WorkflowCommands::Load { file } => load(engine, &file, format).await,
        WorkflowCommands::Render { name, format: image, out } => render(engine, &name, &image, out).await,
    }
}

async fn list(engine: &WorkflowEngine, format: OutputFormat) -> CliResult<()> {
    let defs = engine.definitions();
    let mut rows = Vec::new();
    for workflow in defs.list_workflows().await? {
        rows.push(WorkflowRow {
            states: defs.list_states(&workflow.id).await?.len(),
            transitions: defs.list_transitions(&workflow.id).await?.len(),
            document_types: workflow
                .document_types
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            internal_name: workflow.internal_name,
            label: workflow.label,
        });
    }
    print_output(rows, format)
}

async fn find(engine: &WorkflowEngine, name: &str) -> CliResult<Workflow> {
    engine
        .definitions()
        .workflow_by_internal_name(name)
        .await?
        .ok_or_else(|| CliError::Definitions(format!("no workflow named '{}'", name)))
}

async fn show(engine: &WorkflowEngine, name: &str, format: OutputFormat) -> CliResult<()> {
    let defs = engine.definitions();
    let workflow = find(engine, name).await?;
    let states = defs.list_states(&workflow.id).await?;
    let mut actions = Vec::new();
    for state in &states {
        actions.extend(defs.list_actions(&state.id).await?);
    }
    let transitions = defs.list_transitions(&workflow.id).await?;

    print_single(
        &serde_json::json!({
            "workflow": workflow,
            "states": states,
            "actions": actions,
            "transitions": transitions,
        }),
        format,
    )
}

async fn load(engine: &WorkflowEngine, path: &str, format: OutputFormat) -> CliResult<()> {
    let file = DefinitionsFile::read(path)?;
    let summary = file.apply(engine.definitions()).await?;

    if !matches!(format, OutputFormat::Table) {
        return print_single(&summary, format);
    }
    for name in &summary.created {
        print_success(&format!("Workflow '{}' created", name));
    }
    for name in &summary.skipped {
        print_info(&format!("Workflow '{}' already exists", name));
    }
    Ok(())
}

async fn render(engine: &WorkflowEngine, name: &str, image: &str, out: Option<String>) -> CliResult<()> {
    let diagram = engine.diagram(name).await?;
    let bytes = if image == "dot" {
        diagram.to_dot().into_bytes()
    } else {
        diagram.render(image).await?
    };

    let path = out.unwrap_or_else(|| format!("{}.{}", name, image));
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|source| CliError::Io {
            path: path.clone(),
            source,
        })?;
    print_success(&format!("Diagram of '{}' written to {}", name, path));
    Ok(())
}
