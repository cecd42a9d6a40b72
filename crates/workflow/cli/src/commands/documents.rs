//! Document commands

use crate::error::{read_file, CliError, CliResult};
use crate::output::{print_single, print_success, OutputFormat};
use workflow_engine::{StaticDocumentSource, WorkflowEngine};
use workflow_types::DocumentRef;

/// Parse a document list: a YAML or JSON array, or JSON lines
pub fn parse_documents(path: &str, content: &str) -> CliResult<Vec<DocumentRef>> {
    let parse_error = |message: String| CliError::Parse {
        path: path.to_string(),
        message,
    };

    if path.ends_with(".yaml") || path.ends_with(".yml") {
        return serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string()));
    }
    if content.trim_start().starts_with('[') {
        return serde_json::from_str(content).map_err(|e| parse_error(e.to_string()));
    }
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(|e| parse_error(e.to_string())))
        .collect()
}

/// Launch every attached workflow for the listed documents
pub async fn launch_all(engine: &WorkflowEngine, path: &str, format: OutputFormat) -> CliResult<()> {
    let documents = parse_documents(path, &read_file(path)?)?;
    let source = StaticDocumentSource::new(documents);
    let summary = engine.launcher().launch_all_documents(&source).await?;

    if matches!(format, OutputFormat::Table) {
        print_success(&format!(
            "{} documents: {} instances launched, {} already present",
            summary.documents, summary.launched, summary.already_launched
        ));
        Ok(())
    } else {
        print_single(&summary, format)
    }
}
