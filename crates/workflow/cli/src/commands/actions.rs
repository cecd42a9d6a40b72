//! Registered state action commands

use crate::error::CliResult;
use crate::output::{print_output, OutputFormat};
use serde::Serialize;
use tabled::Tabled;
use workflow_actions::WorkflowAction;
use workflow_engine::WorkflowEngine;

/// Table row for a registered action
#[derive(Debug, Serialize, Tabled)]
struct ActionRow {
    /// Dotted path used in definitions
    path: String,
    label: String,
    /// Configuration fields, required ones marked with `*`
    fields: String,
}

/// List every registered action and its configuration fields
pub fn list(engine: &WorkflowEngine, format: OutputFormat) -> CliResult<()> {
    let rows = engine
        .actions()
        .all()
        .into_iter()
        .map(|action| {
            let schema = action.schema();
            let fields = schema
                .ordered_fields()
                .into_iter()
                .map(|f| if f.required { format!("{}*", f.name) } else { f.name.clone() })
                .collect::<Vec<_>>()
                .join(", ");
            ActionRow {
                path: action.id().to_string(),
                label: action.label().to_string(),
                fields,
            }
        })
        .collect();
    print_output::<ActionRow>(rows, format)
}
