//! Workflow diagrams in Graphviz DOT, rasterized by the `dot` program.

use crate::{EngineError, EngineResult};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use workflow_storage::WorkflowStorage;
use workflow_types::{StateId, Transition, Workflow, WorkflowError, WorkflowId, WorkflowState};

/// Default output format of [`WorkflowDiagram::render`]
pub const DEFAULT_FORMAT: &str = "png";

/// A workflow's states and transitions, ready to draw
#[derive(Clone, Debug)]
pub struct WorkflowDiagram {
    label: String,
    states: Vec<WorkflowState>,
    transitions: Vec<Transition>,
}

impl WorkflowDiagram {
    pub fn build(workflow: &Workflow, states: Vec<WorkflowState>, transitions: Vec<Transition>) -> Self {
        Self {
            label: workflow.label.clone(),
            states,
            transitions,
        }
    }

    pub async fn load(storage: &dyn WorkflowStorage, workflow_id: &WorkflowId) -> EngineResult<Self> {
        let workflow = storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.clone()))?;
        let states = storage.list_states(workflow_id).await?;
        let transitions = storage.list_transitions(workflow_id).await?;
        Ok(Self::build(&workflow, states, transitions))
    }

    /// Initial states, and states missing either incoming or outgoing
    /// transitions, are drawn with a double circle.
    pub fn is_highlighted(&self, state: &WorkflowState) -> bool {
        let outgoing = self.transitions.iter().any(|t| t.origin_state_id == state.id);
        let incoming = self
            .transitions
            .iter()
            .any(|t| t.destination_state_id == state.id);
        state.initial || !outgoing || !incoming
    }

    pub fn to_dot(&self) -> String {
        let nodes: HashMap<&StateId, String> = self
            .states
            .iter()
            .enumerate()
            .map(|(i, s)| (&s.id, format!("s{}", i)))
            .collect();

        let mut dot = String::new();
        dot.push_str(&format!("digraph \"{}\" {{\n", escape(&self.label)));
        dot.push_str("  rankdir=LR;\n");
        dot.push_str("  size=\"8,5\";\n");

        for state in &self.states {
            let shape = if self.is_highlighted(state) {
                "doublecircle"
            } else {
                "circle"
            };
            dot.push_str(&format!(
                "  {} [label=\"{}\", shape={}];\n",
                nodes[&state.id],
                escape(&state.label),
                shape
            ));
        }

        for transition in &self.transitions {
            let (Some(from), Some(to)) = (
                nodes.get(&transition.origin_state_id),
                nodes.get(&transition.destination_state_id),
            ) else {
                continue;
            };
            dot.push_str(&format!(
                "  {} -> {} [label=\"{}\"];\n",
                from,
                to,
                escape(&transition.label)
            ));
        }

        dot.push_str("}\n");
        dot
    }

    /// Rasterize with the `dot` binary on the PATH
    pub async fn render(&self, format: &str) -> EngineResult<Vec<u8>> {
        self.render_with("dot", format).await
    }

    pub async fn render_with(&self, program: &str, format: &str) -> EngineResult<Vec<u8>> {
        let mut child = Command::new(program)
            .arg(format!("-T{}", format))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::Render(format!("cannot run {}: {}", program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(self.to_dot().as_bytes())
                .await
                .map_err(|e| EngineError::Render(format!("writing to {}: {}", program, e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| EngineError::Render(format!("waiting for {}: {}", program, e)))?;
        if !output.status.success() {
            return Err(EngineError::Render(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        tracing::debug!(format, bytes = output.stdout.len(), "Workflow diagram rendered");
        Ok(output.stdout)
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagram() -> WorkflowDiagram {
        let wf = Workflow::new("review", "Review").unwrap();
        let draft = WorkflowState::new(wf.id.clone(), "Draft").as_initial();
        let review = WorkflowState::new(wf.id.clone(), "In \"review\"");
        let done = WorkflowState::new(wf.id.clone(), "Done");
        let submit = Transition::new(wf.id.clone(), "Submit", draft.id.clone(), review.id.clone());
        let reject = Transition::new(wf.id.clone(), "Reject", review.id.clone(), draft.id.clone());
        let approve = Transition::new(wf.id.clone(), "Approve", review.id.clone(), done.id.clone());
        WorkflowDiagram::build(&wf, vec![draft, review, done], vec![submit, reject, approve])
    }

    #[test]
    fn test_dot_output() {
        let dot = diagram().to_dot();
        assert!(dot.starts_with("digraph \"Review\" {"));
        assert!(dot.contains("rankdir=LR;"));
        assert!(dot.contains("size=\"8,5\";"));
        assert!(dot.contains("s0 [label=\"Draft\", shape=doublecircle];"));
        assert!(dot.contains("s1 [label=\"In \\\"review\\\"\", shape=circle];"));
        assert!(dot.contains("s2 [label=\"Done\", shape=doublecircle];"));
        assert!(dot.contains("s1 -> s2 [label=\"Approve\"];"));
        assert!(dot.contains("s0 -> s1 [label=\"Submit\"];"));
    }

    #[tokio::test]
    async fn test_missing_renderer() {
        let err = diagram()
            .render_with("docflow-no-such-renderer", DEFAULT_FORMAT)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Render(_)));
    }
}
