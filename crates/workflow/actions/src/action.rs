use crate::{ActionConfig, ActionContext, ActionResult, ActionSchema};
use async_trait::async_trait;
use workflow_types::{ActionPath, Principal};

/// An action implementation that can be attached to workflow states.
///
/// Implementations are stateless descriptors: per-state configuration is
/// passed to [`execute`](WorkflowAction::execute) as an [`ActionConfig`]
/// that has already been validated against [`schema`](WorkflowAction::schema).
#[async_trait]
pub trait WorkflowAction: Send + Sync {
    /// Stable registry identifier, persisted in state action records
    fn id(&self) -> ActionPath;

    fn label(&self) -> &str;

    fn schema(&self) -> ActionSchema;

    /// Hook run on configuration submitted by an administrator, after
    /// schema validation and before it is stored.
    fn clean(
        &self,
        _requester: Option<&Principal>,
        form_data: ActionConfig,
    ) -> ActionResult<ActionConfig> {
        Ok(form_data)
    }

    async fn execute(&self, config: &ActionConfig, context: ActionContext<'_>) -> ActionResult<()>;
}
