//! Action registry: maps action paths to their implementations
//!
//! The registry is filled once at start-up by installing action modules and
//! is then shared read-only behind an `Arc`.

use crate::http::HttpPostAction;
use crate::{ActionError, ActionResult, WorkflowAction};
use std::collections::HashMap;
use std::sync::Arc;
use workflow_types::ActionPath;

/// A bundle of actions contributed by one subsystem
pub trait ActionModule {
    fn name(&self) -> &str;

    fn install(&self, registry: &mut ActionRegistry);
}

/// Registry of action implementations
#[derive(Clone)]
pub struct ActionRegistry {
    actions: HashMap<ActionPath, Arc<dyn WorkflowAction>>,
}

impl ActionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Registry holding the actions shipped with the engine
    pub fn with_builtin_actions(http_default_timeout: u64) -> Self {
        let mut registry = Self::new();
        registry.install(&[&BuiltinActions {
            http_default_timeout,
        }]);
        registry
    }

    /// Run every module's installer once
    pub fn install(&mut self, modules: &[&dyn ActionModule]) {
        for module in modules {
            let before = self.actions.len();
            module.install(self);
            tracing::debug!(
                module = module.name(),
                added = self.actions.len() - before,
                "Action module installed"
            );
        }
    }

    /// Register an action. Registering an id twice keeps the latest.
    pub fn register(&mut self, action: Arc<dyn WorkflowAction>) {
        let id = action.id();
        if self.actions.insert(id.clone(), action).is_some() {
            tracing::warn!(action = %id, "Action re-registered; previous implementation replaced");
        } else {
            tracing::debug!(action = %id, "Action registered");
        }
    }

    pub fn get(&self, id: &ActionPath) -> ActionResult<Arc<dyn WorkflowAction>> {
        self.actions
            .get(id)
            .cloned()
            .ok_or_else(|| ActionError::NotRegistered(id.clone()))
    }

    /// All registered actions sorted by label
    pub fn all(&self) -> Vec<Arc<dyn WorkflowAction>> {
        let mut actions: Vec<_> = self.actions.values().cloned().collect();
        actions.sort_by(|a, b| a.label().cmp(b.label()).then_with(|| a.id().cmp(&b.id())));
        actions
    }

    pub fn contains(&self, id: &ActionPath) -> bool {
        self.actions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&ActionPath> = self.actions.keys().collect();
        ids.sort();
        f.debug_struct("ActionRegistry").field("actions", &ids).finish()
    }
}

/// Actions that ship with the engine
pub struct BuiltinActions {
    pub http_default_timeout: u64,
}

impl ActionModule for BuiltinActions {
    fn name(&self) -> &str {
        "workflow"
    }

    fn install(&self, registry: &mut ActionRegistry) {
        registry.register(Arc::new(HttpPostAction::new(self.http_default_timeout)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActionConfig, ActionContext, ActionSchema};
    use async_trait::async_trait;

    struct Named {
        id: &'static str,
        label: &'static str,
    }

    #[async_trait]
    impl WorkflowAction for Named {
        fn id(&self) -> ActionPath {
            ActionPath::new(self.id)
        }

        fn label(&self) -> &str {
            self.label
        }

        fn schema(&self) -> ActionSchema {
            ActionSchema::new()
        }

        async fn execute(&self, _: &ActionConfig, _: ActionContext<'_>) -> ActionResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(Named { id: "a.one", label: "One" }));
        assert!(registry.contains(&ActionPath::new("a.one")));
        assert_eq!(registry.get(&ActionPath::new("a.one")).unwrap().label(), "One");
    }

    #[test]
    fn test_unknown_action() {
        let registry = ActionRegistry::new();
        let err = registry.get(&ActionPath::new("missing.action")).err().unwrap();
        assert_eq!(err, ActionError::NotRegistered(ActionPath::new("missing.action")));
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(Named { id: "a.one", label: "First" }));
        registry.register(Arc::new(Named { id: "a.one", label: "Second" }));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&ActionPath::new("a.one")).unwrap().label(), "Second");
    }

    #[test]
    fn test_all_sorted_by_label() {
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(Named { id: "z.first", label: "Alpha" }));
        registry.register(Arc::new(Named { id: "a.last", label: "Zulu" }));
        registry.register(Arc::new(Named { id: "m.mid", label: "Mike" }));
        let labels: Vec<String> = registry.all().iter().map(|a| a.label().to_string()).collect();
        assert_eq!(labels, vec!["Alpha", "Mike", "Zulu"]);
    }

    #[test]
    fn test_builtin_actions() {
        let registry = ActionRegistry::with_builtin_actions(4);
        assert!(registry.contains(&ActionPath::new(crate::http::HTTP_POST_ACTION)));
        assert!(!registry.is_empty());
    }
}
