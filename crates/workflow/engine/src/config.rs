//! Engine configuration

use serde::{Deserialize, Serialize};

/// Runtime settings for the workflow engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds the built-in HTTP action waits when a state action does not
    /// configure its own timeout
    #[serde(default = "default_http_timeout")]
    pub action_http_default_timeout: u64,

    /// Stop running further actions and return the first action failure
    /// to the caller, after it has been written to the error log
    #[serde(default)]
    pub debug_reraise_action_errors: bool,

    /// Queue used to defer event-triggered transitions. Unset means
    /// transitions run inline in the event handler.
    #[serde(default)]
    pub event_trigger_queue: Option<String>,
}

fn default_http_timeout() -> u64 {
    4
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            action_http_default_timeout: default_http_timeout(),
            debug_reraise_action_errors: false,
            event_trigger_queue: None,
        }
    }
}
