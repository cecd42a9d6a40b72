use workflow_types::ActionPath;

/// Errors raised while configuring or running a state action
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("action not registered: {0}")]
    NotRegistered(ActionPath),

    #[error("invalid action data: {0}")]
    InvalidData(String),

    #[error("{0}")]
    Template(String),

    #[error("Payload JSON error: {0}")]
    Payload(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    /// Short name recorded in the error log ahead of the message
    pub fn kind_name(&self) -> &'static str {
        match self {
            ActionError::NotRegistered(_) => "ActionNotRegistered",
            ActionError::InvalidData(_) => "InvalidActionData",
            ActionError::Template(_) => "TemplateError",
            ActionError::Payload(_) => "PayloadError",
            ActionError::Http(_) => "HttpError",
            ActionError::Timeout(_) => "Timeout",
            ActionError::Failed(_) => "ActionFailed",
        }
    }

    /// Error log text: `"<kind>; <message>"`
    pub fn log_text(&self) -> String {
        format!("{}; {}", self.kind_name(), self)
    }
}

pub type ActionResult<T> = Result<T, ActionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_text() {
        let err = ActionError::NotRegistered(ActionPath::new("tags.attach"));
        assert_eq!(
            err.log_text(),
            "ActionNotRegistered; action not registered: tags.attach"
        );
        assert_eq!(ActionError::Timeout(4).log_text(), "Timeout; request timed out after 4s");
    }
}
