//! Built-in action that POSTs a JSON payload to a URL.

use crate::template;
use crate::{
    ActionConfig, ActionContext, ActionError, ActionResult, ActionSchema, FieldSpec, FieldType,
    Widget, WorkflowAction,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use workflow_types::ActionPath;

pub const HTTP_POST_ACTION: &str = "workflow.http_post";

/// Sends `payload` to `url` when a state is entered or left
pub struct HttpPostAction {
    default_timeout: u64,
    client: reqwest::Client,
}

impl HttpPostAction {
    pub fn new(default_timeout: u64) -> Self {
        Self {
            default_timeout,
            client: reqwest::Client::new(),
        }
    }

    pub fn default_timeout(&self) -> u64 {
        self.default_timeout
    }

    fn render_url(config: &ActionConfig, context: &Value) -> ActionResult<String> {
        let url = config
            .get_str("url")
            .ok_or_else(|| ActionError::InvalidData("field 'url' is required".into()))?;
        template::render(url, context)
            .map_err(|e| ActionError::Template(format!("URL template error: {}", e)))
    }

    fn render_payload(config: &ActionConfig, context: &Value) -> ActionResult<Value> {
        let Some(payload) = config.get_str("payload").filter(|p| !p.trim().is_empty()) else {
            return Ok(json!({}));
        };
        let rendered = template::render(payload, context)
            .map_err(|e| ActionError::Template(format!("Payload template error: {}", e)))?;
        serde_json::from_str(&rendered).map_err(|e| ActionError::Payload(e.to_string()))
    }
}

#[async_trait]
impl WorkflowAction for HttpPostAction {
    fn id(&self) -> ActionPath {
        ActionPath::new(HTTP_POST_ACTION)
    }

    fn label(&self) -> &str {
        "Perform a POST request"
    }

    fn schema(&self) -> ActionSchema {
        ActionSchema::new()
            .field(
                FieldSpec::new("url", "URL", FieldType::String)
                    .required()
                    .with_widget(Widget::TextArea)
                    .with_help(
                        "Can be an IP address, a domain or a template. Templates receive the \
                         workflow log entry as the variable \"entry_log\".",
                    ),
            )
            .field(
                FieldSpec::new("timeout", "Timeout", FieldType::Integer)
                    .required()
                    .with_default(json!(self.default_timeout))
                    .with_widget(Widget::NumberInput)
                    .with_help("Time in seconds to wait for a response."),
            )
            .field(
                FieldSpec::new("payload", "Payload", FieldType::Text)
                    .with_widget(Widget::TextArea)
                    .with_help(
                        "A JSON document sent as the JSON request body \
                         (Content-Type: application/json), not form-encoded. Can also be \
                         a template that renders to JSON.",
                    ),
            )
            .with_field_order(["url", "timeout", "payload"])
    }

    async fn execute(&self, config: &ActionConfig, context: ActionContext<'_>) -> ActionResult<()> {
        let template_context = context.to_template_value();
        let url = Self::render_url(config, &template_context)?;
        let payload = Self::render_payload(config, &template_context)?;
        let timeout = config
            .get_i64("timeout")
            .and_then(|t| u64::try_from(t).ok())
            .unwrap_or(self.default_timeout);

        tracing::debug!(url = %url, timeout, "Posting workflow action payload");

        let response = self
            .client
            .post(url.as_str())
            .timeout(Duration::from_secs(timeout))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ActionError::Timeout(timeout)
                } else {
                    ActionError::Http(e.to_string())
                }
            })?;

        tracing::debug!(url = %url, status = %response.status(), "Workflow action POST completed");
        Ok(())
    }
}
