//! Jinja-style templates over a JSON context, rendered with minijinja.
//!
//! Expressions (`{{ entry_log.comment }}`), blocks (`{% if %}`, `{% for %}`)
//! and the builtin filters (`upper`, `default(..)`, ...) are available.
//! Missing paths and nulls render as the empty string; a malformed template
//! is an [`ActionError::Template`].

use crate::{ActionError, ActionResult};
use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;
use std::sync::OnceLock;

fn environment() -> &'static Environment<'static> {
    static ENV: OnceLock<Environment<'static>> = OnceLock::new();
    ENV.get_or_init(|| {
        let mut env = Environment::new();
        // Lookups below a missing value stay undefined instead of failing.
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.set_formatter(|out, state, value| {
            if value.is_none() {
                return Ok(());
            }
            minijinja::escape_formatter(out, state, value)
        });
        env
    })
}

pub fn render(template: &str, context: &Value) -> ActionResult<String> {
    environment()
        .render_str(template, context)
        .map_err(|e| ActionError::Template(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Value {
        json!({
            "entry_log": {
                "comment": "approved",
                "transition": {"label": "Approve"},
                "user": null,
                "tags": ["a", "b"],
                "count": 3
            }
        })
    }

    #[test]
    fn test_substitutes_paths() {
        let out = render(
            "{{ entry_log.transition.label }}: {{entry_log.comment}} x{{ entry_log.count }}",
            &context(),
        )
        .unwrap();
        assert_eq!(out, "Approve: approved x3");
    }

    #[test]
    fn test_missing_and_null_render_empty() {
        assert_eq!(render("[{{ entry_log.nope }}]", &context()).unwrap(), "[]");
        assert_eq!(render("[{{ entry_log.nope.deeper }}]", &context()).unwrap(), "[]");
        assert_eq!(render("[{{ entry_log.user }}]", &context()).unwrap(), "[]");
        assert_eq!(render("{{ entry_log.tags[1] }}", &context()).unwrap(), "b");
    }

    #[test]
    fn test_if_block() {
        let template = "Moved{% if entry_log.user %} by {{ entry_log.user }}{% endif %}";
        assert_eq!(render(template, &context()).unwrap(), "Moved");

        let mut ctx = context();
        ctx["entry_log"]["user"] = json!("alice");
        assert_eq!(render(template, &ctx).unwrap(), "Moved by alice");
    }

    #[test]
    fn test_for_block() {
        let out = render("{% for t in entry_log.tags %}<{{ t }}>{% endfor %}", &context()).unwrap();
        assert_eq!(out, "<a><b>");
    }

    #[test]
    fn test_filters() {
        assert_eq!(
            render("{{ entry_log.transition.label|upper }}", &context()).unwrap(),
            "APPROVE"
        );
        assert_eq!(
            render(r#"{{ entry_log.actor|default("system") }}"#, &context()).unwrap(),
            "system"
        );
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(render("http://example.test/hook", &context()).unwrap(), "http://example.test/hook");
    }

    #[test]
    fn test_malformed_template() {
        let err = render("http://x/{{ entry_log.comment", &context()).unwrap_err();
        assert!(matches!(err, ActionError::Template(_)));
        assert!(render("{% if entry_log.user %}open", &context()).is_err());
    }
}
