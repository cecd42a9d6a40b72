//! Configuration schemas for state actions.
//!
//! A schema lists the fields an action accepts, their types, defaults and
//! presentation hints. [`ActionSchema::validate`] turns a raw key/value map
//! into an [`ActionConfig`] with defaults applied.

use crate::{ActionError, ActionResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Value type of a configuration field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Text,
    Integer,
    Boolean,
    StringList,
}

/// Presentation hint for form renderers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Widget {
    TextInput,
    TextArea,
    NumberInput,
    Checkbox,
    MultiSelect,
}

/// One configurable field of an action
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub help_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<Widget>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, label: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            field_type,
            required: false,
            default: None,
            help_text: String::new(),
            widget: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_help(mut self, help_text: impl Into<String>) -> Self {
        self.help_text = help_text.into();
        self
    }

    pub fn with_widget(mut self, widget: Widget) -> Self {
        self.widget = Some(widget);
        self
    }

    fn coerce(&self, value: &Value) -> ActionResult<Value> {
        let mismatch = || {
            ActionError::InvalidData(format!(
                "field '{}' expects {:?}, got {}",
                self.name, self.field_type, value
            ))
        };
        match self.field_type {
            FieldType::String | FieldType::Text => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                _ => Err(mismatch()),
            },
            FieldType::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            FieldType::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(s) => match s.as_str() {
                    "true" | "on" | "1" => Ok(Value::Bool(true)),
                    "false" | "off" | "0" | "" => Ok(Value::Bool(false)),
                    _ => Err(mismatch()),
                },
                _ => Err(mismatch()),
            },
            FieldType::StringList => match value {
                Value::Array(items) if items.iter().all(Value::is_string) => Ok(value.clone()),
                Value::String(s) => Ok(Value::Array(vec![Value::String(s.clone())])),
                _ => Err(mismatch()),
            },
        }
    }
}

/// The fields an action accepts, with an optional display order
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionSchema {
    pub fields: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_order: Option<Vec<String>>,
}

impl ActionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn with_field_order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.field_order = Some(order.into_iter().map(Into::into).collect());
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields in display order. Fields missing from `field_order` follow in
    /// declaration order.
    pub fn ordered_fields(&self) -> Vec<&FieldSpec> {
        let Some(order) = &self.field_order else {
            return self.fields.iter().collect();
        };
        let mut ordered: Vec<&FieldSpec> = order.iter().filter_map(|n| self.get(n)).collect();
        for field in &self.fields {
            if !order.contains(&field.name) {
                ordered.push(field);
            }
        }
        ordered
    }

    /// Type-check `data`, apply defaults and enforce required fields.
    pub fn validate(&self, data: &Map<String, Value>) -> ActionResult<ActionConfig> {
        if let Some(unknown) = data.keys().find(|k| self.get(k).is_none()) {
            return Err(ActionError::InvalidData(format!("unknown field '{}'", unknown)));
        }

        let mut values = BTreeMap::new();
        for field in &self.fields {
            let supplied = data.get(&field.name).filter(|v| !v.is_null());
            let value = match (supplied, &field.default) {
                (Some(v), _) => Some(field.coerce(v)?),
                (None, Some(default)) => Some(default.clone()),
                (None, None) => None,
            };
            let blank = matches!(&value, Some(Value::String(s)) if s.trim().is_empty());
            match value {
                Some(_) if blank && field.required => {
                    return Err(ActionError::InvalidData(format!(
                        "field '{}' is required",
                        field.name
                    )))
                }
                Some(v) => {
                    values.insert(field.name.clone(), v);
                }
                None if field.required => {
                    return Err(ActionError::InvalidData(format!(
                        "field '{}' is required",
                        field.name
                    )))
                }
                None => {}
            }
        }
        Ok(ActionConfig(values))
    }
}

/// Validated action configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig(BTreeMap<String, Value>);

impl ActionConfig {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(Value::as_bool)
    }

    pub fn get_string_list(&self, name: &str) -> Vec<String> {
        self.0
            .get(name)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}
