//! Workflow templates with `{{param}}` placeholders.
//!
//! A template is a ComfyUI API-format workflow in which string values may
//! reference grid parameters:
//!
//! - `"{{steps}}"` as the whole string is replaced by the parameter value
//!   with its JSON type preserved, so numbers stay numbers.
//! - `"a photo, {{prompt}}"` substitutes the value as text.
//! - `"{{negativeprompt:}}"` supplies a default after `:` for parameters
//!   the cell does not set. Defaults are read as JSON when they parse,
//!   otherwise as text.

use std::path::Path;

use serde_json::Value;

use gridgen_core::params::{clean_param_name, raw_value_text, ParamSet};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Cannot read workflow template {path}: {message}")]
    Load { path: String, message: String },

    #[error("Workflow placeholder '{0}' has no value and no default")]
    MissingParam(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowTemplate {
    template: Value,
}

impl WorkflowTemplate {
    pub fn new(template: Value) -> Self {
        Self { template }
    }

    pub fn load(path: &Path) -> Result<Self, WorkflowError> {
        let load_err = |message: String| WorkflowError::Load {
            path: path.display().to_string(),
            message,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let template = serde_json::from_str(&raw).map_err(|e| load_err(e.to_string()))?;
        Ok(Self::new(template))
    }

    /// Produce the concrete workflow for one cell.
    pub fn render(&self, params: &ParamSet) -> Result<Value, WorkflowError> {
        render_value(&self.template, params)
    }
}

fn render_value(value: &Value, params: &ParamSet) -> Result<Value, WorkflowError> {
    match value {
        Value::String(text) => render_string(text, params),
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(item, params))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), render_value(item, params)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn render_string(text: &str, params: &ParamSet) -> Result<Value, WorkflowError> {
    let trimmed = text.trim();
    if let Some(inner) = trimmed
        .strip_prefix(OPEN)
        .and_then(|rest| rest.strip_suffix(CLOSE))
        .filter(|inner| !inner.contains(OPEN) && !inner.contains(CLOSE))
    {
        return lookup(inner, params);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        let Some(len) = rest[start + OPEN.len()..].find(CLOSE) else {
            break;
        };
        out.push_str(&rest[..start]);
        let inner = &rest[start + OPEN.len()..start + OPEN.len() + len];
        out.push_str(&raw_value_text(&lookup(inner, params)?));
        rest = &rest[start + OPEN.len() + len + CLOSE.len()..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

fn lookup(placeholder: &str, params: &ParamSet) -> Result<Value, WorkflowError> {
    let (name, default) = match placeholder.split_once(':') {
        Some((name, default)) => (name, Some(default)),
        None => (placeholder, None),
    };
    if let Some(value) = params.get(&clean_param_name(name)) {
        return Ok(value.clone());
    }
    match default {
        Some(default) => Ok(serde_json::from_str(default)
            .unwrap_or_else(|_| Value::String(default.to_string()))),
        None => Err(WorkflowError::MissingParam(name.trim().to_string())),
    }
}
