//! Axis definitions.
//!
//! Clients send axes either explicitly, as a list of values each carrying
//! its own parameter assignments, or in the shorthand form of one parameter
//! name plus a delimited value list:
//!
//! ```json
//! { "mode": "Sampler", "vals": "euler || dpm++ 2m || SKIP: ddim" }
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GridError, GridResult};
use crate::naming::clean_value_key;
use crate::params::{clean_param_name, ParamSet, PARAM_PROMPT_REPLACE};

/// Prefix marking a shorthand value as skipped.
pub const SKIP_PREFIX: &str = "SKIP:";

/// One value along an axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisValue {
    pub key: String,
    pub title: String,
    pub skip: bool,
    pub params: ParamSet,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Axis {
    pub title: String,
    pub values: Vec<AxisValue>,
}

impl Axis {
    /// Values that take part in the product, in their original order.
    pub fn active_values(&self) -> impl Iterator<Item = &AxisValue> {
        self.values.iter().filter(|v| !v.skip)
    }

    pub fn active_len(&self) -> usize {
        self.active_values().count()
    }
}

/* --------------------------------------------------------------------------
   Wire forms
   -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Deserialize)]
pub struct AxisValueSpec {
    #[serde(default)]
    pub key: Option<String>,
    pub title: String,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub params: ParamSet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AxisSpec {
    Explicit {
        #[serde(default)]
        title: Option<String>,
        values: Vec<AxisValueSpec>,
    },
    Shorthand {
        mode: String,
        vals: String,
    },
}

impl AxisSpec {
    /// Convert the wire form into an [`Axis`], validating its keys.
    pub fn into_axis(self, index: usize) -> GridResult<Axis> {
        let axis = match self {
            Self::Explicit { title, values } => Axis {
                title: title.unwrap_or_else(|| default_axis_title(index)),
                values: values
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| {
                        let key = v
                            .key
                            .as_deref()
                            .map(clean_value_key)
                            .unwrap_or_else(|| clean_value_key(&v.title));
                        AxisValue {
                            key: fallback_key(key, i),
                            title: v.title,
                            skip: v.skip,
                            params: v.params,
                        }
                    })
                    .collect(),
            },
            Self::Shorthand { mode, vals } => shorthand_axis(&mode, &vals)?,
        };
        check_unique_keys(&axis)?;
        Ok(axis)
    }
}

/// Parse a list of axis specs from the raw `gridAxes` JSON value.
pub fn parse_axes(raw: &Value) -> GridResult<Vec<Axis>> {
    let specs: Vec<AxisSpec> = match raw {
        Value::Null => Vec::new(),
        other => serde_json::from_value(other.clone())
            .map_err(|e| GridError::Configuration(format!("Invalid grid axes: {e}")))?,
    };
    specs
        .into_iter()
        .enumerate()
        .map(|(i, spec)| spec.into_axis(i))
        .collect()
}

fn default_axis_title(index: usize) -> String {
    match index {
        0 => "X".to_string(),
        1 => "Y".to_string(),
        2 => "Y2".to_string(),
        n => format!("Axis {}", n + 1),
    }
}

fn fallback_key(key: String, index: usize) -> String {
    if key.is_empty() {
        format!("value{}", index + 1)
    } else {
        key
    }
}

/// Split a shorthand value list on `||` when present, else on `,`.
pub fn split_value_list(vals: &str) -> Vec<String> {
    let parts: Vec<&str> = if vals.contains("||") {
        vals.split("||").collect()
    } else {
        vals.split(',').collect()
    };
    parts
        .into_iter()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Turn a bare prompt-replace list into `find=replace` pairs.
///
/// When no value contains `=`, the first value is the text searched for and
/// every value (including the first) becomes its replacement.
pub fn expand_prompt_replace_list(list: Vec<String>) -> Vec<String> {
    if list.iter().any(|v| v.contains('=')) {
        return list;
    }
    let Some(first) = list.first().cloned() else {
        return list;
    };
    list.into_iter()
        .map(|v| match v.strip_prefix(SKIP_PREFIX) {
            Some(rest) => format!("{SKIP_PREFIX}{first}={}", rest.trim()),
            None => format!("{first}={v}"),
        })
        .collect()
}

fn shorthand_axis(mode: &str, vals: &str) -> GridResult<Axis> {
    let param = clean_param_name(mode);
    if param.is_empty() {
        return Err(GridError::Configuration(format!(
            "Axis mode '{mode}' is not a parameter name"
        )));
    }
    let mut list = split_value_list(vals);
    if param == PARAM_PROMPT_REPLACE {
        list = expand_prompt_replace_list(list);
    }
    let values = list
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            let (skip, text) = match raw.strip_prefix(SKIP_PREFIX) {
                Some(rest) => (true, rest.trim().to_string()),
                None => (false, raw),
            };
            let mut params = ParamSet::new();
            params.set(&param, text.clone());
            AxisValue {
                key: fallback_key(clean_value_key(&text), i),
                title: text,
                skip,
                params,
            }
        })
        .collect();
    Ok(Axis {
        title: mode.trim().to_string(),
        values,
    })
}

fn check_unique_keys(axis: &Axis) -> GridResult<()> {
    let mut seen = HashSet::new();
    for value in &axis.values {
        if !seen.insert(value.key.as_str()) {
            return Err(GridError::Configuration(format!(
                "Axis '{}' has more than one value with key '{}'",
                axis.title, value.key
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn shorthand_splits_on_double_bar_first() {
        assert_eq!(split_value_list("a, b || c"), vec!["a, b", "c"]);
        assert_eq!(split_value_list("a, b ,, c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn shorthand_axis_marks_skips() {
        let axes = parse_axes(&json!([{"mode": "Steps", "vals": "10 || SKIP: 20 || 30"}])).unwrap();
        let axis = &axes[0];
        assert_eq!(axis.title, "Steps");
        assert_eq!(axis.values.len(), 3);
        assert!(axis.values[1].skip);
        assert_eq!(axis.values[1].title, "20");
        assert_eq!(axis.active_len(), 2);
        assert_eq!(axis.values[2].params.get_text("steps").as_deref(), Some("30"));
    }

    #[test]
    fn bare_prompt_replace_list_uses_first_as_search() {
        let list = expand_prompt_replace_list(vec![
            "cat".to_string(),
            "dog".to_string(),
            "SKIP: fox".to_string(),
        ]);
        assert_eq!(list, vec!["cat=cat", "cat=dog", "SKIP:cat=fox"]);
    }

    #[test]
    fn explicit_prompt_replace_list_is_untouched() {
        let list = vec!["cat=dog".to_string(), "hat".to_string()];
        assert_eq!(expand_prompt_replace_list(list.clone()), list);
    }

    #[test]
    fn explicit_axis_keys_default_to_title() {
        let axes = parse_axes(&json!([{
            "values": [
                {"title": "Low CFG", "params": {"CFG Scale": 3}},
                {"key": "High", "title": "High CFG", "params": {"cfgscale": 12}, "skip": true}
            ]
        }]))
        .unwrap();
        assert_eq!(axes[0].title, "X");
        assert_eq!(axes[0].values[0].key, "low_cfg");
        assert_eq!(axes[0].values[1].key, "high");
        assert_eq!(axes[0].values[0].params.get_i64("cfgscale"), Some(3));
    }

    #[test]
    fn duplicate_keys_rejected() {
        let result = parse_axes(&json!([{"mode": "seed", "vals": "1, 2, 1"}]));
        assert_matches!(result, Err(GridError::Configuration(_)));
    }

    #[test]
    fn non_latin_values_do_not_collide() {
        let axes = parse_axes(&json!([{"mode": "prompt", "vals": "cat, 猫, 犬"}])).unwrap();
        let keys: Vec<&str> = axes[0].values.iter().map(|v| v.key.as_str()).collect();
        assert_eq!(keys, vec!["cat", "猫", "犬"]);
    }

    #[test]
    fn null_axes_are_empty() {
        assert!(parse_axes(&Value::Null).unwrap().is_empty());
    }
}
