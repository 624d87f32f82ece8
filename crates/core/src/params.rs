//! Generation parameter sets.
//!
//! Parameter names are normalised with [`clean_param_name`] on the way in,
//! so `"CFG Scale"`, `"cfg_scale"` and `"cfgscale"` all address the same
//! entry. Values keep their JSON type.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GridError, GridResult};

/* --------------------------------------------------------------------------
Well-known parameter ids (already cleaned)
-------------------------------------------------------------------------- */

pub const PARAM_PROMPT_REPLACE: &str = "gridgenpromptreplace";
pub const PARAM_PRESETS: &str = "gridgenpresets";
pub const PARAM_WIDTH: &str = "width";
pub const PARAM_HEIGHT: &str = "height";
pub const PARAM_OUT_WIDTH: &str = "outwidth";
pub const PARAM_OUT_HEIGHT: &str = "outheight";
pub const PARAM_ASPECT_RATIO: &str = "aspectratio";
pub const PARAM_NO_PREVIEWS: &str = "nopreviews";

/// Base parameters that never make sense for a single grid cell.
pub const STRIPPED_BASE_PARAMS: &[&str] = &["batchsize", "images", "saveintermediateimages"];

/// Short aliases accepted for the grid-specific parameters.
const ALIASES: &[(&str, &str)] = &[
    ("promptreplace", PARAM_PROMPT_REPLACE),
    ("presets", PARAM_PRESETS),
];

/// Image edge used when the base parameters carry no explicit size.
pub const DEFAULT_IMAGE_EDGE: u32 = 512;

/// Normalise a parameter name: lowercase ASCII alphanumerics only.
pub fn clean_param_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == cleaned)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(cleaned)
}

/// Render a JSON value as the raw text a user would have typed.
pub fn raw_value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Whether a parameter id names prompt-like text.
pub fn is_prompt_param(name: &str) -> bool {
    name.ends_with("prompt")
}

/// An ordered set of generation parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ParamSet(BTreeMap<String, Value>);

impl<'de> Deserialize<'de> for ParamSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
        let mut params = Self::new();
        for (key, value) in raw {
            params.set(&key, value);
        }
        Ok(params)
    }
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a parameter set from a JSON object, cleaning every key.
    pub fn from_json(value: &Value) -> GridResult<Self> {
        let obj = value.as_object().ok_or_else(|| {
            GridError::Configuration("Base parameters must be a JSON object".to_string())
        })?;
        let mut params = Self::new();
        for (key, val) in obj {
            params.set(key, val.clone());
        }
        Ok(params)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.0.insert(clean_param_name(name), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(&clean_param_name(name))
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(&clean_param_name(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// String value of a parameter; non-string scalars are rendered as text.
    pub fn get_text(&self, name: &str) -> Option<String> {
        self.get(name).map(raw_value_text)
    }

    /// Integer value of a parameter, accepting numbers and numeric strings.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Requested image width, falling back to [`DEFAULT_IMAGE_EDGE`].
    pub fn image_width(&self) -> u32 {
        self.dimension(PARAM_WIDTH)
    }

    /// Requested image height, falling back to [`DEFAULT_IMAGE_EDGE`].
    pub fn image_height(&self) -> u32 {
        self.dimension(PARAM_HEIGHT)
    }

    fn dimension(&self, name: &str) -> u32 {
        self.get_i64(name)
            .filter(|v| *v > 0)
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_IMAGE_EDGE)
    }

    /// Ids of every prompt-like parameter that currently holds text.
    pub fn prompt_keys(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|(k, v)| is_prompt_param(k) && v.is_string())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone().into_iter().collect())
    }
}

/// One `(find, replace)` pair accumulated from prompt-replace assignments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptReplacement {
    pub find: String,
    pub replace: String,
}

impl PromptReplacement {
    /// Parse `find=replace`, trimming both halves.
    pub fn parse(raw: &str) -> GridResult<Self> {
        let (find, replace) = raw.split_once('=').ok_or_else(|| {
            GridError::Configuration(format!(
                "Prompt replace value '{raw}' must have the form 'find=replace'"
            ))
        })?;
        let find = find.trim();
        if find.is_empty() {
            return Err(GridError::Configuration(format!(
                "Prompt replace value '{raw}' has nothing to find"
            )));
        }
        Ok(Self {
            find: find.to_string(),
            replace: replace.trim().to_string(),
        })
    }

    /// Apply this pair to every prompt-like parameter (case-sensitive).
    pub fn apply(&self, params: &mut ParamSet) {
        for key in params.prompt_keys() {
            if let Some(Value::String(text)) = params.0.get_mut(&key) {
                *text = text.replace(&self.find, &self.replace);
            }
        }
    }
}
