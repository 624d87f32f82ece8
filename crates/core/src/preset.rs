//! Parameter presets and their per-session lookup.
//!
//! A preset is a titled parameter patch owned by a user. The grid's presets
//! parameter names one or more presets as a comma-separated, case-insensitive
//! list; they are resolved at execution time and applied in order.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GridError, GridResult};
use crate::params::{is_prompt_param, raw_value_text, ParamSet};
use crate::types::{SessionContext, UserId};

/* --------------------------------------------------------------------------
   Validation limits
   -------------------------------------------------------------------------- */

/// Maximum length for a preset title.
pub const MAX_PRESET_NAME_LEN: usize = 200;

/// Placeholder in a preset's prompt values replaced by the current prompt.
pub const VALUE_PLACEHOLDER: &str = "{value}";

/* --------------------------------------------------------------------------
   Preset
   -------------------------------------------------------------------------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub title: String,
    #[serde(default)]
    pub params: ParamSet,
}

impl Preset {
    pub fn new(title: impl Into<String>, params: ParamSet) -> Self {
        Self {
            title: title.into(),
            params,
        }
    }

    /// Apply this preset onto `target`.
    ///
    /// Prompt-like values containing [`VALUE_PLACEHOLDER`] wrap the target's
    /// existing value instead of replacing it.
    pub fn apply_to(&self, target: &mut ParamSet) {
        for (key, value) in self.params.iter() {
            match value {
                Value::String(text) if is_prompt_param(key) && text.contains(VALUE_PLACEHOLDER) => {
                    let current = target.get(key).map(raw_value_text).unwrap_or_default();
                    target.set(key, text.replace(VALUE_PLACEHOLDER, &current));
                }
                other => target.set(key, other.clone()),
            }
        }
    }
}

/// Split a presets parameter value into lowercase, trimmed names.
pub fn split_preset_list(raw: &str) -> Vec<String> {
    raw.to_lowercase()
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Validate a preset title: non-empty and within length limit.
pub fn validate_preset_name(name: &str) -> GridResult<()> {
    if name.trim().is_empty() {
        return Err(GridError::Configuration(
            "Preset name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_PRESET_NAME_LEN {
        return Err(GridError::Configuration(format!(
            "Preset name too long: {} chars (max {MAX_PRESET_NAME_LEN})",
            name.len()
        )));
    }
    Ok(())
}

/* --------------------------------------------------------------------------
   Resolution
   -------------------------------------------------------------------------- */

/// Looks up a user's presets by title.
pub trait PresetResolver: Send + Sync {
    /// Find a preset by (already lowercased) title for the session's user.
    fn resolve(&self, name: &str, session: &SessionContext) -> Option<Preset>;
}

/// Resolve every preset named in `raw` and apply them onto `params` in order.
///
/// The first unknown name fails with [`GridError::PresetNotFound`] and leaves
/// `params` partially patched; callers discard it on error.
pub fn apply_preset_list(
    resolver: &dyn PresetResolver,
    session: &SessionContext,
    raw: &str,
    params: &mut ParamSet,
) -> GridResult<()> {
    for name in split_preset_list(raw) {
        let preset = resolver
            .resolve(&name, session)
            .ok_or_else(|| GridError::PresetNotFound(name.clone()))?;
        preset.apply_to(params);
    }
    Ok(())
}

/// In-memory presets keyed by user id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPresets {
    by_user: HashMap<UserId, Vec<Preset>>,
}

impl InMemoryPresets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, user_id: impl Into<UserId>, preset: Preset) -> GridResult<()> {
        validate_preset_name(&preset.title)?;
        self.by_user.entry(user_id.into()).or_default().push(preset);
        Ok(())
    }

    /// Parse `{ "<user>": [ { "title": ..., "params": {...} } ] }`.
    pub fn from_json_str(raw: &str) -> GridResult<Self> {
        let parsed: HashMap<UserId, Vec<Preset>> = serde_json::from_str(raw)
            .map_err(|e| GridError::Configuration(format!("Invalid presets file: {e}")))?;
        let mut presets = Self::new();
        for (user, list) in parsed {
            for preset in list {
                presets.insert(user.clone(), preset)?;
            }
        }
        Ok(presets)
    }

    pub fn load(path: &Path) -> GridResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GridError::Configuration(format!("Cannot read presets file {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn count_for(&self, user_id: &str) -> usize {
        self.by_user.get(user_id).map_or(0, Vec::len)
    }
}

impl PresetResolver for InMemoryPresets {
    fn resolve(&self, name: &str, session: &SessionContext) -> Option<Preset> {
        let wanted = name.trim().to_lowercase();
        self.by_user
            .get(&session.user_id)?
            .iter()
            .find(|p| p.title.to_lowercase() == wanted)
            .cloned()
    }
}

/* --------------------------------------------------------------------------
   Tests
   -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn presets() -> InMemoryPresets {
        InMemoryPresets::from_json_str(
            &json!({
                "alice": [
                    {"title": "Cinematic", "params": {"prompt": "cinematic shot of {value}", "steps": 30}},
                    {"title": "Fast", "params": {"steps": 8, "cfg scale": 2}}
                ]
            })
            .to_string(),
        )
        .unwrap()
    }

    // -- split_preset_list --

    #[test]
    fn preset_list_is_lowercased_and_trimmed() {
        assert_eq!(split_preset_list(" Cinematic , ,FAST"), vec!["cinematic", "fast"]);
        assert!(split_preset_list(" , ").is_empty());
    }

    // -- resolution --

    #[test]
    fn title_match_is_case_insensitive_and_user_scoped() {
        let store = presets();
        let alice = SessionContext::new("alice");
        let bob = SessionContext::new("bob");
        assert!(store.resolve("cinematic", &alice).is_some());
        assert!(store.resolve("cinematic", &bob).is_none());
    }

    #[test]
    fn presets_apply_in_order_with_value_placeholder() {
        let store = presets();
        let mut params = ParamSet::from_json(&json!({"prompt": "a cat", "steps": 20})).unwrap();
        apply_preset_list(&store, &SessionContext::new("alice"), "Cinematic, fast", &mut params)
            .unwrap();

        assert_eq!(
            params.get_text("prompt").as_deref(),
            Some("cinematic shot of a cat")
        );
        assert_eq!(params.get_i64("steps"), Some(8));
        assert_eq!(params.get_i64("cfgscale"), Some(2));
    }

    #[test]
    fn unknown_preset_is_reported_by_name() {
        let store = presets();
        let mut params = ParamSet::new();
        let err = apply_preset_list(&store, &SessionContext::new("alice"), "fast, missing", &mut params)
            .unwrap_err();
        assert_matches!(err, GridError::PresetNotFound(ref name) if name == "missing");
    }

    // -- validation --

    #[test]
    fn empty_or_long_titles_rejected() {
        assert!(validate_preset_name("  ").is_err());
        assert!(validate_preset_name(&"x".repeat(MAX_PRESET_NAME_LEN + 1)).is_err());
        assert!(validate_preset_name("ok").is_ok());
    }

    #[test]
    fn malformed_presets_file_is_configuration_error() {
        assert_matches!(
            InMemoryPresets::from_json_str("[1,2]"),
            Err(GridError::Configuration(_))
        );
    }
}
