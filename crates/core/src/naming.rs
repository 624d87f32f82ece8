//! Filename conventions for grid outputs.
//!
//! Axis value keys become path segments, so they are reduced to a
//! filesystem-safe alphabet. Output folder names may contain `/` to nest
//! runs but never escape the user's `Grids/` directory.

use crate::error::{GridError, GridResult};

/// Directory (under the user's output root) that holds every grid run.
pub const GRIDS_DIR: &str = "Grids";

/// Name of the saved-configuration file written into a web-page run folder.
pub const SAVED_CONFIG_FILE: &str = "gridgen_save_config.json";

/// Suffix of the per-cell metadata sidecar written next to each image.
pub const METADATA_SIDECAR_SUFFIX: &str = ".metadata.js";

/// Reduce an axis value to a path-safe key.
///
/// Keeps alphanumerics of any script, `-`, `_` and `.`; whitespace runs
/// become a single `_`. Everything is lowercased.
///
/// ```
/// use gridgen_core::naming::clean_value_key;
///
/// assert_eq!(clean_value_key("Euler A"), "euler_a");
/// assert_eq!(clean_value_key("1.5"), "1.5");
/// assert_eq!(clean_value_key("Café"), "café");
/// ```
pub fn clean_value_key(value: &str) -> String {
    let mut key = String::with_capacity(value.len());
    let mut pending_sep = false;
    for c in value.trim().chars() {
        if c.is_whitespace() {
            pending_sep = !key.is_empty();
            continue;
        }
        if !(c.is_alphanumeric() || matches!(c, '-' | '_' | '.')) {
            continue;
        }
        if pending_sep {
            key.push('_');
            pending_sep = false;
        }
        key.extend(c.to_lowercase());
    }
    // A key made only of dots would be a relative path segment.
    if key.chars().all(|c| c == '.') {
        key.clear();
    }
    key
}

/// Strictly clean a user-provided folder name.
///
/// Backslashes are treated as separators, empty, `.` and `..` segments are
/// dropped and every segment keeps only `[A-Za-z0-9 _.-]`.
pub fn strict_filename_clean(name: &str) -> String {
    name.replace('\\', "/")
        .split('/')
        .map(|segment| {
            segment
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-' | '.'))
                .collect::<String>()
                .trim()
                .to_string()
        })
        .filter(|segment| !segment.is_empty() && segment != "." && segment != "..")
        .collect::<Vec<_>>()
        .join("/")
}

/// Clean an output folder name and place it under [`GRIDS_DIR`].
pub fn clean_folder_name(name: &str) -> GridResult<String> {
    let cleaned = strict_filename_clean(name);
    if cleaned.trim().is_empty() {
        return Err(GridError::Configuration(
            "Output folder name cannot be empty.".to_string(),
        ));
    }
    Ok(format!("{GRIDS_DIR}/{}", cleaned.trim()))
}

/// JavaScript line stored in a cell's metadata sidecar.
pub fn metadata_sidecar_line(path_key: &str, metadata: &str) -> String {
    format!("all_metadata[\"{path_key}\"] = {metadata}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_key_is_lowercase_and_safe() {
        assert_eq!(clean_value_key("  DPM++ 2M  Karras "), "dpm_2m_karras");
        assert_eq!(clean_value_key("a/b\\c"), "abc");
        assert_eq!(clean_value_key(".."), "");
    }

    #[test]
    fn non_latin_values_keep_distinct_keys() {
        let keys: Vec<String> = ["cat", "猫", "犬", "Кошка"].iter().map(|v| clean_value_key(v)).collect();
        assert_eq!(keys, vec!["cat", "猫", "犬", "кошка"]);
    }

    #[test]
    fn folder_name_is_nested_under_grids() {
        assert_eq!(clean_folder_name("My Grid").unwrap(), "Grids/My Grid");
        assert_eq!(clean_folder_name("a\\b/c").unwrap(), "Grids/a/b/c");
    }

    #[test]
    fn folder_name_cannot_escape() {
        assert_eq!(clean_folder_name("../../etc").unwrap(), "Grids/etc");
        assert_eq!(clean_folder_name("a/./../b").unwrap(), "Grids/a/b");
    }

    #[test]
    fn empty_folder_name_rejected() {
        let err = clean_folder_name(" /?* ").unwrap_err();
        assert_eq!(err.to_string(), "Output folder name cannot be empty.");
    }

    #[test]
    fn sidecar_line_format() {
        assert_eq!(
            metadata_sidecar_line("a/b", "{\"seed\":1}"),
            "all_metadata[\"a/b\"] = {\"seed\":1}\n"
        );
    }
}
