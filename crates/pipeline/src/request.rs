use serde::Deserialize;
use serde_json::Value;

use gridgen_core::grid::OutputType;

/// A client's request to run one grid.
#[derive(Debug, Clone, Deserialize)]
pub struct GridRunRequest {
    /// Parameters shared by every cell.
    #[serde(default = "empty_object", alias = "baseParams")]
    pub base_params: Value,
    /// Axis definitions; see `gridgen_core::axis::AxisSpec`.
    #[serde(default, alias = "gridAxes")]
    pub grid_axes: Value,
    /// Grid definition to save next to a web-page run.
    #[serde(default, alias = "saveConfig")]
    pub save_config: Option<Value>,
    #[serde(default, alias = "outputFolderName")]
    pub output_folder_name: String,
    #[serde(default, alias = "doOverwrite")]
    pub do_overwrite: bool,
    #[serde(default, alias = "publishGenMetadata", alias = "publish_gen_metadata")]
    pub publish_metadata: bool,
    #[serde(default, alias = "dryRun")]
    pub dry_run: bool,
    #[serde(default, alias = "outputType")]
    pub output_type: OutputType,
    #[serde(default, alias = "continueOnError")]
    pub continue_on_error: bool,
    #[serde(default = "default_true", alias = "showOutputs")]
    pub show_outputs: bool,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_request_uses_defaults() {
        let request: GridRunRequest = serde_json::from_value(json!({
            "output_folder_name": "run"
        }))
        .unwrap();
        assert_eq!(request.base_params, json!({}));
        assert!(request.grid_axes.is_null());
        assert_eq!(request.output_type, OutputType::CompositeImage);
        assert!(request.show_outputs);
        assert!(!request.continue_on_error);
    }

    #[test]
    fn camel_case_fields_accepted() {
        let request: GridRunRequest = serde_json::from_value(json!({
            "baseParams": {"prompt": "a cat"},
            "gridAxes": [{"mode": "seed", "vals": "1,2"}],
            "outputFolderName": "cats",
            "outputType": "web_page",
            "publishGenMetadata": true,
            "dryRun": true
        }))
        .unwrap();
        assert_eq!(request.output_type, OutputType::WebPage);
        assert!(request.publish_metadata);
        assert!(request.dry_run);
        assert_eq!(request.output_folder_name, "cats");
    }
}
