use std::path::PathBuf;

/// Server configuration loaded from environment variables.
///
/// All fields except the workflow template path have defaults suitable for
/// running next to a local ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `7801`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`). Does not apply to an
    /// upgraded grid run socket.
    pub request_timeout_secs: u64,
    /// User that runs, history and presets are attributed to (default: `local`).
    pub user_id: String,
    /// Optional JSON file of presets.
    pub presets_path: Option<PathBuf>,
    /// ComfyUI REST base URL.
    pub comfyui_api_url: String,
    /// ComfyUI WebSocket base URL.
    pub comfyui_ws_url: String,
    /// Workflow template rendered for every cell.
    pub comfyui_workflow_path: PathBuf,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                    |
    /// |-------------------------|----------------------------|
    /// | `HOST`                  | `0.0.0.0`                  |
    /// | `PORT`                  | `7801`                     |
    /// | `CORS_ORIGINS`          | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                       |
    /// | `GRIDGEN_USER`          | `local`                    |
    /// | `PRESETS_PATH`          | unset                      |
    /// | `COMFYUI_API_URL`       | `http://127.0.0.1:8188`    |
    /// | `COMFYUI_WS_URL`        | `ws://127.0.0.1:8188`      |
    /// | `COMFYUI_WORKFLOW_PATH` | required                   |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "7801".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let user_id = std::env::var("GRIDGEN_USER")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "local".into());

        let presets_path = std::env::var("PRESETS_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let comfyui_api_url =
            std::env::var("COMFYUI_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8188".into());
        let comfyui_ws_url =
            std::env::var("COMFYUI_WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:8188".into());
        let comfyui_workflow_path = std::env::var("COMFYUI_WORKFLOW_PATH")
            .map(PathBuf::from)
            .expect("COMFYUI_WORKFLOW_PATH must be set");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            user_id,
            presets_path,
            comfyui_api_url,
            comfyui_ws_url,
            comfyui_workflow_path,
        }
    }
}
