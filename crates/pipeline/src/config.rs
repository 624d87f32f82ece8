use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use image::ImageFormat;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a valid {expected} (got '{value}')")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Grid runner configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Root of every user's output directory.
    pub output_dir: PathBuf,
    /// First URL segment under which outputs are served.
    pub output_url_base: String,
    /// Cap on cells in flight for one run.
    pub max_simultaneous_gens: usize,
    /// Timeout handed to the backend for each generation.
    pub per_request_timeout: Duration,
    /// Below this backend queue depth, pause briefly after each submission.
    pub max_requests_forced_order: usize,
    /// Length of that pause. Zero disables it.
    pub order_delay: Duration,
    /// Longest the progress stream waits between liveness checks.
    pub stream_poll_interval: Duration,
    /// Extension of saved grid images, e.g. `png`.
    pub image_format: String,
    /// TTF/OTF font for composite labels. Unset uses the bundled font.
    pub label_font_path: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./output"),
            output_url_base: "Output".to_string(),
            max_simultaneous_gens: 4,
            per_request_timeout: Duration::from_secs(120 * 60),
            max_requests_forced_order: 20,
            order_delay: Duration::from_millis(20),
            stream_poll_interval: Duration::from_millis(1000),
            image_format: "png".to_string(),
            label_font_path: None,
        }
    }
}

impl RunnerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default    |
    /// |-----------------------------|------------|
    /// | `OUTPUT_DIR`                | `./output` |
    /// | `OUTPUT_URL_BASE`           | `Output`   |
    /// | `MAX_SIMULTANEOUS_GENS`     | `4`        |
    /// | `PER_REQUEST_TIMEOUT_MINS`  | `120`      |
    /// | `MAX_REQUESTS_FORCED_ORDER` | `20`       |
    /// | `ORDER_DELAY_MS`            | `20`       |
    /// | `STREAM_POLL_INTERVAL_MS`   | `1000`     |
    /// | `IMAGE_FORMAT`              | `png`      |
    /// | `LABEL_FONT_PATH`           | *(bundled)* |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let output_dir = std::env::var("OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        let output_url_base = std::env::var("OUTPUT_URL_BASE")
            .ok()
            .map(|s| s.trim().trim_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.output_url_base);

        let max_simultaneous_gens: usize = env_parse("MAX_SIMULTANEOUS_GENS", "4", "usize")?;
        if max_simultaneous_gens == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_SIMULTANEOUS_GENS",
                expected: "positive integer",
                value: "0".to_string(),
            });
        }

        let timeout_mins: u64 = env_parse("PER_REQUEST_TIMEOUT_MINS", "120", "u64")?;
        let max_requests_forced_order: usize =
            env_parse("MAX_REQUESTS_FORCED_ORDER", "20", "usize")?;
        let order_delay_ms: u64 = env_parse("ORDER_DELAY_MS", "20", "u64")?;
        let poll_ms: u64 = env_parse("STREAM_POLL_INTERVAL_MS", "1000", "u64")?;

        let image_format = std::env::var("IMAGE_FORMAT")
            .map(|s| s.trim().to_lowercase())
            .unwrap_or(defaults.image_format);
        if ImageFormat::from_extension(&image_format).is_none() {
            return Err(ConfigError::Invalid {
                name: "IMAGE_FORMAT",
                expected: "image file extension",
                value: image_format,
            });
        }

        let label_font_path = std::env::var("LABEL_FONT_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            output_dir,
            output_url_base,
            max_simultaneous_gens,
            per_request_timeout: Duration::from_secs(timeout_mins * 60),
            max_requests_forced_order,
            order_delay: Duration::from_millis(order_delay_ms),
            stream_poll_interval: Duration::from_millis(poll_ms.max(1)),
            image_format,
            label_font_path,
        })
    }

    /// Output directory of one user.
    pub fn user_output_dir(&self, user_id: &str) -> PathBuf {
        self.output_dir.join(user_id)
    }

    /// URL prefix under which one user's outputs are served.
    pub fn user_url_prefix(&self, user_id: &str) -> String {
        format!("/{}/{}", self.output_url_base, user_id)
    }

    /// [`ImageFormat`] of `image_format`, falling back to PNG.
    pub fn image_format(&self) -> ImageFormat {
        ImageFormat::from_extension(&self.image_format).unwrap_or(ImageFormat::Png)
    }
}

fn env_parse<T: FromStr>(
    name: &'static str,
    default: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    let value = std::env::var(name).unwrap_or_else(|_| default.to_string());
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        expected,
        value,
    })
}
