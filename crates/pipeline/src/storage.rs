//! Persisting cell and composite images.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::ImageFormat;

use gridgen_core::backend::GeneratedImage;
use gridgen_core::error::{GridError, GridResult};
use gridgen_core::naming::{metadata_sidecar_line, METADATA_SIDECAR_SUFFIX, SAVED_CONFIG_FILE};
use gridgen_core::params::ParamSet;
use gridgen_core::types::SessionContext;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("Cannot convert image to {format}: {message}")]
    Encode { format: String, message: String },

    #[error("Store rejected image: {0}")]
    Rejected(String),
}

impl StoreError {
    fn io(path: &Path, err: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<StoreError> for GridError {
    fn from(err: StoreError) -> Self {
        GridError::Persistence(err.to_string())
    }
}

/// Where finished images go when the run does not write its own folder.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Save `image` for `session` and return the URL clients load it from.
    ///
    /// `batch_id` is the cell ordinal, or one past the last cell for a
    /// composite.
    async fn save_image(
        &self,
        session: &SessionContext,
        image: &GeneratedImage,
        batch_id: usize,
        params: &ParamSet,
        metadata: Option<&str>,
    ) -> Result<String, StoreError>;
}

/// Re-encode `image` into the format named by `extension` when it differs.
pub fn convert_to_extension(
    image: &GeneratedImage,
    extension: &str,
) -> Result<GeneratedImage, StoreError> {
    let target = ImageFormat::from_extension(extension).ok_or_else(|| StoreError::Encode {
        format: extension.to_string(),
        message: "unknown image format".to_string(),
    })?;
    if target == image.format {
        return Ok(image.clone());
    }
    let encode_err = |message: String| StoreError::Encode {
        format: extension.to_string(),
        message,
    };
    let decoded = image.decode().map_err(|e| encode_err(e.to_string()))?;
    // JPEG has no alpha channel.
    let decoded = if target == ImageFormat::Jpeg {
        image::DynamicImage::ImageRgb8(decoded.to_rgb8())
    } else {
        decoded
    };
    GeneratedImage::encode(&decoded, target).map_err(|e| encode_err(e.to_string()))
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| StoreError::io(path, e))
}

// ---------------------------------------------------------------------------
// LocalImageStore
// ---------------------------------------------------------------------------

/// Saves into `<root>/<user>/<yyyy-mm-dd>/` on local disk.
#[derive(Debug, Clone)]
pub struct LocalImageStore {
    root: PathBuf,
    url_base: String,
    format: String,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>, url_base: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_base: url_base.into().trim_matches('/').to_string(),
            format: format.into(),
        }
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn save_image(
        &self,
        session: &SessionContext,
        image: &GeneratedImage,
        batch_id: usize,
        _params: &ParamSet,
        metadata: Option<&str>,
    ) -> Result<String, StoreError> {
        let image = convert_to_extension(image, &self.format)?;
        let now = chrono::Utc::now();
        let day = now.format("%Y-%m-%d").to_string();
        let stem = format!("{}-{batch_id}-{}", now.format("%H%M%S"), uuid::Uuid::now_v7().simple());
        let file_name = format!("{stem}.{}", self.format);

        let dir = self.root.join(&session.user_id).join(&day);
        write_file(&dir.join(&file_name), &image.bytes).await?;
        if let Some(metadata) = metadata.filter(|m| !m.trim().is_empty()) {
            write_file(&dir.join(format!("{stem}.json")), metadata.as_bytes()).await?;
        }

        tracing::debug!(user_id = %session.user_id, file = %file_name, "Saved image");
        Ok(format!(
            "/{}/{}/{day}/{file_name}",
            self.url_base, session.user_id
        ))
    }
}

// ---------------------------------------------------------------------------
// WebPageWriter
// ---------------------------------------------------------------------------

/// Writes a web-page grid's cell images into its output folder.
#[derive(Debug, Clone)]
pub struct WebPageWriter {
    dir: PathBuf,
    url_prefix: String,
    format: String,
    publish_metadata: bool,
}

impl WebPageWriter {
    /// * `dir` - the grid folder on disk
    /// * `url_prefix` - URL of that folder, without trailing slash
    pub fn new(
        dir: impl Into<PathBuf>,
        url_prefix: impl Into<String>,
        format: impl Into<String>,
        publish_metadata: bool,
    ) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
            format: format.into(),
            publish_metadata,
        }
    }

    /// Refuse an existing folder unless `overwrite` is set, then make sure
    /// it exists.
    pub async fn prepare(&self, overwrite: bool) -> GridResult<()> {
        let exists = tokio::fs::try_exists(&self.dir)
            .await
            .map_err(|e| GridError::from(StoreError::io(&self.dir, e)))?;
        if exists && !overwrite {
            return Err(GridError::Configuration(
                "Output folder already exists. Choose a new name or allow overwriting.".to_string(),
            ));
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| GridError::from(StoreError::io(&self.dir, e)))
    }

    /// Write one cell as `<stem>.<format>` and, when publishing metadata,
    /// append its entry to `<stem>.metadata.js`. Returns the image URL.
    pub async fn write_cell(
        &self,
        stem: &str,
        image: &GeneratedImage,
        metadata: Option<&str>,
    ) -> Result<String, StoreError> {
        let image = convert_to_extension(image, &self.format)?;
        let file_name = format!("{stem}.{}", self.format);
        write_file(&self.dir.join(&file_name), &image.bytes).await?;

        if self.publish_metadata {
            if let Some(metadata) = metadata.filter(|m| !m.trim().is_empty()) {
                let sidecar = self.dir.join(format!("{stem}{METADATA_SIDECAR_SUFFIX}"));
                write_file(&sidecar, metadata_sidecar_line(stem, metadata).as_bytes()).await?;
            }
        }
        Ok(format!("{}/{file_name}", self.url_prefix))
    }

    /// Save the grid definition so the run can be listed and reloaded later.
    pub async fn write_saved_config(&self, config: &serde_json::Value) -> Result<(), StoreError> {
        let path = self.dir.join(SAVED_CONFIG_FILE);
        let text = serde_json::to_string_pretty(config)
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        write_file(&path, text.as_bytes()).await
    }
}
