//! Per-user listing of saved grid runs.
//!
//! A saved run is a folder anywhere below `<output>/<user>/Grids/` that
//! holds a saved grid config. Nested runs are listed by their relative
//! path, e.g. `animals/cats`. Listings are cached per user until a run
//! saves or deletes a config.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use gridgen_core::error::{GridError, GridResult};
use gridgen_core::naming::{strict_filename_clean, GRIDS_DIR, SAVED_CONFIG_FILE};

#[derive(Debug)]
pub struct HistoryCache {
    output_dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<Vec<String>>>>,
}

impl HistoryCache {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn grids_dir(&self, user_id: &str) -> PathBuf {
        self.output_dir.join(user_id).join(GRIDS_DIR)
    }

    /// Saved run names of `user_id`, newest first.
    pub async fn list(&self, user_id: &str) -> GridResult<Arc<Vec<String>>> {
        if let Some(cached) = self.cache.lock().get(user_id) {
            return Ok(Arc::clone(cached));
        }

        let listing = Arc::new(self.scan(user_id).await?);
        self.cache
            .lock()
            .insert(user_id.to_string(), Arc::clone(&listing));
        Ok(listing)
    }

    async fn scan(&self, user_id: &str) -> GridResult<Vec<String>> {
        let root = self.grids_dir(user_id);
        let mut found: Vec<(SystemTime, String)> = Vec::new();
        let mut pending: Vec<(PathBuf, String)> = vec![(root, String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(GridError::Internal(format!("read {}: {e}", dir.display()))),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| GridError::Internal(e.to_string()))?
            {
                // Symlinks are not followed.
                let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                if !is_dir {
                    continue;
                }
                let file_name = entry.file_name().to_string_lossy().into_owned();
                let name = if prefix.is_empty() {
                    file_name
                } else {
                    format!("{prefix}/{file_name}")
                };
                if let Ok(meta) = tokio::fs::metadata(entry.path().join(SAVED_CONFIG_FILE)).await {
                    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    found.push((modified, name.clone()));
                }
                pending.push((entry.path(), name));
            }
        }

        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(found.into_iter().map(|(_, name)| name).collect())
    }

    /// Drop the cached listing of `user_id`.
    pub fn invalidate(&self, user_id: &str) {
        self.cache.lock().remove(user_id);
    }

    /// Whether `folder` (already cleaned, e.g. `Grids/name`) exists for the user.
    pub async fn folder_exists(&self, user_id: &str, folder: &str) -> bool {
        let path = self.output_dir.join(user_id).join(folder);
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    /// Remove the saved config of run `name`, which may be nested as
    /// listed. Images are left in place. Returns whether a config was
    /// removed.
    pub async fn delete(&self, user_id: &str, name: &str) -> GridResult<bool> {
        let cleaned = strict_filename_clean(name);
        if cleaned.is_empty() {
            return Err(GridError::Configuration(format!("Invalid grid name '{name}'")));
        }
        let path = self.grids_dir(user_id).join(&cleaned).join(SAVED_CONFIG_FILE);
        let removed = match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(GridError::Persistence(format!("{}: {e}", path.display()))),
        };
        self.invalidate(user_id);
        if removed {
            tracing::info!(user_id, grid = %cleaned, "Deleted saved grid config");
        }
        Ok(removed)
    }
}
