//! Filesystem media store.
//!
//! Files live under `media.root`; the database only ever holds paths
//! relative to that root (`uploads/images/..`, `results/..`, `reports/..`).

use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppError, StorageError};

pub const UPLOADS_DIR: &str = "uploads/images";
pub const RESULTS_DIR: &str = "results";
pub const REPORTS_DIR: &str = "reports";

#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the directory layout below the root.
    pub async fn init(&self) -> Result<(), AppError> {
        for dir in [UPLOADS_DIR, RESULTS_DIR, REPORTS_DIR] {
            tokio::fs::create_dir_all(self.root.join(dir)).await?;
        }
        info!(root = %self.root.display(), "Media store ready");
        Ok(())
    }

    /// Resolves a stored relative path, rejecting anything that escapes the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, AppError> {
        let path = Path::new(relative);
        let clean = !relative.is_empty()
            && path.components().all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StorageError::InvalidPath(relative.to_string()).into());
        }
        Ok(self.root.join(path))
    }

    /// Writes an uploaded original as `uploads/images/<uuid>_<name>`.
    pub async fn save_upload(&self, file_name: &str, bytes: &[u8]) -> Result<String, AppError> {
        let relative = format!("{}/{}_{}", UPLOADS_DIR, Uuid::new_v4(), sanitize_file_name(file_name));
        self.write(&relative, bytes).await?;
        Ok(relative)
    }

    pub async fn write(&self, relative: &str, bytes: &[u8]) -> Result<(), AppError> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("{}: {}", relative, e)))?;
        debug!(path = %relative, size = bytes.len(), "Stored media file");
        Ok(())
    }

    pub async fn read(&self, relative: &str) -> Result<Vec<u8>, AppError> {
        let path = self.resolve(relative)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::Missing(relative.to_string()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Removes a file, ignoring every failure.
    pub async fn delete_quietly(&self, relative: &str) {
        let path = match self.resolve(relative) {
            Ok(path) => path,
            Err(e) => {
                debug!(path = %relative, error = %e, "Skipping delete of invalid media path");
                return;
            }
        };
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!(path = %relative, error = %e, "Media delete failed");
        }
    }

    pub async fn exists(&self, relative: &str) -> bool {
        match self.resolve(relative) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}

/// Public URL of a stored file: `<base>/media/<relative>`.
pub fn media_url(base: &str, relative: &str) -> String {
    format!("{}/media/{}", base.trim_end_matches('/'), relative)
}

/// Reduces a client supplied file name to a safe single path segment.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `results/<stem of the stored upload>.png`
pub fn result_path_for(upload_relative: &str) -> String {
    let stem = Path::new(upload_relative)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("result");
    format!("{}/{}.png", RESULTS_DIR, stem)
}

pub fn content_type_for(relative: &str) -> &'static str {
    let extension = Path::new(relative)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}
