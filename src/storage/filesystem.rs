//! Local directory object store
//!
//! Treats a directory as a bucket: keys are `/`-separated paths relative to the
//! base directory.
//!
//! ## Security
//!
//! All key lookups are validated to prevent path traversal attacks.
//! Keys containing ".." are rejected, and all resolved paths are verified
//! to remain within the base directory.

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};

use super::{ByteStream, ObjectMeta, ObjectStore, StorageError};

/// Directory-backed object store
pub struct LocalObjectStore {
    base_path: PathBuf,
    bucket: String,
}

impl LocalObjectStore {
    /// Create a store rooted at `base_path`
    ///
    /// The bucket name defaults to the directory's final component.
    ///
    /// # Example
    ///
    /// ```rust
    /// use s3_csv_tap::storage::LocalObjectStore;
    ///
    /// let store = LocalObjectStore::new("/data/exports");
    /// ```
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        let base_path = base_path.as_ref().to_path_buf();
        let bucket = base_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| base_path.display().to_string());
        Self { base_path, bucket }
    }

    /// Override the reported bucket name
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Resolve a key relative to the base path with security checks.
    ///
    /// # Security
    ///
    /// - Rejects keys containing ".." components
    /// - Verifies the resolved path stays within base_path
    fn resolve_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let normalized = key.trim_start_matches('/');

        if normalized.split('/').any(|segment| segment == "..") {
            return Err(StorageError::PermissionDenied(
                "Path traversal (..) not allowed".to_string(),
            ));
        }

        let full = self.base_path.join(normalized);

        for component in full.components() {
            if matches!(component, Component::ParentDir) {
                return Err(StorageError::PermissionDenied(
                    "Path traversal not allowed".to_string(),
                ));
            }
        }

        if !full.exists() {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let canonical = full.canonicalize()?;
        let base_canonical = self
            .base_path
            .canonicalize()
            .unwrap_or_else(|_| self.base_path.clone());

        if !canonical.starts_with(&base_canonical) {
            return Err(StorageError::PermissionDenied(
                "Path escapes base directory".to_string(),
            ));
        }

        Ok(canonical)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base_path).ok()?;
        let segments: Vec<String> = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if segments.is_empty() {
            None
        } else {
            Some(segments.join("/"))
        }
    }
}

impl ObjectStore for LocalObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn list_objects(&self, prefix: Option<&str>) -> Result<Vec<ObjectMeta>, StorageError> {
        let root = glob::Pattern::escape(&self.base_path.display().to_string());
        let pattern = format!("{}/**/*", root.trim_end_matches('/'));

        let entries = glob::glob(&pattern)
            .map_err(|e| StorageError::Backend(format!("{pattern}: {e}")))?;

        let prefix = prefix.unwrap_or("");
        let mut objects = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!("Error accessing path: {}", e);
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            let Some(key) = self.key_for(&path) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            let metadata = fs::metadata(&path)?;
            let last_modified: DateTime<Utc> = metadata.modified()?.into();
            objects.push(ObjectMeta::new(key, last_modified, metadata.len()));
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn open_object(&self, key: &str) -> Result<ByteStream, StorageError> {
        let path = self.resolve_path(key)?;
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }

    fn open_object_range(
        &self,
        key: &str,
        start: u64,
        end: u64,
    ) -> Result<ByteStream, StorageError> {
        let path = self.resolve_path(key)?;
        let mut file = File::open(path)?;
        let size = file.metadata()?.len();
        if end < start {
            return Err(StorageError::InvalidRange {
                key: key.to_string(),
                start,
                end,
                size,
            });
        }
        let start = start.min(size);
        let end = end.min(size);
        file.seek(SeekFrom::Start(start))?;
        Ok(Box::new(BufReader::new(file.take(end - start))))
    }

    fn object_size(&self, key: &str) -> Result<u64, StorageError> {
        let path = self.resolve_path(key)?;
        Ok(fs::metadata(path)?.len())
    }
}
