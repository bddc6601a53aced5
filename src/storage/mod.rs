//! Object store abstraction
//!
//! Defines the ObjectStore trait the tap reads buckets through, and its implementations:
//! - MemoryObjectStore: in-process bucket (tests, embedding)
//! - LocalObjectStore: a local directory treated as a bucket
//! - S3ObjectStore: Amazon S3 and S3-compatible endpoints

use std::io::Read;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error type for object store operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Invalid range {start}..{end} for {key} (size {size})")]
    InvalidRange {
        key: String,
        start: u64,
        end: u64,
        size: u64,
    },
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

/// A listed object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Full object key
    pub key: String,
    /// Last modification time
    pub last_modified: DateTime<Utc>,
    /// Size in bytes
    pub size: u64,
}

impl ObjectMeta {
    /// Create a new object description
    pub fn new(key: impl Into<String>, last_modified: DateTime<Utc>, size: u64) -> Self {
        Self {
            key: key.into(),
            last_modified,
            size,
        }
    }

    /// Final path segment of the key
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Owned byte stream returned by the store; dropping it releases the underlying handle
pub type ByteStream = Box<dyn Read + Send>;

/// Trait for object stores
///
/// Calls are blocking and either succeed or fail; retrying transient transport
/// failures is the job of the store implementation or a wrapper around it.
pub trait ObjectStore: Send + Sync {
    /// Bucket name reported in `_sdc_source_bucket`
    fn bucket(&self) -> &str;

    /// List every object under an optional key prefix (pagination is handled internally)
    fn list_objects(&self, prefix: Option<&str>) -> Result<Vec<ObjectMeta>, StorageError>;

    /// Open an object for sequential reading
    fn open_object(&self, key: &str) -> Result<ByteStream, StorageError>;

    /// Open the half-open byte range `[start, end)` of an object
    ///
    /// `end` past the object size is clamped; `start` at or past the size yields an
    /// empty stream.
    fn open_object_range(&self, key: &str, start: u64, end: u64)
    -> Result<ByteStream, StorageError>;

    /// Size of an object in bytes
    fn object_size(&self, key: &str) -> Result<u64, StorageError>;

    /// Read an object fully into memory
    fn read_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let mut buf = Vec::new();
        self.open_object(key)?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Read a byte range fully into memory
    fn read_range(&self, key: &str, start: u64, end: u64) -> Result<Vec<u8>, StorageError> {
        let mut buf = Vec::new();
        self.open_object_range(key, start, end)?
            .read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl<S: ObjectStore + ?Sized> ObjectStore for &S {
    fn bucket(&self) -> &str {
        (**self).bucket()
    }

    fn list_objects(&self, prefix: Option<&str>) -> Result<Vec<ObjectMeta>, StorageError> {
        (**self).list_objects(prefix)
    }

    fn open_object(&self, key: &str) -> Result<ByteStream, StorageError> {
        (**self).open_object(key)
    }

    fn open_object_range(
        &self,
        key: &str,
        start: u64,
        end: u64,
    ) -> Result<ByteStream, StorageError> {
        (**self).open_object_range(key, start, end)
    }

    fn object_size(&self, key: &str) -> Result<u64, StorageError> {
        (**self).object_size(key)
    }
}

pub mod memory;

#[cfg(feature = "native-fs")]
pub mod filesystem;

#[cfg(feature = "s3")]
pub mod s3;

pub use memory::MemoryObjectStore;

#[cfg(feature = "native-fs")]
pub use filesystem::LocalObjectStore;

#[cfg(feature = "s3")]
pub use s3::{S3ObjectStore, S3Source};
