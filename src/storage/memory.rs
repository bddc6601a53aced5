//! In-memory object store

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use super::{ByteStream, ObjectMeta, ObjectStore, StorageError};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Arc<[u8]>,
    last_modified: DateTime<Utc>,
}

/// Object store holding its objects in memory
///
/// Keys are kept sorted, so listings come back in lexical key order like S3's.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    bucket: String,
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    /// Create an empty store for a bucket name
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Insert or replace an object
    pub fn put(&self, key: impl Into<String>, data: impl Into<Vec<u8>>, last_modified: DateTime<Utc>) {
        let object = StoredObject {
            data: Arc::from(data.into()),
            last_modified,
        };
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(key.into(), object);
        }
    }

    /// Builder form of [`put`](Self::put)
    pub fn with_object(
        self,
        key: impl Into<String>,
        data: impl Into<Vec<u8>>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        self.put(key, data, last_modified);
        self
    }

    /// Remove an object, returning whether it existed
    pub fn remove(&self, key: &str) -> bool {
        self.objects
            .write()
            .map(|mut objects| objects.remove(key).is_some())
            .unwrap_or(false)
    }

    fn get(&self, key: &str) -> Result<StoredObject, StorageError> {
        let objects = self
            .objects
            .read()
            .map_err(|e| StorageError::Backend(format!("Store lock poisoned: {e}")))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn list_objects(&self, prefix: Option<&str>) -> Result<Vec<ObjectMeta>, StorageError> {
        let objects = self
            .objects
            .read()
            .map_err(|e| StorageError::Backend(format!("Store lock poisoned: {e}")))?;
        let prefix = prefix.unwrap_or("");
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| {
                ObjectMeta::new(key.clone(), object.last_modified, object.data.len() as u64)
            })
            .collect())
    }

    fn open_object(&self, key: &str) -> Result<ByteStream, StorageError> {
        let object = self.get(key)?;
        Ok(Box::new(Cursor::new(object.data)))
    }

    fn open_object_range(
        &self,
        key: &str,
        start: u64,
        end: u64,
    ) -> Result<ByteStream, StorageError> {
        let object = self.get(key)?;
        let size = object.data.len() as u64;
        if end < start {
            return Err(StorageError::InvalidRange {
                key: key.to_string(),
                start,
                end,
                size,
            });
        }
        let start = start.min(size) as usize;
        let end = end.min(size) as usize;
        Ok(Box::new(Cursor::new(object.data[start..end].to_vec())))
    }

    fn object_size(&self, key: &str) -> Result<u64, StorageError> {
        Ok(self.get(key)?.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_list_with_prefix() {
        let store = MemoryObjectStore::new("bucket")
            .with_object("exports/a.csv", "a", ts(1))
            .with_object("exports/b.csv", "bb", ts(2))
            .with_object("other/c.csv", "ccc", ts(3));

        let listed = store.list_objects(Some("exports/")).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].key, "exports/a.csv");
        assert_eq!(listed[1].size, 2);
        assert_eq!(store.list_objects(None).unwrap().len(), 3);
    }

    #[test]
    fn test_range_is_clamped() {
        let store = MemoryObjectStore::new("bucket").with_object("f", "0123456789", ts(0));

        assert_eq!(store.read_range("f", 2, 5).unwrap(), b"234");
        assert_eq!(store.read_range("f", 8, 100).unwrap(), b"89");
        assert!(store.read_range("f", 20, 30).unwrap().is_empty());
        assert!(matches!(
            store.open_object_range("f", 5, 2),
            Err(StorageError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_missing_object() {
        let store = MemoryObjectStore::new("bucket");
        assert!(matches!(
            store.open_object("nope"),
            Err(StorageError::NotFound(_))
        ));
    }
}
