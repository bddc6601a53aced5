//! S3 object store
//!
//! Lists and reads objects from Amazon S3 (or an S3-compatible endpoint such as
//! MinIO). The SDK is asynchronous; the store owns a runtime and blocks on each
//! call so the rest of the tap stays synchronous.

use std::io::Cursor;

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use tokio::runtime::Runtime;

use super::{ByteStream, ObjectMeta, ObjectStore, StorageError};

/// Where the tap's bucket lives and how to reach it
#[derive(Debug, Clone)]
pub struct S3Source {
    pub bucket: String,
    /// Falls back to the SDK's region chain when unset
    pub region: Option<String>,
    /// Named credentials profile
    pub profile: Option<String>,
    /// Alternate endpoint, e.g. a MinIO or LocalStack URL
    pub endpoint_url: Option<String>,
}

impl S3Source {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: None,
            profile: None,
            endpoint_url: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint.into());
        self
    }

    /// `s3://bucket/key`, used in error messages
    pub fn display(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

/// Object store backed by the AWS SDK
pub struct S3ObjectStore {
    client: S3Client,
    source: S3Source,
    runtime: Runtime,
}

impl S3ObjectStore {
    /// Connect with the default credential chain
    ///
    /// Credentials are loaded from the environment in this order:
    /// 1. Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY)
    /// 2. AWS credentials file (~/.aws/credentials)
    /// 3. IAM role (if running on AWS infrastructure)
    pub fn connect(source: S3Source) -> Result<Self, StorageError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| StorageError::Backend(format!("Failed to start runtime: {e}")))?;

        let client = runtime.block_on(async {
            let mut config_loader = aws_config::defaults(BehaviorVersion::latest());

            if let Some(region) = &source.region {
                config_loader = config_loader.region(aws_config::Region::new(region.clone()));
            }

            if let Some(profile) = &source.profile {
                config_loader = config_loader.profile_name(profile);
            }

            let config = config_loader.load().await;
            let mut s3_config = aws_sdk_s3::config::Builder::from(&config);

            if let Some(endpoint) = &source.endpoint_url {
                s3_config = s3_config.endpoint_url(endpoint);
                s3_config = s3_config.force_path_style(true);
            }

            S3Client::from_conf(s3_config.build())
        });

        Ok(Self {
            client,
            source,
            runtime,
        })
    }

    /// Get the source configuration
    pub fn source(&self) -> &S3Source {
        &self.source
    }

    fn fetch(&self, key: &str, range: Option<String>) -> Result<Vec<u8>, StorageError> {
        self.runtime.block_on(async {
            let mut request = self
                .client
                .get_object()
                .bucket(&self.source.bucket)
                .key(key);
            if let Some(range) = range {
                request = request.range(range);
            }

            let response = request.send().await.map_err(|e| {
                StorageError::Backend(format!("{}: {}", self.source.display(key), e))
            })?;

            let bytes = response
                .body
                .collect()
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;

            Ok(bytes.into_bytes().to_vec())
        })
    }
}

fn to_utc(value: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    value
        .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
        .unwrap_or_default()
}

impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.source.bucket
    }

    fn list_objects(&self, prefix: Option<&str>) -> Result<Vec<ObjectMeta>, StorageError> {
        self.runtime.block_on(async {
            let mut objects = Vec::new();
            let mut continuation_token: Option<String> = None;

            loop {
                let mut request = self.client.list_objects_v2().bucket(&self.source.bucket);

                if let Some(prefix) = prefix {
                    request = request.prefix(prefix);
                }
                if let Some(token) = continuation_token {
                    request = request.continuation_token(token);
                }

                let response = request.send().await.map_err(|e| {
                    StorageError::Backend(format!(
                        "{}: {}",
                        self.source.display(prefix.unwrap_or("")),
                        e
                    ))
                })?;

                if let Some(contents) = response.contents {
                    for object in contents {
                        let last_modified = to_utc(object.last_modified.as_ref());
                        let size = object.size.unwrap_or(0).max(0) as u64;
                        if let Some(key) = object.key {
                            objects.push(ObjectMeta::new(key, last_modified, size));
                        }
                    }
                }

                if response.is_truncated.unwrap_or(false) {
                    continuation_token = response.next_continuation_token;
                } else {
                    break;
                }
            }

            tracing::debug!(
                bucket = %self.source.bucket,
                count = objects.len(),
                "Listed objects"
            );
            Ok(objects)
        })
    }

    fn open_object(&self, key: &str) -> Result<ByteStream, StorageError> {
        Ok(Box::new(Cursor::new(self.fetch(key, None)?)))
    }

    fn open_object_range(
        &self,
        key: &str,
        start: u64,
        end: u64,
    ) -> Result<ByteStream, StorageError> {
        let size = self.object_size(key)?;
        if end < start {
            return Err(StorageError::InvalidRange {
                key: key.to_string(),
                start,
                end,
                size,
            });
        }
        let end = end.min(size);
        if start >= end {
            return Ok(Box::new(Cursor::new(Vec::new())));
        }
        // HTTP ranges are inclusive on both ends
        let range = format!("bytes={}-{}", start, end - 1);
        Ok(Box::new(Cursor::new(self.fetch(key, Some(range))?)))
    }

    fn object_size(&self, key: &str) -> Result<u64, StorageError> {
        self.runtime.block_on(async {
            let response = self
                .client
                .head_object()
                .bucket(&self.source.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| {
                    StorageError::Backend(format!("{}: {}", self.source.display(key), e))
                })?;
            Ok(response.content_length.unwrap_or(0).max(0) as u64)
        })
    }
}
