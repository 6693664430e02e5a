//! Object stores that hand out range readers by key.
//!
//! A remote session needs a fresh reader per handle; the store is the shared,
//! cheaply cloneable thing that knows how to build one.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;
use parking_lot::RwLock;

use super::{MemoryRangeReader, RangeReader, S3RangeReader};
use crate::error::IoError;

/// Source of range readers for objects addressed by key.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// The type of range reader this store creates.
    type Reader: RangeReader + 'static;

    /// Open a reader for the object at `key`.
    ///
    /// This is expected to involve a round trip (object metadata lookup).
    async fn open_reader(&self, key: &str) -> Result<Self::Reader, IoError>;

    /// Human-readable location of `key` for logs.
    fn locate(&self, key: &str) -> String;
}

/// Fetch an entire object through `store`.
pub async fn read_object<S: ObjectStore + ?Sized>(store: &S, key: &str) -> Result<Bytes, IoError> {
    let reader = store.open_reader(key).await?;
    let size = usize::try_from(reader.size()).map_err(|_| IoError::RangeOutOfBounds {
        offset: 0,
        requested: reader.size(),
        size: reader.size(),
    })?;
    reader.read_exact_at(0, size).await
}

// =============================================================================
// S3ObjectStore
// =============================================================================

/// S3-backed implementation of `ObjectStore`.
///
/// # Example
///
/// ```ignore
/// let client = create_s3_client(None, "us-east-1").await;
/// let store = S3ObjectStore::new(client, "my-bucket".to_string());
///
/// // Performs a HEAD request for the object size
/// let reader = store.open_reader("images/brain/data.raw").await?;
/// ```
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Create a new store for the given bucket.
    ///
    /// # Arguments
    /// * `client` - AWS S3 client to use for requests
    /// * `bucket` - S3 bucket name containing the datasets
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Get the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    type Reader = S3RangeReader;

    async fn open_reader(&self, key: &str) -> Result<Self::Reader, IoError> {
        S3RangeReader::open(self.client.clone(), self.bucket.clone(), key).await
    }

    fn locate(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

// =============================================================================
// MemoryObjectStore
// =============================================================================

/// In-memory object store.
///
/// Clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under `key`, replacing any previous object.
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.write().insert(key.into(), data.into());
    }

    /// Remove the object at `key`.
    pub fn remove(&self, key: &str) -> Option<Bytes> {
        self.objects.write().remove(key)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    type Reader = MemoryRangeReader;

    async fn open_reader(&self, key: &str) -> Result<Self::Reader, IoError> {
        let data = self
            .objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| IoError::NotFound(self.locate(key)))?;
        Ok(MemoryRangeReader::new(data, self.locate(key)))
    }

    fn locate(&self, key: &str) -> String {
        format!("mem://{}", key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_store_bucket() {
        // No S3 traffic here, only the basic structure
        let client = aws_sdk_s3::Client::from_conf(
            aws_sdk_s3::Config::builder()
                .behavior_version_latest()
                .build(),
        );
        let store = S3ObjectStore::new(client, "test-bucket".to_string());
        assert_eq!(store.bucket(), "test-bucket");
        assert_eq!(store.locate("a/b.json"), "s3://test-bucket/a/b.json");
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryObjectStore::new();
        store.insert("manifest.json", b"{}".to_vec());

        let bytes = read_object(&store, "manifest.json").await.unwrap();
        assert_eq!(&bytes[..], b"{}");

        let missing = store.open_reader("absent").await;
        assert!(matches!(missing, Err(IoError::NotFound(ref loc)) if loc == "mem://absent"));

        assert!(store.remove("manifest.json").is_some());
        assert!(store.open_reader("manifest.json").await.is_err());
    }
}
