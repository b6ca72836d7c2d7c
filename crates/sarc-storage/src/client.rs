//! Object store client: put/get/delete/exists/list addressed by bucket + key

use async_trait::async_trait;
use opendal::{EntryMode, Operator};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::retry::RetryPolicy;

/// Narrow, stateless interface to a networked blob store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> StorageResult<()>;

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>>;

    /// Deleting an object that does not exist is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool>;

    /// All object keys below `prefix` (recursive).
    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>>;
}

/// [`ObjectStore`] over OpenDAL operators, one per bucket.
#[derive(Clone)]
pub struct OpendalStore {
    buckets: HashMap<String, Operator>,
    retry: RetryPolicy,
}

impl OpendalStore {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            buckets: HashMap::new(),
            retry,
        }
    }

    /// Register the operator serving `bucket`.
    pub fn with_bucket(mut self, bucket: impl Into<String>, op: Operator) -> Self {
        self.buckets.insert(bucket.into(), op);
        self
    }

    pub fn operator(&self, bucket: &str) -> StorageResult<&Operator> {
        self.buckets
            .get(bucket)
            .ok_or_else(|| StorageError::UnknownBucket(bucket.to_string()))
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

#[async_trait]
impl ObjectStore for OpendalStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> StorageResult<()> {
        let op = self.operator(bucket)?;
        let len = bytes.len();
        self.retry
            .run("put", || async {
                op.write(key, bytes.clone())
                    .await
                    .map(|_| ())
                    .map_err(|e| StorageError::from_opendal(e, bucket, key))
            })
            .await?;
        debug!(bucket, key, bytes = len, "object written");
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let op = self.operator(bucket)?;
        self.retry
            .run("get", || async {
                op.read(key)
                    .await
                    .map(|buf| buf.to_vec())
                    .map_err(|e| StorageError::from_opendal(e, bucket, key))
            })
            .await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let op = self.operator(bucket)?;
        self.retry
            .run("delete", || async {
                match op.delete(key).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(StorageError::from_opendal(e, bucket, key)),
                }
            })
            .await?;
        debug!(bucket, key, "object deleted");
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        let op = self.operator(bucket)?;
        self.retry
            .run("exists", || async {
                op.exists(key)
                    .await
                    .map_err(|e| StorageError::from_opendal(e, bucket, key))
            })
            .await
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let op = self.operator(bucket)?;
        let dir = if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{prefix}/")
        };
        let entries = self
            .retry
            .run("list", || async {
                op.list_with(&dir)
                    .recursive(true)
                    .await
                    .map_err(|e| StorageError::from_opendal(e, bucket, &dir))
            })
            .await;

        match entries {
            Ok(entries) => Ok(entries
                .into_iter()
                .filter(|e| e.metadata().mode() == EntryMode::FILE)
                .map(|e| e.path().to_string())
                .collect()),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
