//! Access-control metadata provided by the storage backend.

use async_trait::async_trait;
use s3gate_model::AclMetadata;

/// Errors a backend may return while looking up ACL metadata.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// The bucket does not exist.
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    /// The object does not exist in an existing bucket.
    #[error("no such key: {bucket}/{key}")]
    NoSuchKey {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
    },

    /// The backend could not answer.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Source of bucket and object ACLs.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// ACL metadata of `bucket`.
    async fn get_bucket_acl(&self, bucket: &str) -> Result<AclMetadata, BackendError>;

    /// ACL metadata of `bucket/key`.
    async fn get_object_acl(&self, bucket: &str, key: &str) -> Result<AclMetadata, BackendError>;
}
