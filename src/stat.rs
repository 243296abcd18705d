//! Object metadata: stat, user metadata and tags

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::bucket::{BucketName, ObjectKey};
use crate::error::{Operation, StoreError, StoreResult};
use crate::recovery::Retrier;
use crate::transport::Transport;
use crate::types::{ObjectSource, ObjectStat};

/// Maximum number of tags per object
pub const MAX_TAGS: usize = 10;

const MAX_TAG_KEY_LEN: usize = 128;
const MAX_TAG_VALUE_LEN: usize = 256;

/// Reads and updates object metadata. Nothing is cached; every call asks the store.
#[derive(Clone)]
pub struct StatAccessor {
    transport: Arc<dyn Transport>,
    retrier: Retrier,
}

impl StatAccessor {
    pub fn new(transport: Arc<dyn Transport>, retrier: Retrier) -> Self {
        Self { transport, retrier }
    }

    /// Current metadata of `bucket/key`
    pub async fn stat(&self, bucket: &BucketName, key: &ObjectKey) -> StoreResult<ObjectStat> {
        self.stat_version(bucket, key, None).await
    }

    /// Metadata of a specific object version
    pub async fn stat_version(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        version_id: Option<&str>,
    ) -> StoreResult<ObjectStat> {
        let (bucket, key) = (bucket.as_str(), key.as_str());
        let head = self
            .retrier
            .run(Operation::HeadObject, bucket, key, || {
                self.transport.head_object(bucket, key, version_id)
            })
            .await?;

        debug!(bucket, key, size = head.size, "Stat");
        Ok(ObjectStat {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: head.size,
            content_type: head.content_type,
            etag: head.etag,
            last_modified: head.last_modified,
            version_id: head.version_id,
            user_metadata: head.user_metadata,
        })
    }

    /// Stat a copy/compose source, reporting absence as `SourceNotFound`
    pub async fn stat_source(&self, source: &ObjectSource) -> StoreResult<ObjectStat> {
        self.stat_version(&source.bucket, &source.key, source.version_id.as_deref())
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } | StoreError::BucketNotFound { .. } => {
                    StoreError::SourceNotFound {
                        bucket: source.bucket.to_string(),
                        key: source.key.to_string(),
                        version_id: source.version_id.clone(),
                    }
                }
                other => other,
            })
    }

    /// User metadata (`x-amz-meta-*`) of an object
    pub async fn user_metadata(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
    ) -> StoreResult<HashMap<String, String>> {
        Ok(self.stat(bucket, key).await?.user_metadata)
    }

    pub async fn tags(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
    ) -> StoreResult<HashMap<String, String>> {
        let (bucket, key) = (bucket.as_str(), key.as_str());
        self.retrier
            .run(Operation::GetObjectTagging, bucket, key, || {
                self.transport.get_object_tagging(bucket, key)
            })
            .await
    }

    /// Replace the tag set of an object
    pub async fn set_tags(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        tags: &HashMap<String, String>,
    ) -> StoreResult<()> {
        validate_tags(tags)?;
        let (bucket, key) = (bucket.as_str(), key.as_str());
        self.retrier
            .run(Operation::PutObjectTagging, bucket, key, || {
                self.transport.put_object_tagging(bucket, key, tags)
            })
            .await
    }

    pub async fn delete_tags(&self, bucket: &BucketName, key: &ObjectKey) -> StoreResult<()> {
        let (bucket, key) = (bucket.as_str(), key.as_str());
        self.retrier
            .run(Operation::DeleteObjectTagging, bucket, key, || {
                self.transport.delete_object_tagging(bucket, key)
            })
            .await
    }
}

fn validate_tags(tags: &HashMap<String, String>) -> StoreResult<()> {
    if tags.len() > MAX_TAGS {
        return Err(StoreError::InvalidArgument(format!(
            "{} tags given, at most {} allowed",
            tags.len(),
            MAX_TAGS
        )));
    }
    for (key, value) in tags {
        if key.is_empty() || key.chars().count() > MAX_TAG_KEY_LEN {
            return Err(StoreError::InvalidArgument(format!(
                "tag key {:?} must be 1 to {} characters",
                key, MAX_TAG_KEY_LEN
            )));
        }
        if value.chars().count() > MAX_TAG_VALUE_LEN {
            return Err(StoreError::InvalidArgument(format!(
                "value of tag {:?} exceeds {} characters",
                key, MAX_TAG_VALUE_LEN
            )));
        }
    }
    Ok(())
}
