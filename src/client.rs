//! Object store facade
//!
//! [`ObjectStore`] bundles the transfer engine, stat accessor, batch deleter
//! and presigner over one shared transport, and adds bucket-level helpers.
//! Every call names its bucket explicitly; [`BoundBucket`] is the
//! convenience layer for code that works against a single bucket.

use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tracing::{debug, info};
use url::Url;

use crate::batch::BatchDeleter;
use crate::bucket::{BucketName, ObjectKey};
use crate::config::StoreConfig;
use crate::error::{Operation, StoreError, StoreResult};
use crate::presign::{validate_expiry, PresignRequest, Presigner};
use crate::recovery::Retrier;
use crate::stat::StatAccessor;
use crate::transfer::TransferEngine;
use crate::transport::Transport;
use crate::types::{
    BucketInfo, ByteRange, DeleteOutcome, IncompleteUpload, ObjectBody, ObjectSource, ObjectStat,
    ObjectSummary, PutOptions, TransferResult, UploadSource,
};

/// Delimiter used for non-recursive listings and folder placeholders
const FOLDER_DELIMITER: &str = "/";

/// Client for one S3-compatible endpoint
#[derive(Clone)]
pub struct ObjectStore {
    config: StoreConfig,
    transport: Arc<dyn Transport>,
    retrier: Retrier,
    engine: TransferEngine,
    stats: StatAccessor,
    deleter: BatchDeleter,
    presigner: Option<Presigner>,
}

impl ObjectStore {
    /// Store over an explicit transport. The configuration is validated here.
    ///
    /// Presigning is available when the configuration carries static
    /// credentials.
    pub fn new(config: StoreConfig, transport: Arc<dyn Transport>) -> StoreResult<Self> {
        config.validate()?;

        let transfer = config.transfer.clone();
        let retrier = Retrier::new(transfer.retry_policy(), transfer.request_timeout());
        let engine = TransferEngine::new(transport.clone(), transfer.clone());
        let stats = StatAccessor::new(transport.clone(), retrier.clone());
        let deleter = BatchDeleter::new(
            transport.clone(),
            retrier.clone(),
            transfer.delete_batch_size,
            transfer.parallel_parts,
        );
        let presigner = if config.access_key.is_some() {
            Some(Presigner::from_config(&config)?)
        } else {
            None
        };

        Ok(Self {
            config,
            transport,
            retrier,
            engine,
            stats,
            deleter,
            presigner,
        })
    }

    /// Store over the AWS SDK transport
    #[cfg(feature = "sdk-transport")]
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let transport = crate::transport::SdkTransport::from_config(&config).await?;
        info!(
            endpoint = %config.endpoint_url()?,
            region = %config.region,
            path_style = config.force_path_style,
            "Connected object store"
        );
        Self::new(config, Arc::new(transport))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    /// Operations bound to `bucket`; the name is validated here
    pub fn bind(&self, bucket: impl Into<String>) -> StoreResult<BoundBucket<'_>> {
        Ok(BoundBucket {
            store: self,
            bucket: BucketName::parse(bucket)?,
        })
    }

    /// Operations bound to the configured `default_bucket`
    pub fn default_bucket(&self) -> StoreResult<BoundBucket<'_>> {
        let bucket = self.config.default_bucket.clone().ok_or_else(|| {
            StoreError::InvalidConfig("no default_bucket configured".to_string())
        })?;
        Ok(BoundBucket {
            store: self,
            bucket,
        })
    }

    // ----- transfers -----

    pub async fn put(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        source: UploadSource,
        options: PutOptions,
    ) -> StoreResult<TransferResult> {
        self.engine.put(bucket, key, source, options).await
    }

    pub async fn put_path(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        path: impl AsRef<Path>,
        options: PutOptions,
    ) -> StoreResult<TransferResult> {
        self.engine.put_path(bucket, key, path, options).await
    }

    pub async fn put_reader<R>(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        reader: R,
        size: Option<u64>,
        options: PutOptions,
    ) -> StoreResult<TransferResult>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.engine
            .put_reader(bucket, key, reader, size, options)
            .await
    }

    pub async fn put_bytes(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        data: impl Into<Bytes>,
        options: PutOptions,
    ) -> StoreResult<TransferResult> {
        self.engine.put_bytes(bucket, key, data, options).await
    }

    pub async fn get(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        range: Option<ByteRange>,
    ) -> StoreResult<ObjectBody> {
        self.engine.get(bucket, key, range).await
    }

    pub async fn download_to_path(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        path: impl AsRef<Path>,
        resume: bool,
    ) -> StoreResult<u64> {
        self.engine.download_to_path(bucket, key, path, resume).await
    }

    pub async fn copy(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        source: &ObjectSource,
    ) -> StoreResult<TransferResult> {
        self.engine.copy(bucket, key, source).await
    }

    pub async fn compose(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        sources: &[ObjectSource],
    ) -> StoreResult<TransferResult> {
        self.engine.compose(bucket, key, sources).await
    }

    pub async fn list_incomplete_uploads(
        &self,
        bucket: &BucketName,
        prefix: &str,
    ) -> StoreResult<Vec<IncompleteUpload>> {
        self.engine.list_incomplete_uploads(bucket, prefix).await
    }

    pub async fn abort_incomplete_uploads(
        &self,
        bucket: &BucketName,
        prefix: &str,
    ) -> StoreResult<usize> {
        self.engine.abort_incomplete_uploads(bucket, prefix).await
    }

    // ----- metadata -----

    pub async fn stat(&self, bucket: &BucketName, key: &ObjectKey) -> StoreResult<ObjectStat> {
        self.stats.stat(bucket, key).await
    }

    pub async fn stat_version(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        version_id: &str,
    ) -> StoreResult<ObjectStat> {
        self.stats.stat_version(bucket, key, Some(version_id)).await
    }

    /// Whether `bucket/key` exists
    pub async fn object_exists(&self, bucket: &BucketName, key: &ObjectKey) -> StoreResult<bool> {
        match self.stats.stat(bucket, key).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn user_metadata(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
    ) -> StoreResult<HashMap<String, String>> {
        self.stats.user_metadata(bucket, key).await
    }

    pub async fn tags(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
    ) -> StoreResult<HashMap<String, String>> {
        self.stats.tags(bucket, key).await
    }

    pub async fn set_tags(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        tags: &HashMap<String, String>,
    ) -> StoreResult<()> {
        self.stats.set_tags(bucket, key, tags).await
    }

    pub async fn delete_tags(&self, bucket: &BucketName, key: &ObjectKey) -> StoreResult<()> {
        self.stats.delete_tags(bucket, key).await
    }

    // ----- deletes -----

    pub async fn delete(&self, bucket: &BucketName, key: &ObjectKey) -> StoreResult<()> {
        self.deleter.delete(bucket, key).await
    }

    pub async fn delete_many(
        &self,
        bucket: &BucketName,
        keys: &[ObjectKey],
    ) -> StoreResult<Vec<DeleteOutcome>> {
        self.deleter.delete_many(bucket, keys).await
    }

    // ----- presigning -----

    /// Presign `request` with the configured credentials
    ///
    /// The expiry is checked before anything else, so an out-of-range expiry
    /// reports `InvalidExpiry` even without credentials.
    pub fn presign(&self, request: &PresignRequest) -> StoreResult<Url> {
        validate_expiry(request.expiry)?;
        self.presigner()?.presign(request)
    }

    pub fn presign_get(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        expiry: Duration,
    ) -> StoreResult<Url> {
        self.presign(&PresignRequest::get(bucket.clone(), key.clone(), expiry))
    }

    pub fn presign_put(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        expiry: Duration,
    ) -> StoreResult<Url> {
        self.presign(&PresignRequest::put(bucket.clone(), key.clone(), expiry))
    }

    /// Unsigned URL of an object
    pub fn object_url(&self, bucket: &BucketName, key: &ObjectKey) -> StoreResult<Url> {
        self.presigner()?.object_url(bucket, key)
    }

    fn presigner(&self) -> StoreResult<&Presigner> {
        self.presigner.as_ref().ok_or_else(|| {
            StoreError::InvalidConfig(
                "presigning requires access_key and secret_key".to_string(),
            )
        })
    }

    // ----- buckets -----

    pub async fn bucket_exists(&self, bucket: &BucketName) -> StoreResult<bool> {
        let bucket = bucket.as_str();
        match self
            .retrier
            .run(Operation::HeadBucket, bucket, "", || {
                self.transport.head_bucket(bucket)
            })
            .await
        {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create `bucket` unless it exists; returns whether it was created
    pub async fn make_bucket(&self, bucket: &BucketName) -> StoreResult<bool> {
        if self.bucket_exists(bucket).await? {
            debug!(bucket = %bucket, "Bucket already exists");
            return Ok(false);
        }

        let name = bucket.as_str();
        match self
            .retrier
            .run(Operation::CreateBucket, name, "", || {
                self.transport.create_bucket(name)
            })
            .await
        {
            Ok(()) => {
                info!(bucket = name, "Created bucket");
                Ok(true)
            }
            Err(e) if matches!(e.code(), "BucketAlreadyOwnedByYou" | "BucketAlreadyExists") => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove `bucket` if it exists and is empty; returns whether it was removed
    pub async fn remove_bucket(&self, bucket: &BucketName) -> StoreResult<bool> {
        if !self.bucket_exists(bucket).await? {
            return Ok(false);
        }

        let name = bucket.as_str();
        let page = self
            .retrier
            .run(Operation::ListObjects, name, "", || {
                self.transport
                    .list_objects(name, "", Some(FOLDER_DELIMITER), None)
            })
            .await?;
        if !page.objects.is_empty() || !page.common_prefixes.is_empty() {
            debug!(bucket = name, "Bucket not empty, keeping it");
            return Ok(false);
        }

        match self
            .retrier
            .run(Operation::DeleteBucket, name, "", || {
                self.transport.delete_bucket(name)
            })
            .await
        {
            Ok(()) => {
                info!(bucket = name, "Removed bucket");
                Ok(true)
            }
            Err(e) if e.is_not_found() || e.code() == "BucketNotEmpty" => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn list_buckets(&self) -> StoreResult<Vec<BucketInfo>> {
        self.retrier
            .run(Operation::ListBuckets, "", "", || self.transport.list_buckets())
            .await
    }

    /// Objects under `prefix`, following continuation pages
    ///
    /// Non-recursive listings group keys at the next `/` and return each
    /// group as an entry with `is_prefix` set.
    pub async fn list_objects(
        &self,
        bucket: &BucketName,
        prefix: &str,
        recursive: bool,
    ) -> StoreResult<Vec<ObjectSummary>> {
        let name = bucket.as_str();
        let delimiter = if recursive {
            None
        } else {
            Some(FOLDER_DELIMITER)
        };

        let mut entries = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let token = continuation.take();
            let page = self
                .retrier
                .run(Operation::ListObjects, name, prefix, || {
                    self.transport
                        .list_objects(name, prefix, delimiter, token.clone())
                })
                .await?;

            entries.extend(page.objects);
            entries.extend(page.common_prefixes.into_iter().map(|key| ObjectSummary {
                key,
                size: 0,
                etag: None,
                last_modified: None,
                is_prefix: true,
            }));

            match page.next_continuation {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        debug!(bucket = name, prefix, recursive, entries = entries.len(), "Listed objects");
        Ok(entries)
    }

    /// Create an empty `name/` placeholder object
    pub async fn create_folder(
        &self,
        bucket: &BucketName,
        name: &str,
    ) -> StoreResult<TransferResult> {
        let trimmed = name.trim_end_matches(FOLDER_DELIMITER);
        if trimmed.is_empty() {
            return Err(StoreError::InvalidArgument(
                "folder name cannot be empty".to_string(),
            ));
        }
        let key = ObjectKey::new(format!("{}{}", trimmed, FOLDER_DELIMITER))?;
        let options = PutOptions {
            content_type: Some("application/x-directory".to_string()),
            ..Default::default()
        };
        self.engine.put_bytes(bucket, &key, Bytes::new(), options).await
    }
}

/// [`ObjectStore`] operations against one pre-validated bucket
///
/// Keys are given as strings and validated per call.
pub struct BoundBucket<'a> {
    store: &'a ObjectStore,
    bucket: BucketName,
}

impl BoundBucket<'_> {
    pub fn name(&self) -> &BucketName {
        &self.bucket
    }

    pub async fn exists(&self) -> StoreResult<bool> {
        self.store.bucket_exists(&self.bucket).await
    }

    pub async fn make(&self) -> StoreResult<bool> {
        self.store.make_bucket(&self.bucket).await
    }

    pub async fn remove(&self) -> StoreResult<bool> {
        self.store.remove_bucket(&self.bucket).await
    }

    pub async fn put(
        &self,
        key: &str,
        source: UploadSource,
        options: PutOptions,
    ) -> StoreResult<TransferResult> {
        let key = ObjectKey::new(key)?;
        self.store.put(&self.bucket, &key, source, options).await
    }

    pub async fn put_path(
        &self,
        key: &str,
        path: impl AsRef<Path>,
        options: PutOptions,
    ) -> StoreResult<TransferResult> {
        let key = ObjectKey::new(key)?;
        self.store.put_path(&self.bucket, &key, path, options).await
    }

    pub async fn put_bytes(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        options: PutOptions,
    ) -> StoreResult<TransferResult> {
        let key = ObjectKey::new(key)?;
        self.store.put_bytes(&self.bucket, &key, data, options).await
    }

    pub async fn get(&self, key: &str, range: Option<ByteRange>) -> StoreResult<ObjectBody> {
        let key = ObjectKey::new(key)?;
        self.store.get(&self.bucket, &key, range).await
    }

    pub async fn download_to_path(
        &self,
        key: &str,
        path: impl AsRef<Path>,
        resume: bool,
    ) -> StoreResult<u64> {
        let key = ObjectKey::new(key)?;
        self.store
            .download_to_path(&self.bucket, &key, path, resume)
            .await
    }

    /// Copy `source_key` within this bucket to `key`
    pub async fn copy(&self, key: &str, source_key: &str) -> StoreResult<TransferResult> {
        let key = ObjectKey::new(key)?;
        let source = ObjectSource::new(self.bucket.clone(), ObjectKey::new(source_key)?);
        self.store.copy(&self.bucket, &key, &source).await
    }

    /// Compose `source_keys` of this bucket into `key`
    pub async fn compose(&self, key: &str, source_keys: &[&str]) -> StoreResult<TransferResult> {
        let key = ObjectKey::new(key)?;
        let sources = source_keys
            .iter()
            .map(|k| Ok(ObjectSource::new(self.bucket.clone(), ObjectKey::new(*k)?)))
            .collect::<StoreResult<Vec<_>>>()?;
        self.store.compose(&self.bucket, &key, &sources).await
    }

    pub async fn stat(&self, key: &str) -> StoreResult<ObjectStat> {
        let key = ObjectKey::new(key)?;
        self.store.stat(&self.bucket, &key).await
    }

    pub async fn object_exists(&self, key: &str) -> StoreResult<bool> {
        let key = ObjectKey::new(key)?;
        self.store.object_exists(&self.bucket, &key).await
    }

    pub async fn user_metadata(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let key = ObjectKey::new(key)?;
        self.store.user_metadata(&self.bucket, &key).await
    }

    pub async fn tags(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let key = ObjectKey::new(key)?;
        self.store.tags(&self.bucket, &key).await
    }

    pub async fn set_tags(&self, key: &str, tags: &HashMap<String, String>) -> StoreResult<()> {
        let key = ObjectKey::new(key)?;
        self.store.set_tags(&self.bucket, &key, tags).await
    }

    pub async fn delete_tags(&self, key: &str) -> StoreResult<()> {
        let key = ObjectKey::new(key)?;
        self.store.delete_tags(&self.bucket, &key).await
    }

    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        let key = ObjectKey::new(key)?;
        self.store.delete(&self.bucket, &key).await
    }

    pub async fn delete_many(&self, keys: &[&str]) -> StoreResult<Vec<DeleteOutcome>> {
        let keys = keys
            .iter()
            .map(|k| ObjectKey::new(*k))
            .collect::<StoreResult<Vec<_>>>()?;
        self.store.delete_many(&self.bucket, &keys).await
    }

    pub fn presign_get(&self, key: &str, expiry: Duration) -> StoreResult<Url> {
        let key = ObjectKey::new(key)?;
        self.store.presign_get(&self.bucket, &key, expiry)
    }

    pub fn presign_put(&self, key: &str, expiry: Duration) -> StoreResult<Url> {
        let key = ObjectKey::new(key)?;
        self.store.presign_put(&self.bucket, &key, expiry)
    }

    pub fn object_url(&self, key: &str) -> StoreResult<Url> {
        let key = ObjectKey::new(key)?;
        self.store.object_url(&self.bucket, &key)
    }

    pub async fn list_objects(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> StoreResult<Vec<ObjectSummary>> {
        self.store.list_objects(&self.bucket, prefix, recursive).await
    }

    pub async fn create_folder(&self, name: &str) -> StoreResult<TransferResult> {
        self.store.create_folder(&self.bucket, name).await
    }

    pub async fn abort_incomplete_uploads(&self, prefix: &str) -> StoreResult<usize> {
        self.store
            .abort_incomplete_uploads(&self.bucket, prefix)
            .await
    }
}
