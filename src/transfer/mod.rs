//! Transfer engine
//!
//! Moves object bytes between the caller and the store:
//!
//! - uploads, single-shot or multipart with bounded part parallelism
//! - ranged and resumable downloads
//! - server-side copy and compose
//! - sweeping multipart uploads abandoned by earlier processes
//!
//! Every store request runs under the configured deadline and retry policy.
//! A multipart upload that cannot be completed is always aborted before the
//! error is returned; if the upload future itself is dropped, the abort is
//! spawned onto the runtime.

mod compose;
mod download;
mod plan;
mod upload;

pub use plan::{ChunkPlan, PartSpec};

use std::sync::Arc;
use tracing::{info, warn};

use crate::bucket::BucketName;
use crate::config::{TransferConfig, MAX_PARALLEL_PARTS};
use crate::error::{Operation, StoreError, StoreResult};
use crate::recovery::Retrier;
use crate::stat::StatAccessor;
use crate::transport::{CompletedPart, Transport};
use crate::types::{IncompleteUpload, TransferResult};

/// Chunked upload, ranged download and server-side copy over a [`Transport`]
#[derive(Clone)]
pub struct TransferEngine {
    transport: Arc<dyn Transport>,
    config: TransferConfig,
    retrier: Retrier,
    stats: StatAccessor,
}

impl TransferEngine {
    /// `parallel_parts` is clamped to `1..=MAX_PARALLEL_PARTS`
    pub fn new(transport: Arc<dyn Transport>, mut config: TransferConfig) -> Self {
        config.parallel_parts = config.parallel_parts.clamp(1, MAX_PARALLEL_PARTS);
        let retrier = Retrier::new(config.retry_policy(), config.request_timeout());
        let stats = StatAccessor::new(transport.clone(), retrier.clone());
        Self {
            transport,
            config,
            retrier,
            stats,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Multipart uploads under `prefix` that were never completed or aborted
    pub async fn list_incomplete_uploads(
        &self,
        bucket: &BucketName,
        prefix: &str,
    ) -> StoreResult<Vec<IncompleteUpload>> {
        let bucket = bucket.as_str();
        self.retrier
            .run(Operation::ListMultipartUploads, bucket, prefix, || {
                self.transport.list_multipart_uploads(bucket, prefix)
            })
            .await
    }

    /// Abort every incomplete upload under `prefix`; returns how many were aborted.
    ///
    /// Uploads that disappear between listing and abort are skipped.
    pub async fn abort_incomplete_uploads(
        &self,
        bucket: &BucketName,
        prefix: &str,
    ) -> StoreResult<usize> {
        let uploads = self.list_incomplete_uploads(bucket, prefix).await?;
        let bucket = bucket.as_str();
        let mut aborted = 0;

        for upload in &uploads {
            let key = upload.key.as_str();
            let upload_id = upload.upload_id.as_str();
            match self
                .retrier
                .run(Operation::AbortMultipartUpload, bucket, key, || {
                    self.transport.abort_multipart_upload(bucket, key, upload_id)
                })
                .await
            {
                Ok(()) => aborted += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        info!(bucket, prefix, aborted, "Aborted incomplete uploads");
        Ok(aborted)
    }

    /// Complete `upload_id` from `parts`, or abort it when the parts failed.
    ///
    /// Abort runs exactly once on any failure path, including a failed
    /// completion. The abort's own failure is attached as `cleanup`.
    async fn finish_multipart(
        &self,
        guard: AbortGuard,
        parts: StoreResult<Vec<CompletedPart>>,
    ) -> StoreResult<TransferResult> {
        let (b, k, u) = (
            guard.bucket.clone(),
            guard.key.clone(),
            guard.upload_id.clone(),
        );
        let (bucket, key, upload_id) = (b.as_str(), k.as_str(), u.as_str());

        let failure = match parts {
            Ok(mut parts) => {
                parts.sort_by_key(|part| part.part_number);
                let size = parts.iter().map(|part| part.size).sum();
                match self
                    .retrier
                    .run(Operation::CompleteMultipartUpload, bucket, key, || {
                        self.transport
                            .complete_multipart_upload(bucket, key, upload_id, &parts)
                    })
                    .await
                {
                    Ok(output) => {
                        guard.disarm();
                        let result = TransferResult {
                            bucket: bucket.to_string(),
                            key: key.to_string(),
                            etag: output.etag.unwrap_or_default(),
                            version_id: output.version_id,
                            size,
                            parts: parts.len() as u32,
                        };
                        info!(
                            bucket = %result.bucket,
                            key = %result.key,
                            size = result.size,
                            parts = result.parts,
                            "Multipart upload complete"
                        );
                        return Ok(result);
                    }
                    Err(e) => e,
                }
            }
            Err(e) => e,
        };

        warn!(bucket, key, upload_id, error = %failure, "Aborting multipart upload");
        let cleanup = self
            .retrier
            .run(Operation::AbortMultipartUpload, bucket, key, || {
                self.transport.abort_multipart_upload(bucket, key, upload_id)
            })
            .await
            .err();
        if let Some(e) = &cleanup {
            warn!(bucket, key, upload_id, error = %e, "Abort failed; upload left behind");
        }

        let error = StoreError::Transfer {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            source: Box::new(failure),
            cleanup: cleanup.map(Box::new),
        };
        guard.disarm();
        Err(error)
    }
}

/// Aborts a multipart upload if dropped while still armed
///
/// Covers the case where the future driving an upload is dropped before it
/// reaches completion or its own abort.
struct AbortGuard {
    transport: Arc<dyn Transport>,
    bucket: String,
    key: String,
    upload_id: String,
    armed: bool,
}

impl AbortGuard {
    fn new(transport: Arc<dyn Transport>, bucket: &str, key: &str, upload_id: String) -> Self {
        Self {
            transport,
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(
                    bucket = %self.bucket,
                    key = %self.key,
                    upload_id = %self.upload_id,
                    "No runtime to abort dropped upload"
                );
                return;
            }
        };

        let transport = self.transport.clone();
        let bucket = std::mem::take(&mut self.bucket);
        let key = std::mem::take(&mut self.key);
        let upload_id = std::mem::take(&mut self.upload_id);
        warn!(%bucket, %key, %upload_id, "Upload dropped mid-transfer, aborting");
        handle.spawn(async move {
            if let Err(e) = transport
                .abort_multipart_upload(&bucket, &key, &upload_id)
                .await
            {
                warn!(%bucket, %key, %upload_id, error = %e, "Abort of dropped upload failed");
            }
        });
    }
}
