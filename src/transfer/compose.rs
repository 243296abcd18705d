//! Server-side copy and compose

use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use super::{AbortGuard, ChunkPlan, TransferEngine};
use crate::bucket::{BucketName, ObjectKey};
use crate::config::{MAX_PARTS, MAX_PART_SIZE, MIN_PART_SIZE};
use crate::error::{Operation, StoreError, StoreResult};
use crate::transport::{CompletedPart, ObjectAttributes};
use crate::types::{ObjectSource, TransferResult};

/// One `UploadPartCopy` request
struct CopyPart<'a> {
    number: u32,
    source: &'a ObjectSource,
    span: Option<(u64, u64)>,
    size: u64,
}

/// Inclusive spans for copying `size` bytes in parts no larger than `MAX_PART_SIZE`
///
/// The spans are balanced so no piece ends up below the minimum part size.
fn copy_spans(size: u64) -> StoreResult<Vec<(u64, u64)>> {
    let pieces = size.div_ceil(MAX_PART_SIZE).max(1);
    let plan = ChunkPlan::new(size, size.div_ceil(pieces))?;
    Ok(plan.spans().collect())
}

impl TransferEngine {
    /// Copy `source` to `bucket/key` without passing bytes through the client
    ///
    /// Sources up to 5 GiB use a single `CopyObject`; larger ones are copied
    /// as a multipart upload of byte ranges.
    pub async fn copy(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        source: &ObjectSource,
    ) -> StoreResult<TransferResult> {
        let stat = self.stats.stat_source(source).await?;
        if stat.size > MAX_PART_SIZE {
            return self.compose_parts(bucket, key, &[(source, stat.size)]).await;
        }

        let (bucket, key) = (bucket.as_str(), key.as_str());
        let output = self
            .retrier
            .run(Operation::CopyObject, bucket, key, || {
                self.transport.copy_object(bucket, key, source)
            })
            .await
            .map_err(|e| source_error(e, source))?;

        info!(bucket, key, source = %source.copy_source_header(), size = stat.size, "Copied object");
        Ok(TransferResult {
            bucket: bucket.to_string(),
            key: key.to_string(),
            etag: output.etag.unwrap_or_default(),
            version_id: output.version_id,
            size: stat.size,
            parts: 0,
        })
    }

    /// Concatenate `sources` into `bucket/key` server-side
    ///
    /// Every source except the last must be at least 5 MiB. All sources are
    /// checked before anything is written; a single source is a plain copy.
    pub async fn compose(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        sources: &[ObjectSource],
    ) -> StoreResult<TransferResult> {
        if sources.is_empty() {
            return Err(StoreError::InvalidArgument(
                "compose needs at least one source".to_string(),
            ));
        }
        if sources.len() > MAX_PARTS as usize {
            return Err(StoreError::InvalidArgument(format!(
                "compose accepts at most {} sources, got {}",
                MAX_PARTS,
                sources.len()
            )));
        }

        let mut sized = Vec::with_capacity(sources.len());
        for source in sources {
            let stat = self.stats.stat_source(source).await?;
            sized.push((source, stat.size));
        }

        let last = sized.len() - 1;
        for (index, (source, size)) in sized.iter().enumerate() {
            if index < last && *size < MIN_PART_SIZE {
                return Err(StoreError::ComposeSize {
                    bucket: source.bucket.to_string(),
                    key: source.key.to_string(),
                    index,
                    size: *size,
                    minimum: MIN_PART_SIZE,
                });
            }
        }

        if sized.len() == 1 {
            return self.copy(bucket, key, &sources[0]).await;
        }

        self.compose_parts(bucket, key, &sized).await
    }

    async fn compose_parts(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        sources: &[(&ObjectSource, u64)],
    ) -> StoreResult<TransferResult> {
        let mut parts = Vec::new();
        for (source, size) in sources {
            if *size > MAX_PART_SIZE {
                for span in copy_spans(*size)? {
                    parts.push(CopyPart {
                        number: parts.len() as u32 + 1,
                        source: *source,
                        span: Some(span),
                        size: span.1 - span.0 + 1,
                    });
                }
            } else {
                parts.push(CopyPart {
                    number: parts.len() as u32 + 1,
                    source: *source,
                    span: None,
                    size: *size,
                });
            }
        }
        if parts.len() > MAX_PARTS as usize {
            return Err(StoreError::InvalidArgument(format!(
                "compose would need {} parts, at most {} allowed",
                parts.len(),
                MAX_PARTS
            )));
        }

        let (bucket, key) = (bucket.as_str(), key.as_str());
        let attributes = ObjectAttributes {
            content_type: Some(
                mime_guess::from_path(key)
                    .first_raw()
                    .unwrap_or("application/octet-stream")
                    .to_string(),
            ),
            ..Default::default()
        };
        let upload_id = self
            .retrier
            .run(Operation::CreateMultipartUpload, bucket, key, || {
                self.transport.create_multipart_upload(bucket, key, &attributes)
            })
            .await?;

        info!(bucket, key, %upload_id, parts = parts.len(), "Starting compose");
        let guard = AbortGuard::new(self.transport.clone(), bucket, key, upload_id.clone());

        let upload_id = upload_id.as_str();

        // After the first failure remaining parts are skipped; those in flight finish
        let stop = AtomicBool::new(false);
        let mut results = stream::iter(parts.iter())
            .map(|part| {
                let stop = &stop;
                async move {
                    if stop.load(Ordering::Relaxed) {
                        return None;
                    }
                    let result = self.copy_part(bucket, key, upload_id, part).await;
                    if result.is_err() {
                        stop.store(true, Ordering::Relaxed);
                    }
                    Some(result)
                }
            })
            .buffer_unordered(self.config.parallel_parts);

        let mut completed = Vec::with_capacity(parts.len());
        let mut failure = None;
        while let Some(result) = results.next().await {
            match result {
                Some(Ok(part)) => completed.push(part),
                Some(Err(e)) if failure.is_none() => failure = Some(e),
                _ => {}
            }
        }
        drop(results);

        let completed = match failure {
            Some(e) => Err(e),
            None => Ok(completed),
        };
        self.finish_multipart(guard, completed).await
    }

    async fn copy_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part: &CopyPart<'_>,
    ) -> StoreResult<CompletedPart> {
        let etag = self
            .retrier
            .run(Operation::UploadPartCopy, bucket, key, || {
                self.transport
                    .upload_part_copy(bucket, key, upload_id, part.number, part.source, part.span)
            })
            .await
            .map_err(|e| source_error(e, part.source))?;

        Ok(CompletedPart {
            part_number: part.number,
            etag,
            size: part.size,
        })
    }
}

/// A copy that fails with `NotFound` failed on its source
fn source_error(error: StoreError, source: &ObjectSource) -> StoreError {
    match error {
        StoreError::NotFound { .. } => StoreError::SourceNotFound {
            bucket: source.bucket.to_string(),
            key: source.key.to_string(),
            version_id: source.version_id.clone(),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_spans_balanced() {
        let size = MAX_PART_SIZE + 1;
        let spans = copy_spans(size).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].0, 0);
        assert_eq!(spans[1].1, size - 1);
        for (first, last) in &spans {
            let len = last - first + 1;
            assert!(len <= MAX_PART_SIZE);
            assert!(len >= MIN_PART_SIZE);
        }
    }

    #[test]
    fn test_copy_spans_small_object_single_span() {
        let spans = copy_spans(10).unwrap();
        assert_eq!(spans, vec![(0, 9)]);
    }
}
