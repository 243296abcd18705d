//! Uploads: single-shot and multipart

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use std::io;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{AbortGuard, ChunkPlan, TransferEngine};
use crate::bucket::{BucketName, ObjectKey};
use crate::error::{Operation, StoreError, StoreResult};
use crate::transport::{CompletedPart, ObjectAttributes};
use crate::types::{PutOptions, TransferResult, UploadSource};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Source of part bodies, read strictly in order
enum PartReader {
    Buffer(Bytes),
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl PartReader {
    /// Up to `length` bytes; fewer only at end of data
    async fn read_part(&mut self, length: u64) -> io::Result<Bytes> {
        match self {
            PartReader::Buffer(remaining) => {
                let take = usize::try_from(length)
                    .unwrap_or(usize::MAX)
                    .min(remaining.len());
                Ok(remaining.split_to(take))
            }
            PartReader::Stream(reader) => {
                let length = usize::try_from(length)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "part too large"))?;
                let mut buffer = vec![0u8; length];
                let mut filled = 0;
                while filled < length {
                    let n = reader.read(&mut buffer[filled..]).await?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                buffer.truncate(filled);
                Ok(Bytes::from(buffer))
            }
        }
    }

    async fn at_end(&mut self) -> io::Result<bool> {
        match self {
            PartReader::Buffer(remaining) => Ok(remaining.is_empty()),
            PartReader::Stream(reader) => {
                let mut probe = [0u8; 1];
                Ok(reader.read(&mut probe).await? == 0)
            }
        }
    }
}

/// One in-progress upload
struct Upload<'a> {
    bucket: &'a str,
    key: &'a str,
    attributes: ObjectAttributes,
    cancel: CancellationToken,
}

impl Upload<'_> {
    fn cancelled(&self) -> StoreError {
        StoreError::Cancelled {
            bucket: self.bucket.to_string(),
            key: self.key.to_string(),
        }
    }
}

fn short_source(expected: u64, actual: u64) -> StoreError {
    StoreError::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("source ended after {} of {} declared bytes", actual, expected),
    ))
}

fn long_source(expected: u64) -> StoreError {
    StoreError::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("source is longer than its declared {} bytes", expected),
    ))
}

/// Content type from the options, else guessed from the key's extension
fn content_type_for(key: &ObjectKey, options: &PutOptions) -> String {
    options.content_type.clone().unwrap_or_else(|| {
        mime_guess::from_path(key.as_str())
            .first_raw()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string()
    })
}

impl TransferEngine {
    /// Upload `source` to `bucket/key`
    ///
    /// Known sizes up to `multipart_threshold` go up in one `PutObject`;
    /// larger ones are split by a [`ChunkPlan`] and uploaded with up to
    /// `parallel_parts` parts in flight. Sources of unknown size are read one
    /// part at a time with a single outstanding part, and go up in one request
    /// if they end within the first part.
    ///
    /// Any failure after the multipart upload was created aborts it and
    /// returns [`StoreError::Transfer`].
    pub async fn put(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        source: UploadSource,
        options: PutOptions,
    ) -> StoreResult<TransferResult> {
        let upload = Upload {
            bucket: bucket.as_str(),
            key: key.as_str(),
            attributes: ObjectAttributes {
                content_type: Some(content_type_for(key, &options)),
                user_metadata: options.user_metadata.clone(),
                headers: options.headers.clone(),
            },
            cancel: options.cancel.clone().unwrap_or_default(),
        };
        if upload.cancel.is_cancelled() {
            return Err(upload.cancelled());
        }

        let (mut reader, size) = match source {
            UploadSource::Path(path) => {
                let metadata = tokio::fs::metadata(&path).await?;
                if !metadata.is_file() {
                    return Err(StoreError::InvalidArgument(format!(
                        "{} is not a regular file",
                        path.display()
                    )));
                }
                let file = tokio::fs::File::open(&path).await?;
                (PartReader::Stream(Box::new(file)), Some(metadata.len()))
            }
            UploadSource::Reader(reader) => (PartReader::Stream(reader), options.size_hint),
            UploadSource::Bytes(bytes) => {
                let len = bytes.len() as u64;
                (PartReader::Buffer(bytes), Some(len))
            }
        };

        let part_size = self.config.part_size;
        match size {
            Some(size) if size <= self.config.multipart_threshold => {
                let body = reader.read_part(size).await?;
                if (body.len() as u64) < size {
                    return Err(short_source(size, body.len() as u64));
                }
                if !reader.at_end().await? {
                    return Err(long_source(size));
                }
                self.put_single(&upload, body).await
            }
            Some(size) => {
                let plan = ChunkPlan::new(size, part_size)?;
                self.put_multipart(&upload, &mut reader, plan, self.config.parallel_parts, None)
                    .await
            }
            None => {
                let first = reader.read_part(part_size).await?;
                if (first.len() as u64) < part_size {
                    return self.put_single(&upload, first).await;
                }
                let plan = ChunkPlan::unbounded(part_size);
                self.put_multipart(&upload, &mut reader, plan, 1, Some(first))
                    .await
            }
        }
    }

    /// Upload a local file
    pub async fn put_path(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        path: impl AsRef<Path>,
        options: PutOptions,
    ) -> StoreResult<TransferResult> {
        let source = UploadSource::Path(path.as_ref().to_path_buf());
        self.put(bucket, key, source, options).await
    }

    /// Upload from a reader; `size` enables parallel parts when known
    pub async fn put_reader<R>(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        reader: R,
        size: Option<u64>,
        mut options: PutOptions,
    ) -> StoreResult<TransferResult>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        options.size_hint = size;
        self.put(bucket, key, UploadSource::Reader(Box::new(reader)), options)
            .await
    }

    /// Upload an in-memory payload
    pub async fn put_bytes(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        data: impl Into<Bytes>,
        options: PutOptions,
    ) -> StoreResult<TransferResult> {
        self.put(bucket, key, UploadSource::Bytes(data.into()), options)
            .await
    }

    async fn put_single(&self, upload: &Upload<'_>, body: Bytes) -> StoreResult<TransferResult> {
        let (bucket, key) = (upload.bucket, upload.key);
        let size = body.len() as u64;

        let output = tokio::select! {
            output = self.retrier.run(Operation::PutObject, bucket, key, || {
                self.transport.put_object(bucket, key, body.clone(), &upload.attributes)
            }) => output?,
            _ = upload.cancel.cancelled() => return Err(upload.cancelled()),
        };

        info!(bucket, key, size, "Uploaded object");
        Ok(TransferResult {
            bucket: bucket.to_string(),
            key: key.to_string(),
            etag: output.etag.unwrap_or_default(),
            version_id: output.version_id,
            size,
            parts: 0,
        })
    }

    async fn put_multipart(
        &self,
        upload: &Upload<'_>,
        reader: &mut PartReader,
        plan: ChunkPlan,
        width: usize,
        first: Option<Bytes>,
    ) -> StoreResult<TransferResult> {
        let (bucket, key) = (upload.bucket, upload.key);
        let upload_id = self
            .retrier
            .run(Operation::CreateMultipartUpload, bucket, key, || {
                self.transport
                    .create_multipart_upload(bucket, key, &upload.attributes)
            })
            .await?;

        info!(
            bucket,
            key,
            %upload_id,
            part_size = plan.part_size(),
            parts = ?plan.part_count(),
            width,
            "Starting multipart upload"
        );

        let guard = AbortGuard::new(self.transport.clone(), bucket, key, upload_id.clone());
        let parts = self
            .upload_parts(upload, &upload_id, reader, &plan, width, first)
            .await;
        self.finish_multipart(guard, parts).await
    }

    /// Read parts in order and keep up to `width` of them in flight.
    ///
    /// On the first failure or cancellation no further parts are issued and
    /// the parts already in flight are awaited before returning.
    async fn upload_parts(
        &self,
        upload: &Upload<'_>,
        upload_id: &str,
        reader: &mut PartReader,
        plan: &ChunkPlan,
        width: usize,
        mut first: Option<Bytes>,
    ) -> StoreResult<Vec<CompletedPart>> {
        let mut in_flight = FuturesUnordered::new();
        let mut completed = Vec::new();
        let mut failure: Option<StoreError> = None;
        let mut next_number = 1u32;
        let mut exhausted = false;

        loop {
            while failure.is_none() && !exhausted && in_flight.len() < width {
                if upload.cancel.is_cancelled() {
                    failure = Some(upload.cancelled());
                    break;
                }

                let spec = match plan.part(next_number) {
                    Some(spec) => spec,
                    None => {
                        exhausted = true;
                        match reader.at_end().await {
                            Ok(true) => {}
                            Ok(false) => {
                                failure = Some(match plan.total() {
                                    Some(total) => long_source(total),
                                    None => StoreError::InvalidArgument(format!(
                                        "stream exceeds {} parts of {} bytes",
                                        next_number - 1,
                                        plan.part_size()
                                    )),
                                });
                            }
                            Err(e) => failure = Some(e.into()),
                        }
                        break;
                    }
                };

                let body = match first.take() {
                    Some(body) => body,
                    None => match reader.read_part(spec.length).await {
                        Ok(body) => body,
                        Err(e) => {
                            failure = Some(e.into());
                            break;
                        }
                    },
                };

                if (body.len() as u64) < spec.length {
                    if let Some(total) = plan.total() {
                        failure = Some(short_source(total, spec.offset + body.len() as u64));
                        break;
                    }
                    exhausted = true;
                    if body.is_empty() && spec.number > 1 {
                        break;
                    }
                }

                next_number += 1;
                in_flight.push(self.upload_part(upload, upload_id, spec.number, body));
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                result = in_flight.next() => match result {
                    Some(Ok(part)) => completed.push(part),
                    Some(Err(e)) => {
                        if failure.is_none() {
                            failure = Some(e);
                        }
                    }
                    None => {}
                },
                _ = upload.cancel.cancelled(), if failure.is_none() => {
                    debug!(bucket = upload.bucket, key = upload.key, "Upload cancelled, draining parts");
                    failure = Some(upload.cancelled());
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(completed),
        }
    }

    async fn upload_part(
        &self,
        upload: &Upload<'_>,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StoreResult<CompletedPart> {
        let (bucket, key) = (upload.bucket, upload.key);
        let size = body.len() as u64;

        let etag = self
            .retrier
            .run(Operation::UploadPart, bucket, key, || {
                self.transport
                    .upload_part(bucket, key, upload_id, part_number, body.clone())
            })
            .await?;

        debug!(bucket, key, part_number, size, "Uploaded part");
        Ok(CompletedPart {
            part_number,
            etag,
            size,
        })
    }
}
