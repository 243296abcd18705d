//! Downloads: ranged reads and resumable download to a file

use futures::stream::{self, StreamExt};
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::TransferEngine;
use crate::bucket::{BucketName, ObjectKey};
use crate::error::{Operation, StoreError, StoreResult};
use crate::transport::ByteStream;
use crate::types::{ByteRange, ObjectBody};

impl TransferEngine {
    /// Read `bucket/key`, optionally restricted to `range`
    ///
    /// A range starting at or past the end of a non-empty object fails with
    /// [`StoreError::Range`]; a range running past the end is truncated.
    ///
    /// The body fails with [`io::ErrorKind::TimedOut`] when no chunk arrives
    /// within the request deadline.
    pub async fn get(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        range: Option<ByteRange>,
    ) -> StoreResult<ObjectBody> {
        let (bucket, key) = (bucket.as_str(), key.as_str());
        let output = self
            .retrier
            .run(Operation::GetObject, bucket, key, || {
                self.transport.get_object(bucket, key, range)
            })
            .await
            .map_err(|e| e.with_range_offset(range.map_or(0, |r| r.offset)))?;

        debug!(bucket, key, range = ?range.map(|r| r.header_value()), "Opened object body");
        let body = idle_timeout(output.body, self.retrier.deadline());
        Ok(ObjectBody::new(body, output.content_length))
    }

    /// Download `bucket/key` into `path`; returns the object size
    ///
    /// With `resume`, an existing partial file is continued from its current
    /// length (or restarted if it is longer than the object). A body stream
    /// that breaks mid-way is re-requested from the current offset within the
    /// retry budget.
    pub async fn download_to_path(
        &self,
        bucket: &BucketName,
        key: &ObjectKey,
        path: impl AsRef<Path>,
        resume: bool,
    ) -> StoreResult<u64> {
        let path = path.as_ref();
        let size = self.stats.stat(bucket, key).await?.size;

        let mut offset = if resume {
            match tokio::fs::metadata(path).await {
                Ok(metadata) if metadata.len() <= size => metadata.len(),
                Ok(metadata) => {
                    warn!(
                        path = %path.display(),
                        local = metadata.len(),
                        remote = size,
                        "Local file larger than object, restarting download"
                    );
                    0
                }
                Err(_) => 0,
            }
        } else {
            0
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = if offset > 0 {
            OpenOptions::new().append(true).open(path).await?
        } else {
            tokio::fs::File::create(path).await?
        };

        if offset > 0 {
            info!(bucket = %bucket, key = %key, offset, size, "Resuming download");
        }

        let policy = self.retrier.policy();
        let mut broken_streams = 0;
        while offset < size {
            let body = self
                .get(bucket, key, Some(ByteRange::from_offset(offset)))
                .await?;
            let mut stream = body.into_stream();

            let mut interrupted = None;
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(chunk) => {
                        file.write_all(&chunk).await?;
                        offset += chunk.len() as u64;
                    }
                    Err(e) => {
                        interrupted = Some(e);
                        break;
                    }
                }
            }

            let failure = match interrupted {
                Some(e) => e,
                None if offset < size => io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("body ended at {} of {} bytes", offset, size),
                ),
                None => continue,
            };

            broken_streams += 1;
            if broken_streams >= policy.max_attempts {
                // Keep what arrived so a later resume starts from here
                file.flush().await?;
                if failure.kind() == io::ErrorKind::TimedOut {
                    return Err(StoreError::Timeout {
                        operation: Operation::GetObject,
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                        after: self.retrier.deadline(),
                    });
                }
                return Err(StoreError::Io(failure));
            }
            warn!(
                bucket = %bucket,
                key = %key,
                offset,
                error = %failure,
                "Download interrupted, resuming from offset"
            );
            sleep(policy.calculate_delay(broken_streams)).await;
        }

        file.flush().await?;
        file.sync_all().await?;
        info!(bucket = %bucket, key = %key, size, path = %path.display(), "Downloaded object");
        Ok(size)
    }
}

/// End `body` with a `TimedOut` error once it goes `idle` without a chunk
fn idle_timeout(body: ByteStream, idle: Duration) -> ByteStream {
    Box::pin(stream::unfold(Some(body), move |body| async move {
        let mut body = body?;
        match timeout(idle, body.next()).await {
            Ok(Some(chunk)) => Some((chunk, Some(body))),
            Ok(None) => None,
            Err(_) => Some((
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no body data for {:?}", idle),
                )),
                None,
            )),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test(start_paused = true)]
    async fn test_idle_body_times_out() {
        let body: ByteStream = Box::pin(
            stream::iter(vec![Ok(Bytes::from_static(b"head"))]).chain(stream::pending()),
        );
        let mut body = idle_timeout(body, Duration::from_secs(5));

        assert_eq!(&body.next().await.unwrap().unwrap()[..], b"head");
        let err = body.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn test_finished_body_passes_through() {
        let body: ByteStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"a")),
            Ok(Bytes::from_static(b"b")),
        ]));
        let chunks: Vec<_> = idle_timeout(body, Duration::from_secs(5)).collect().await;
        assert_eq!(chunks.len(), 2);
    }
}
