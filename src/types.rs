//! Value types passed to and returned from store operations

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::path::PathBuf;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::bucket::{BucketName, ObjectKey};
use crate::error::{StoreError, StoreResult};
use crate::transport::ByteStream;

/// Byte range for partial downloads.
///
/// `length: None` reads from `offset` to the end of the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    /// Range of `length` bytes starting at `offset`; zero-length ranges are rejected.
    pub fn new(offset: u64, length: u64) -> StoreResult<Self> {
        if length == 0 {
            return Err(StoreError::InvalidArgument(
                "range length must be at least one byte".to_string(),
            ));
        }
        Ok(Self {
            offset,
            length: Some(length),
        })
    }

    /// Range from `offset` to the end of the object
    pub fn from_offset(offset: u64) -> Self {
        Self {
            offset,
            length: None,
        }
    }

    /// Last byte position covered by the range, if bounded
    pub fn last_byte(&self) -> Option<u64> {
        self.length
            .map(|len| self.offset.saturating_add(len).saturating_sub(1))
    }

    /// Value for the HTTP `Range` header
    pub fn header_value(&self) -> String {
        match self.last_byte() {
            Some(last) => format!("bytes={}-{}", self.offset, last),
            None => format!("bytes={}-", self.offset),
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header_value())
    }
}

/// Reference to an existing object used as a copy or compose source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSource {
    pub bucket: BucketName,
    pub key: ObjectKey,
    pub version_id: Option<String>,
}

impl ObjectSource {
    pub fn new(bucket: BucketName, key: ObjectKey) -> Self {
        Self {
            bucket,
            key,
            version_id: None,
        }
    }

    pub fn with_version(bucket: BucketName, key: ObjectKey, version_id: impl Into<String>) -> Self {
        Self {
            bucket,
            key,
            version_id: Some(version_id.into()),
        }
    }

    /// `x-amz-copy-source` value: `bucket/key[?versionId=...]`
    pub fn copy_source_header(&self) -> String {
        let key = self
            .key
            .as_str()
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        match &self.version_id {
            Some(version) => format!(
                "{}/{}?versionId={}",
                self.bucket,
                key,
                urlencoding::encode(version)
            ),
            None => format!("{}/{}", self.bucket, key),
        }
    }
}

/// Where upload bytes come from
pub enum UploadSource {
    /// Local file; the size is taken from filesystem metadata
    Path(PathBuf),
    /// Arbitrary async reader; pair with `PutOptions::size_hint` when the length is known
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    /// In-memory payload
    Bytes(Bytes),
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            UploadSource::Reader(_) => f.write_str("Reader(..)"),
            UploadSource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
        }
    }
}

impl From<PathBuf> for UploadSource {
    fn from(path: PathBuf) -> Self {
        UploadSource::Path(path)
    }
}

impl From<Bytes> for UploadSource {
    fn from(bytes: Bytes) -> Self {
        UploadSource::Bytes(bytes)
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(bytes: Vec<u8>) -> Self {
        UploadSource::Bytes(Bytes::from(bytes))
    }
}

/// Per-upload options
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Declared size of a `Reader` source; ignored for paths and bytes
    pub size_hint: Option<u64>,

    /// Content-Type; guessed from the key extension when unset
    pub content_type: Option<String>,

    /// User metadata (`x-amz-meta-*`)
    pub user_metadata: HashMap<String, String>,

    /// Additional request headers (Cache-Control, Content-Disposition, ...)
    pub headers: BTreeMap<String, String>,

    /// Stops issuing parts when triggered; the upload is aborted before returning
    pub cancel: Option<CancellationToken>,
}

/// Successful write of an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub bucket: String,
    pub key: String,
    pub etag: String,
    pub version_id: Option<String>,
    pub size: u64,
    /// Number of parts assembled by the store (0 for a single-shot put)
    pub parts: u32,
}

/// Snapshot of an object's metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStat {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub version_id: Option<String>,
    pub user_metadata: HashMap<String, String>,
}

/// Per-key result of a batch delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DeleteOutcome {
    Deleted {
        key: String,
    },
    Failed {
        key: String,
        code: String,
        message: String,
    },
}

impl DeleteOutcome {
    pub fn key(&self) -> &str {
        match self {
            DeleteOutcome::Deleted { key } | DeleteOutcome::Failed { key, .. } => key,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, DeleteOutcome::Deleted { .. })
    }

    pub(crate) fn failed(key: &str, error: &StoreError) -> Self {
        DeleteOutcome::Failed {
            key: key.to_string(),
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Multipart upload started but never completed or aborted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteUpload {
    pub key: String,
    pub upload_id: String,
    pub initiated: Option<DateTime<Utc>>,
}

/// Entry from an object listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    /// Set for common prefixes returned by a delimited (non-recursive) listing
    pub is_prefix: bool,
}

/// Bucket from a bucket listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    pub created: Option<DateTime<Utc>>,
}

/// Body of a downloaded object
pub struct ObjectBody {
    stream: ByteStream,
    content_length: Option<u64>,
}

impl ObjectBody {
    pub(crate) fn new(stream: ByteStream, content_length: Option<u64>) -> Self {
        Self {
            stream,
            content_length,
        }
    }

    /// Length of the returned body (the range length for partial reads), if known
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Underlying chunk stream
    pub fn into_stream(self) -> ByteStream {
        self.stream
    }

    /// Adapt the body into an `AsyncRead`
    pub fn into_reader(self) -> impl AsyncRead + Send + Unpin {
        StreamReader::new(self.stream)
    }

    /// Buffer the whole body in memory
    pub async fn collect(mut self) -> io::Result<Bytes> {
        let capacity = self.content_length.unwrap_or(0).min(64 * 1024 * 1024) as usize;
        let mut buffer = BytesMut::with_capacity(capacity);
        while let Some(chunk) = self.stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}
