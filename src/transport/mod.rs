//! Transport seam between the transfer engine and an S3-compatible endpoint
//!
//! A [`Transport`] performs exactly one store request per call: it signs and
//! sends the request and hands back pre-parsed results. It does not retry;
//! retry policy, timeouts, chunking and cleanup are the engine's job.
//!
//! Two implementations ship with the crate:
//!
//! - [`SdkTransport`] (feature `sdk-transport`) talks to AWS S3, MinIO and
//!   other S3-compatible services through `aws-sdk-s3`.
//! - [`MemoryTransport`] keeps objects in memory, counts calls and can inject
//!   faults and latency. It backs the test suite.

mod memory;
#[cfg(feature = "sdk-transport")]
mod sdk;

pub use memory::MemoryTransport;
#[cfg(feature = "sdk-transport")]
pub use sdk::SdkTransport;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::pin::Pin;

use crate::error::is_retryable_code;
use crate::types::{
    BucketInfo, ByteRange, DeleteOutcome, IncompleteUpload, ObjectSource, ObjectSummary,
};

/// Streaming object body
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Result type alias for transport calls
pub type TransportResult<T> = Result<T, TransportError>;

/// Raw failure reported by a transport, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// HTTP status, `None` when no response was received
    pub status: Option<u16>,
    /// Store error code (`NoSuchKey`, `SlowDown`, ...)
    pub code: Option<String>,
    pub message: String,
    /// The request hit a deadline
    pub timed_out: bool,
}

impl TransportError {
    /// Error response with an HTTP status
    pub fn status(status: u16, code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: code.map(str::to_string),
            message: message.into(),
            timed_out: false,
        }
    }

    /// Failure before any response arrived (DNS, refused, reset)
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            timed_out: true,
        }
    }

    /// 5xx, throttling codes, and connection-level failures are worth retrying
    pub fn is_transient(&self) -> bool {
        if self.timed_out {
            return true;
        }
        if let Some(code) = &self.code {
            if is_retryable_code(code) {
                return true;
            }
        }
        match self.status {
            None => true,
            Some(status) => status >= 500 || status == 429,
        }
    }

    /// No response was received at all
    pub fn is_unreachable(&self) -> bool {
        self.status.is_none()
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, &self.code) {
            (Some(status), Some(code)) => write!(f, "HTTP {} ({}): {}", status, code, self.message),
            (Some(status), None) => write!(f, "HTTP {}: {}", status, self.message),
            (None, _) if self.timed_out => write!(f, "timed out: {}", self.message),
            (None, _) => write!(f, "no response: {}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

/// Attributes applied to a newly written object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectAttributes {
    pub content_type: Option<String>,
    pub user_metadata: HashMap<String, String>,
    pub headers: BTreeMap<String, String>,
}

/// Store response to a completed write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOutput {
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

/// Part reported back to `CompleteMultipartUpload`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
}

/// Parsed `HeadObject` response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub version_id: Option<String>,
    pub user_metadata: HashMap<String, String>,
}

/// Parsed `GetObject` response
pub struct GetOutput {
    pub body: ByteStream,
    pub content_length: Option<u64>,
}

/// One page of an object listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectPage {
    pub objects: Vec<ObjectSummary>,
    pub common_prefixes: Vec<String>,
    pub next_continuation: Option<String>,
}

/// One request per method; implementations must be safe for concurrent use.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        attributes: &ObjectAttributes,
    ) -> TransportResult<PutOutput>;

    /// Returns the upload id
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> TransportResult<String>;

    /// Returns the part's ETag
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> TransportResult<String>;

    /// Server-side copy of `source` (or an inclusive byte span of it) into a part
    async fn upload_part_copy(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        source: &ObjectSource,
        span: Option<(u64, u64)>,
    ) -> TransportResult<String>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> TransportResult<PutOutput>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> TransportResult<()>;

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> TransportResult<Vec<IncompleteUpload>>;

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> TransportResult<GetOutput>;

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> TransportResult<ObjectHead>;

    async fn copy_object(
        &self,
        bucket: &str,
        key: &str,
        source: &ObjectSource,
    ) -> TransportResult<PutOutput>;

    async fn delete_object(&self, bucket: &str, key: &str) -> TransportResult<()>;

    /// One outcome per requested key, in request order
    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> TransportResult<Vec<DeleteOutcome>>;

    async fn get_object_tagging(
        &self,
        bucket: &str,
        key: &str,
    ) -> TransportResult<HashMap<String, String>>;

    async fn put_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        tags: &HashMap<String, String>,
    ) -> TransportResult<()>;

    async fn delete_object_tagging(&self, bucket: &str, key: &str) -> TransportResult<()>;

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<String>,
    ) -> TransportResult<ObjectPage>;

    async fn head_bucket(&self, bucket: &str) -> TransportResult<()>;

    async fn create_bucket(&self, bucket: &str) -> TransportResult<()>;

    async fn delete_bucket(&self, bucket: &str) -> TransportResult<()>;

    async fn list_buckets(&self) -> TransportResult<Vec<BucketInfo>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::status(503, Some("ServiceUnavailable"), "x").is_transient());
        assert!(TransportError::status(500, None, "x").is_transient());
        assert!(TransportError::status(429, None, "x").is_transient());
        assert!(TransportError::status(400, Some("SlowDown"), "x").is_transient());
        assert!(TransportError::connection("refused").is_transient());
        assert!(TransportError::timeout("deadline").is_transient());

        assert!(!TransportError::status(403, Some("AccessDenied"), "x").is_transient());
        assert!(!TransportError::status(400, Some("MalformedXML"), "x").is_transient());
        assert!(!TransportError::status(404, Some("NoSuchKey"), "x").is_transient());
    }

    #[test]
    fn test_display() {
        let err = TransportError::status(503, Some("SlowDown"), "reduce rate");
        assert_eq!(err.to_string(), "HTTP 503 (SlowDown): reduce rate");
        assert_eq!(
            TransportError::connection("refused").to_string(),
            "no response: refused"
        );
        assert!(TransportError::connection("refused").is_unreachable());
    }
}
