//! Error types for object store operations

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::bucket::NameRule;
use crate::transport::TransportError;

/// Result type alias for object store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store operation that produced a network error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    PutObject,
    CreateMultipartUpload,
    UploadPart,
    UploadPartCopy,
    CompleteMultipartUpload,
    AbortMultipartUpload,
    ListMultipartUploads,
    GetObject,
    HeadObject,
    CopyObject,
    DeleteObject,
    DeleteObjects,
    GetObjectTagging,
    PutObjectTagging,
    DeleteObjectTagging,
    ListObjects,
    HeadBucket,
    CreateBucket,
    DeleteBucket,
    ListBuckets,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::PutObject => "PutObject",
            Operation::CreateMultipartUpload => "CreateMultipartUpload",
            Operation::UploadPart => "UploadPart",
            Operation::UploadPartCopy => "UploadPartCopy",
            Operation::CompleteMultipartUpload => "CompleteMultipartUpload",
            Operation::AbortMultipartUpload => "AbortMultipartUpload",
            Operation::ListMultipartUploads => "ListMultipartUploads",
            Operation::GetObject => "GetObject",
            Operation::HeadObject => "HeadObject",
            Operation::CopyObject => "CopyObject",
            Operation::DeleteObject => "DeleteObject",
            Operation::DeleteObjects => "DeleteObjects",
            Operation::GetObjectTagging => "GetObjectTagging",
            Operation::PutObjectTagging => "PutObjectTagging",
            Operation::DeleteObjectTagging => "DeleteObjectTagging",
            Operation::ListObjects => "ListObjects",
            Operation::HeadBucket => "HeadBucket",
            Operation::CreateBucket => "CreateBucket",
            Operation::DeleteBucket => "DeleteBucket",
            Operation::ListBuckets => "ListBuckets",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during object store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Bucket name rejected by local validation
    #[error("Invalid bucket name {name:?}: {rule}")]
    InvalidName { name: String, rule: NameRule },

    /// Presign expiry outside 1 second ..= 7 days
    #[error("Invalid presign expiry of {seconds}s: must be between 1 and 604800 seconds")]
    InvalidExpiry { seconds: u64 },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid call argument (empty key, zero-length range, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Object not found in bucket
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Bucket does not exist
    #[error("Bucket not found: {bucket}")]
    BucketNotFound { bucket: String },

    /// Copy/compose source missing
    #[error("Source object not found: {bucket}/{key}{}", version_suffix(.version_id))]
    SourceNotFound {
        bucket: String,
        key: String,
        version_id: Option<String>,
    },

    /// Requested byte range starts past the end of the object
    #[error("Invalid range for {bucket}/{key}: offset {offset} is beyond the object end")]
    Range {
        bucket: String,
        key: String,
        offset: u64,
    },

    /// A compose source (other than the last) is below the minimum part size
    #[error(
        "Compose source #{index} ({bucket}/{key}) is {size} bytes, below the {minimum} byte minimum"
    )]
    ComposeSize {
        bucket: String,
        key: String,
        index: usize,
        size: u64,
        minimum: u64,
    },

    /// Request exceeded its deadline
    #[error("{operation} on {bucket}/{key} timed out after {after:?}")]
    Timeout {
        operation: Operation,
        bucket: String,
        key: String,
        after: Duration,
    },

    /// Retryable transport failure (5xx, throttling, connection reset)
    #[error("{operation} on {bucket}/{key} failed transiently: {source}")]
    Transient {
        operation: Operation,
        bucket: String,
        key: String,
        source: TransportError,
    },

    /// Non-retryable transport failure (auth, permission, malformed request)
    #[error("{operation} on {bucket}/{key} failed: {source}")]
    Permanent {
        operation: Operation,
        bucket: String,
        key: String,
        source: TransportError,
    },

    /// Multipart transfer failed; the upload was aborted before returning
    #[error("Transfer of {bucket}/{key} failed (upload {upload_id}): {source}{}", cleanup_suffix(.cleanup))]
    Transfer {
        bucket: String,
        key: String,
        upload_id: String,
        source: Box<StoreError>,
        cleanup: Option<Box<StoreError>>,
    },

    /// Operation stopped by a cancellation signal
    #[error("Transfer of {bucket}/{key} was cancelled")]
    Cancelled { bucket: String, key: String },

    /// Local filesystem or stream error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn version_suffix(version_id: &Option<String>) -> String {
    version_id
        .as_ref()
        .map(|v| format!(" (version {})", v))
        .unwrap_or_default()
}

fn cleanup_suffix(cleanup: &Option<Box<StoreError>>) -> String {
    cleanup
        .as_ref()
        .map(|e| format!("; abort also failed: {}", e))
        .unwrap_or_default()
}

impl StoreError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Timeout { .. } | StoreError::Transient { .. })
    }

    /// Whether the error means the object (or its bucket) is absent
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound { .. } | StoreError::BucketNotFound { .. }
        )
    }

    /// Short machine-readable code, used for per-key batch outcomes
    pub fn code(&self) -> &str {
        match self {
            StoreError::InvalidName { .. } => "InvalidBucketName",
            StoreError::InvalidExpiry { .. } => "InvalidExpiry",
            StoreError::InvalidConfig(_) => "InvalidConfig",
            StoreError::InvalidArgument(_) => "InvalidArgument",
            StoreError::NotFound { .. } => "NoSuchKey",
            StoreError::BucketNotFound { .. } => "NoSuchBucket",
            StoreError::SourceNotFound { .. } => "NoSuchSource",
            StoreError::Range { .. } => "InvalidRange",
            StoreError::ComposeSize { .. } => "EntityTooSmall",
            StoreError::Timeout { .. } => "RequestTimeout",
            StoreError::Transient { source, .. } | StoreError::Permanent { source, .. } => {
                source.code.as_deref().unwrap_or("Unknown")
            }
            StoreError::Transfer { .. } => "TransferFailed",
            StoreError::Cancelled { .. } => "Cancelled",
            StoreError::Io(_) => "IoError",
        }
    }

    /// Record the deadline that produced a `Timeout`.
    pub(crate) fn with_deadline(self, deadline: Duration) -> Self {
        match self {
            StoreError::Timeout {
                operation,
                bucket,
                key,
                ..
            } => StoreError::Timeout {
                operation,
                bucket,
                key,
                after: deadline,
            },
            other => other,
        }
    }

    /// Record the requested offset on a `Range` error.
    pub(crate) fn with_range_offset(self, requested: u64) -> Self {
        match self {
            StoreError::Range { bucket, key, .. } => StoreError::Range {
                bucket,
                key,
                offset: requested,
            },
            other => other,
        }
    }

    /// Classify a transport failure for `operation` on `bucket`/`key`.
    ///
    /// The range offset and timeout deadline are not known to the transport;
    /// callers fill them in with [`with_range_offset`](Self::with_range_offset)
    /// and [`with_deadline`](Self::with_deadline).
    pub fn from_transport(
        operation: Operation,
        bucket: &str,
        key: &str,
        error: TransportError,
    ) -> Self {
        let bucket = bucket.to_string();
        let key = key.to_string();

        if error.timed_out {
            return StoreError::Timeout {
                operation,
                bucket,
                key,
                after: Duration::ZERO,
            };
        }

        match error.code.as_deref() {
            Some("NoSuchKey") | Some("NoSuchVersion") => {
                return StoreError::NotFound { bucket, key };
            }
            Some("NoSuchBucket") => return StoreError::BucketNotFound { bucket },
            Some("InvalidRange") => return StoreError::Range { bucket, key, offset: 0 },
            _ => {}
        }

        match error.status {
            Some(404) => StoreError::NotFound { bucket, key },
            Some(416) => StoreError::Range { bucket, key, offset: 0 },
            _ if error.is_transient() => StoreError::Transient {
                operation,
                bucket,
                key,
                source: error,
            },
            _ => StoreError::Permanent {
                operation,
                bucket,
                key,
                source: error,
            },
        }
    }
}

/// Check if a store error code is retryable
pub(crate) fn is_retryable_code(code: &str) -> bool {
    matches!(
        code,
        "RequestTimeout"
            | "ServiceUnavailable"
            | "InternalError"
            | "SlowDown"
            | "RequestTimeTooSkewed"
    )
}
