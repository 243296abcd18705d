/*!
 * Stowage - S3-compatible object transfer engine
 *
 * - Chunked multipart upload with bounded part parallelism
 * - Ranged and resumable downloads
 * - Server-side copy and compose
 * - Locally computed presigned URLs (AWS SigV4)
 * - Multi-object delete with per-key outcomes
 * - Pluggable transport: AWS SDK or in-memory
 *
 * ```no_run
 * use stowage::{ObjectStore, PutOptions, StoreConfig};
 *
 * # async fn demo() -> stowage::StoreResult<()> {
 * let config = StoreConfig::with_endpoint("http://localhost:9000", "minio", "minio123");
 * let store = ObjectStore::connect(config).await?;
 * let photos = store.bind("photos")?;
 * photos.put_path("2024/cover.jpg", "cover.jpg", PutOptions::default()).await?;
 * # Ok(())
 * # }
 * ```
 */

pub mod batch;
pub mod bucket;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod presign;
pub mod recovery;
pub mod stat;
pub mod transfer;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use batch::BatchDeleter;
pub use bucket::{BucketName, NameRule, ObjectKey};
pub use client::{BoundBucket, ObjectStore};
pub use config::{
    LogLevel, StoreConfig, TransferConfig, MAX_DELETE_BATCH, MAX_PARTS, MAX_PART_SIZE,
    MIN_PART_SIZE,
};
pub use error::{Operation, StoreError, StoreResult};
pub use presign::{PresignMethod, PresignRequest, Presigner};
pub use recovery::{BackoffStrategy, RetryPolicy};
pub use stat::StatAccessor;
pub use transfer::{ChunkPlan, PartSpec, TransferEngine};
pub use transport::{MemoryTransport, Transport, TransportError};
pub use types::{
    BucketInfo, ByteRange, DeleteOutcome, IncompleteUpload, ObjectBody, ObjectSource, ObjectStat,
    ObjectSummary, PutOptions, TransferResult, UploadSource,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
