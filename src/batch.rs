//! Multi-object delete
//!
//! Keys are split into `DeleteObjects` requests of up to `delete_batch_size`
//! keys, sent with bounded concurrency, and merged back into one outcome per
//! input key in input order. Individual key failures are reported, never
//! raised; the call only fails when no request reached the store at all.
//!
//! S3 answers `DeleteObjects` for an absent key with a success entry, so each
//! key is checked with `HeadObject` first. Keys the store reports missing get
//! a `NoSuchKey` failure and are left out of the delete request.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bucket::{BucketName, ObjectKey};
use crate::config::MAX_DELETE_BATCH;
use crate::error::{Operation, StoreError, StoreResult};
use crate::recovery::Retrier;
use crate::transport::Transport;
use crate::types::DeleteOutcome;

/// Batch delete coordinator
#[derive(Clone)]
pub struct BatchDeleter {
    transport: Arc<dyn Transport>,
    retrier: Retrier,
    batch_size: usize,
    concurrency: usize,
}

/// Result of one `DeleteObjects` request
struct SubBatch {
    outcomes: Vec<DeleteOutcome>,
    error: Option<StoreError>,
}

impl BatchDeleter {
    /// `batch_size` is clamped to `1..=MAX_DELETE_BATCH`, `concurrency` to at least 1
    pub fn new(
        transport: Arc<dyn Transport>,
        retrier: Retrier,
        batch_size: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            transport,
            retrier,
            batch_size: batch_size.clamp(1, MAX_DELETE_BATCH),
            concurrency: concurrency.max(1),
        }
    }

    /// Delete `keys` from `bucket`; one outcome per key, in input order
    ///
    /// Duplicate keys are each attempted and each get an outcome. An empty
    /// key list returns immediately without contacting the store.
    pub async fn delete_many(
        &self,
        bucket: &BucketName,
        keys: &[ObjectKey],
    ) -> StoreResult<Vec<DeleteOutcome>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let bucket = bucket.as_str();
        let batches: Vec<SubBatch> = stream::iter(keys.chunks(self.batch_size))
            .map(|chunk| self.delete_chunk(bucket, chunk))
            .buffered(self.concurrency)
            .collect()
            .await;

        let all_unreachable = batches
            .iter()
            .all(|batch| batch.error.as_ref().is_some_and(is_unreachable));

        let mut outcomes = Vec::with_capacity(keys.len());
        let mut first_error = None;
        for batch in batches {
            outcomes.extend(batch.outcomes);
            if first_error.is_none() {
                first_error = batch.error;
            }
        }

        if all_unreachable {
            if let Some(error) = first_error {
                return Err(error);
            }
        }

        let failed = outcomes.iter().filter(|o| !o.is_deleted()).count();
        info!(
            bucket,
            requested = keys.len(),
            deleted = outcomes.len() - failed,
            failed,
            "Batch delete finished"
        );
        Ok(outcomes)
    }

    /// Delete a single object
    pub async fn delete(&self, bucket: &BucketName, key: &ObjectKey) -> StoreResult<()> {
        let (bucket, key) = (bucket.as_str(), key.as_str());
        self.retrier
            .run(Operation::DeleteObject, bucket, key, || {
                self.transport.delete_object(bucket, key)
            })
            .await
    }

    async fn delete_chunk(&self, bucket: &str, chunk: &[ObjectKey]) -> SubBatch {
        let keys: Vec<String> = chunk.iter().map(|key| key.to_string()).collect();
        let missing: Vec<bool> = stream::iter(&keys)
            .map(|key| self.is_missing(bucket, key))
            .buffered(self.concurrency)
            .collect()
            .await;

        let present: Vec<String> = keys
            .iter()
            .zip(&missing)
            .filter(|(_, missing)| !**missing)
            .map(|(key, _)| key.clone())
            .collect();
        let sent = if present.is_empty() {
            SubBatch {
                outcomes: Vec::new(),
                error: None,
            }
        } else {
            self.send_delete(bucket, present).await
        };

        let mut sent_outcomes = sent.outcomes.into_iter();
        let outcomes = keys
            .iter()
            .zip(missing)
            .map(|(key, missing)| {
                if missing {
                    not_found(key)
                } else {
                    sent_outcomes
                        .next()
                        .unwrap_or_else(|| DeleteOutcome::Deleted { key: key.clone() })
                }
            })
            .collect();

        SubBatch {
            outcomes,
            error: sent.error,
        }
    }

    /// Whether the store reports `key` as absent
    ///
    /// Any other failure leaves the key in the delete request.
    async fn is_missing(&self, bucket: &str, key: &str) -> bool {
        match self
            .retrier
            .run(Operation::HeadObject, bucket, key, || {
                self.transport.head_object(bucket, key, None)
            })
            .await
        {
            Ok(_) => false,
            Err(StoreError::NotFound { .. }) => true,
            Err(error) => {
                debug!(bucket, key, error = %error, "Existence check failed");
                false
            }
        }
    }

    async fn send_delete(&self, bucket: &str, keys: Vec<String>) -> SubBatch {
        let label = format!("{} keys", keys.len());

        match self
            .retrier
            .run(Operation::DeleteObjects, bucket, &label, || {
                self.transport.delete_objects(bucket, &keys)
            })
            .await
        {
            Ok(reported) => {
                debug!(bucket, keys = keys.len(), "Delete request done");
                SubBatch {
                    outcomes: align_outcomes(&keys, reported),
                    error: None,
                }
            }
            Err(error) => {
                warn!(bucket, keys = keys.len(), error = %error, "Delete request failed");
                SubBatch {
                    outcomes: keys
                        .iter()
                        .map(|key| DeleteOutcome::failed(key, &error))
                        .collect(),
                    error: Some(error),
                }
            }
        }
    }
}

/// One outcome per requested key, in request order.
///
/// Stores may answer out of order, collapse duplicates, or (in quiet mode)
/// omit successful keys; a key without an entry was deleted. When a key is
/// reported more than once, a deletion wins.
fn align_outcomes(keys: &[String], reported: Vec<DeleteOutcome>) -> Vec<DeleteOutcome> {
    let mut by_key: HashMap<String, DeleteOutcome> = HashMap::new();
    for outcome in reported {
        match by_key.get(outcome.key()) {
            Some(existing) if existing.is_deleted() => {}
            _ => {
                by_key.insert(outcome.key().to_string(), outcome);
            }
        }
    }

    keys.iter()
        .map(|key| {
            by_key
                .get(key)
                .cloned()
                .unwrap_or_else(|| DeleteOutcome::Deleted { key: key.clone() })
        })
        .collect()
}

fn not_found(key: &str) -> DeleteOutcome {
    DeleteOutcome::Failed {
        key: key.to_string(),
        code: "NoSuchKey".to_string(),
        message: "The specified key does not exist".to_string(),
    }
}

/// The request never got a response from the store
fn is_unreachable(error: &StoreError) -> bool {
    match error {
        StoreError::Timeout { .. } => true,
        StoreError::Transient { source, .. } => source.is_unreachable(),
        _ => false,
    }
}
