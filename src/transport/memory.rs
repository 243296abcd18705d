//! In-memory transport for tests and local experiments
//!
//! Behaves like a minimal S3-compatible store: buckets, objects with
//! metadata and tags, multipart uploads with a minimum part size, ranged
//! reads, server-side copy. Every call is counted per [`Operation`], and
//! faults or part latency can be injected to exercise retry, abort and
//! cancellation paths.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{
    CompletedPart, GetOutput, ObjectAttributes, ObjectHead, ObjectPage, PutOutput, Transport,
    TransportError, TransportResult,
};
use crate::error::Operation;
use crate::types::{
    BucketInfo, ByteRange, DeleteOutcome, IncompleteUpload, ObjectSource, ObjectSummary,
};
use crate::MIN_PART_SIZE;

const BODY_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    attributes: ObjectAttributes,
    etag: String,
    version_id: String,
    last_modified: DateTime<Utc>,
    tags: HashMap<String, String>,
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    attributes: ObjectAttributes,
    initiated: DateTime<Utc>,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Debug)]
struct Fault {
    operation: Operation,
    key: Option<String>,
    part_number: Option<u32>,
    error: TransportError,
    remaining: usize,
}

#[derive(Debug)]
struct State {
    buckets: BTreeMap<String, (DateTime<Utc>, BTreeMap<String, StoredObject>)>,
    uploads: BTreeMap<String, PendingUpload>,
    next_id: u64,
    faults: Vec<Fault>,
    calls: HashMap<Operation, usize>,
    completions: Vec<(String, Vec<u32>)>,
    part_arrivals: Vec<u32>,
    broken_bodies: Vec<BrokenBody>,
    min_part_size: u64,
    part_delay: Duration,
    part_delays: HashMap<u32, Duration>,
}

/// How a body handed out by `get_object` misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFault {
    /// Fails with a connection reset
    Reset,
    /// Never yields another chunk
    Stall,
}

#[derive(Debug)]
struct BrokenBody {
    key: String,
    after: usize,
    fault: BodyFault,
    remaining: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            buckets: BTreeMap::new(),
            uploads: BTreeMap::new(),
            next_id: 1,
            faults: Vec::new(),
            calls: HashMap::new(),
            completions: Vec::new(),
            part_arrivals: Vec::new(),
            broken_bodies: Vec::new(),
            min_part_size: MIN_PART_SIZE,
            part_delay: Duration::ZERO,
            part_delays: HashMap::new(),
        }
    }
}

/// In-memory S3-compatible store
///
/// Clones share the same state.
///
/// ```
/// use stowage::transport::{MemoryTransport, Transport};
///
/// # tokio_test_block_on(async {
/// let store = MemoryTransport::new().with_bucket("photos");
/// store.head_bucket("photos").await.unwrap();
/// assert!(store.head_bucket("missing").await.is_err());
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<State>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `bucket` up front
    pub fn with_bucket(self, bucket: &str) -> Self {
        self.lock()
            .buckets
            .entry(bucket.to_string())
            .or_insert_with(|| (Utc::now(), BTreeMap::new()));
        self
    }

    /// Smallest size accepted for non-final parts at completion (default 5 MiB)
    pub fn with_min_part_size(self, size: u64) -> Self {
        self.lock().min_part_size = size;
        self
    }

    /// Delay applied to every `UploadPart` call
    pub fn with_part_delay(self, delay: Duration) -> Self {
        self.lock().part_delay = delay;
        self
    }

    /// Per-part `UploadPart` delays; parts not listed use `with_part_delay`
    pub fn with_part_delays(self, delays: impl IntoIterator<Item = (u32, Duration)>) -> Self {
        self.lock().part_delays.extend(delays);
        self
    }

    /// Fail the next `times` calls of `operation`
    pub fn fail_operation(&self, operation: Operation, error: TransportError, times: usize) {
        self.push_fault(operation, None, None, error, times);
    }

    /// Fail the next `times` uploads of part `part_number`
    pub fn fail_part(&self, part_number: u32, error: TransportError, times: usize) {
        self.push_fault(Operation::UploadPart, None, Some(part_number), error, times);
    }

    /// Fail the next `times` calls of `operation` that target `key`
    pub fn fail_key(&self, operation: Operation, key: &str, error: TransportError, times: usize) {
        self.push_fault(operation, Some(key.to_string()), None, error, times);
    }

    /// Make the next `times` bodies returned for `key` fail after `after` bytes
    pub fn break_body(&self, key: &str, after: usize, times: usize) {
        self.push_broken_body(key, after, BodyFault::Reset, times);
    }

    /// Make the next `times` bodies returned for `key` go silent after `after` bytes
    pub fn stall_body(&self, key: &str, after: usize, times: usize) {
        self.push_broken_body(key, after, BodyFault::Stall, times);
    }

    fn push_broken_body(&self, key: &str, after: usize, fault: BodyFault, times: usize) {
        self.lock().broken_bodies.push(BrokenBody {
            key: key.to_string(),
            after,
            fault,
            remaining: times,
        });
    }

    /// Store an object directly, bypassing call counters
    pub fn insert_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let mut state = self.lock();
        let version_id = state.next_version();
        let data = data.into();
        let object = StoredObject {
            etag: etag_for(&data),
            data,
            attributes: ObjectAttributes::default(),
            version_id,
            last_modified: Utc::now(),
            tags: HashMap::new(),
        };
        state
            .buckets
            .entry(bucket.to_string())
            .or_insert_with(|| (Utc::now(), BTreeMap::new()))
            .1
            .insert(key.to_string(), object);
    }

    /// Current contents of an object
    pub fn object_data(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.lock()
            .buckets
            .get(bucket)
            .and_then(|(_, objects)| objects.get(key))
            .map(|object| object.data.clone())
    }

    /// Number of calls made for `operation`
    pub fn call_count(&self, operation: Operation) -> usize {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Number of calls made across all operations
    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Part numbers passed to each successful completion, in call order
    pub fn completed_part_lists(&self) -> Vec<(String, Vec<u32>)> {
        self.lock().completions.clone()
    }

    /// Part numbers in the order their `UploadPart` calls finished
    pub fn part_arrivals(&self) -> Vec<u32> {
        self.lock().part_arrivals.clone()
    }

    /// Number of parts stored so far across all pending uploads
    pub fn pending_part_count(&self) -> usize {
        self.lock()
            .uploads
            .values()
            .map(|upload| upload.parts.len())
            .sum()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push_fault(
        &self,
        operation: Operation,
        key: Option<String>,
        part_number: Option<u32>,
        error: TransportError,
        times: usize,
    ) {
        self.lock().faults.push(Fault {
            operation,
            key,
            part_number,
            error,
            remaining: times,
        });
    }

    /// Count the call and return an injected fault, if one matches
    fn enter(
        &self,
        operation: Operation,
        key: Option<&str>,
        part_number: Option<u32>,
    ) -> TransportResult<()> {
        let mut state = self.lock();
        *state.calls.entry(operation).or_insert(0) += 1;

        let matching = state.faults.iter_mut().find(|fault| {
            fault.remaining > 0
                && fault.operation == operation
                && fault.key.as_deref().map_or(true, |k| Some(k) == key)
                && fault.part_number.map_or(true, |p| Some(p) == part_number)
        });

        match matching {
            Some(fault) => {
                fault.remaining -= 1;
                Err(fault.error.clone())
            }
            None => Ok(()),
        }
    }
}

impl State {
    fn next_version(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;
        format!("v{}", id)
    }

    fn bucket_mut(
        &mut self,
        bucket: &str,
    ) -> TransportResult<&mut BTreeMap<String, StoredObject>> {
        self.buckets
            .get_mut(bucket)
            .map(|(_, objects)| objects)
            .ok_or_else(|| no_such_bucket(bucket))
    }

    fn object(&self, bucket: &str, key: &str) -> TransportResult<&StoredObject> {
        let (_, objects) = self
            .buckets
            .get(bucket)
            .ok_or_else(|| no_such_bucket(bucket))?;
        objects.get(key).ok_or_else(|| no_such_key(key))
    }

    fn source(&self, source: &ObjectSource) -> TransportResult<&StoredObject> {
        let object = self.object(source.bucket.as_str(), source.key.as_str())?;
        match &source.version_id {
            Some(version) if *version != object.version_id => Err(TransportError::status(
                404,
                Some("NoSuchVersion"),
                format!("version {} does not exist", version),
            )),
            _ => Ok(object),
        }
    }

    fn store(
        &mut self,
        bucket: &str,
        key: &str,
        data: Bytes,
        etag: String,
        attributes: ObjectAttributes,
    ) -> TransportResult<PutOutput> {
        let version_id = self.next_version();
        let objects = self.bucket_mut(bucket)?;
        let tags = objects
            .get(key)
            .map(|existing| existing.tags.clone())
            .unwrap_or_default();
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                attributes,
                etag: etag.clone(),
                version_id: version_id.clone(),
                last_modified: Utc::now(),
                tags,
            },
        );
        Ok(PutOutput {
            etag: Some(etag),
            version_id: Some(version_id),
        })
    }

    fn upload(&mut self, upload_id: &str) -> TransportResult<&mut PendingUpload> {
        self.uploads.get_mut(upload_id).ok_or_else(|| {
            TransportError::status(
                404,
                Some("NoSuchUpload"),
                format!("upload {} does not exist", upload_id),
            )
        })
    }
}

fn no_such_bucket(bucket: &str) -> TransportError {
    TransportError::status(
        404,
        Some("NoSuchBucket"),
        format!("bucket {} does not exist", bucket),
    )
}

fn no_such_key(key: &str) -> TransportError {
    TransportError::status(404, Some("NoSuchKey"), format!("key {} does not exist", key))
}

fn etag_for(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("\"{}\"", hex::encode(&digest[..16]))
}

fn multipart_etag(parts: &[(String, Bytes)]) -> String {
    let mut hasher = Sha256::new();
    for (etag, _) in parts {
        hasher.update(etag.trim_matches('"').as_bytes());
    }
    let digest = hasher.finalize();
    format!("\"{}-{}\"", hex::encode(&digest[..16]), parts.len())
}

fn body_stream(data: Bytes) -> super::ByteStream {
    let chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
        .step_by(BODY_CHUNK)
        .map(|start| Ok(data.slice(start..(start + BODY_CHUNK).min(data.len()))))
        .collect();
    Box::pin(futures::stream::iter(chunks))
}

fn broken_stream(prefix: Bytes) -> super::ByteStream {
    let failure = futures::stream::once(async {
        Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset mid-body",
        ))
    });
    Box::pin(body_stream(prefix).chain(failure))
}

fn stalled_stream(prefix: Bytes) -> super::ByteStream {
    Box::pin(body_stream(prefix).chain(futures::stream::pending()))
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        attributes: &ObjectAttributes,
    ) -> TransportResult<PutOutput> {
        self.enter(Operation::PutObject, Some(key), None)?;
        let etag = etag_for(&body);
        self.lock()
            .store(bucket, key, body, etag, attributes.clone())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> TransportResult<String> {
        self.enter(Operation::CreateMultipartUpload, Some(key), None)?;
        let mut state = self.lock();
        state.bucket_mut(bucket)?;
        let upload_id = format!("upload-{}", state.next_id);
        state.next_id += 1;
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                attributes: attributes.clone(),
                initiated: Utc::now(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> TransportResult<String> {
        self.enter(Operation::UploadPart, Some(key), Some(part_number))?;
        let delay = {
            let state = self.lock();
            state
                .part_delays
                .get(&part_number)
                .copied()
                .unwrap_or(state.part_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let etag = etag_for(&body);
        let mut state = self.lock();
        let upload = state.upload(upload_id)?;
        upload.parts.insert(part_number, (etag.clone(), body));
        state.part_arrivals.push(part_number);
        Ok(etag)
    }

    async fn upload_part_copy(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        source: &ObjectSource,
        span: Option<(u64, u64)>,
    ) -> TransportResult<String> {
        self.enter(Operation::UploadPartCopy, Some(key), Some(part_number))?;
        let mut state = self.lock();
        let data = state.source(source)?.data.clone();
        let data = match span {
            Some((first, last)) => {
                if first > last || last >= data.len() as u64 {
                    return Err(TransportError::status(
                        416,
                        Some("InvalidRange"),
                        format!("copy range {}-{} outside source", first, last),
                    ));
                }
                data.slice(first as usize..=last as usize)
            }
            None => data,
        };
        let etag = etag_for(&data);
        let upload = state.upload(upload_id)?;
        upload.parts.insert(part_number, (etag.clone(), data));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> TransportResult<PutOutput> {
        self.enter(Operation::CompleteMultipartUpload, Some(key), None)?;
        let mut state = self.lock();
        let min_part_size = state.min_part_size;
        let upload = state.upload(upload_id)?;

        if parts.is_empty() {
            return Err(TransportError::status(
                400,
                Some("MalformedXML"),
                "no parts supplied",
            ));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(TransportError::status(
                400,
                Some("InvalidPartOrder"),
                "parts must be listed in ascending order",
            ));
        }

        let mut assembled = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let (etag, data) = upload.parts.get(&part.part_number).ok_or_else(|| {
                TransportError::status(
                    400,
                    Some("InvalidPart"),
                    format!("part {} was not uploaded", part.part_number),
                )
            })?;
            if *etag != part.etag {
                return Err(TransportError::status(
                    400,
                    Some("InvalidPart"),
                    format!("etag mismatch for part {}", part.part_number),
                ));
            }
            if index + 1 < parts.len() && (data.len() as u64) < min_part_size {
                return Err(TransportError::status(
                    400,
                    Some("EntityTooSmall"),
                    format!("part {} is smaller than the minimum", part.part_number),
                ));
            }
            assembled.push((etag.clone(), data.clone()));
        }

        let attributes = upload.attributes.clone();
        state.uploads.remove(upload_id);

        let total: usize = assembled.iter().map(|(_, data)| data.len()).sum();
        let mut buffer = BytesMut::with_capacity(total);
        for (_, data) in &assembled {
            buffer.extend_from_slice(data);
        }

        let etag = multipart_etag(&assembled);
        let output = state.store(bucket, key, buffer.freeze(), etag, attributes)?;
        state.completions.push((
            key.to_string(),
            parts.iter().map(|part| part.part_number).collect(),
        ));
        Ok(output)
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> TransportResult<()> {
        self.enter(Operation::AbortMultipartUpload, Some(key), None)?;
        let mut state = self.lock();
        state.upload(upload_id)?;
        state.uploads.remove(upload_id);
        Ok(())
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> TransportResult<Vec<IncompleteUpload>> {
        self.enter(Operation::ListMultipartUploads, None, None)?;
        let state = self.lock();
        Ok(state
            .uploads
            .iter()
            .filter(|(_, upload)| upload.bucket == bucket && upload.key.starts_with(prefix))
            .map(|(upload_id, upload)| IncompleteUpload {
                key: upload.key.clone(),
                upload_id: upload_id.clone(),
                initiated: Some(upload.initiated),
            })
            .collect())
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> TransportResult<GetOutput> {
        self.enter(Operation::GetObject, Some(key), None)?;
        let mut state = self.lock();
        let data = state.object(bucket, key)?.data.clone();
        let break_after = state
            .broken_bodies
            .iter_mut()
            .find(|broken| broken.key == key && broken.remaining > 0)
            .map(|broken| {
                broken.remaining -= 1;
                (broken.after, broken.fault)
            });
        drop(state);
        let size = data.len() as u64;

        let data = match range {
            None => data,
            Some(range) => {
                if range.offset >= size && !(size == 0 && range.offset == 0) {
                    return Err(TransportError::status(
                        416,
                        Some("InvalidRange"),
                        format!("offset {} beyond object size {}", range.offset, size),
                    ));
                }
                let end = match range.length {
                    Some(length) => range.offset.saturating_add(length).min(size),
                    None => size,
                };
                data.slice(range.offset as usize..end as usize)
            }
        };

        let content_length = Some(data.len() as u64);
        let body = match break_after {
            Some((after, BodyFault::Reset)) if after < data.len() => {
                broken_stream(data.slice(..after))
            }
            Some((after, BodyFault::Stall)) if after < data.len() => {
                stalled_stream(data.slice(..after))
            }
            _ => body_stream(data),
        };
        Ok(GetOutput {
            body,
            content_length,
        })
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> TransportResult<ObjectHead> {
        self.enter(Operation::HeadObject, Some(key), None)?;
        let state = self.lock();
        let object = state.object(bucket, key)?;
        if let Some(version) = version_id {
            if version != object.version_id {
                return Err(TransportError::status(404, Some("NoSuchVersion"), "no such version"));
            }
        }
        Ok(ObjectHead {
            size: object.data.len() as u64,
            content_type: object.attributes.content_type.clone(),
            etag: Some(object.etag.clone()),
            last_modified: Some(object.last_modified),
            version_id: Some(object.version_id.clone()),
            user_metadata: object.attributes.user_metadata.clone(),
        })
    }

    async fn copy_object(
        &self,
        bucket: &str,
        key: &str,
        source: &ObjectSource,
    ) -> TransportResult<PutOutput> {
        self.enter(Operation::CopyObject, Some(key), None)?;
        let mut state = self.lock();
        let object = state.source(source)?.clone();
        state.store(bucket, key, object.data, object.etag, object.attributes)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> TransportResult<()> {
        self.enter(Operation::DeleteObject, Some(key), None)?;
        self.lock().bucket_mut(bucket)?.remove(key);
        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> TransportResult<Vec<DeleteOutcome>> {
        self.enter(Operation::DeleteObjects, None, None)?;
        let mut state = self.lock();
        let objects = state.bucket_mut(bucket)?;
        // Like S3, a key that was already gone is reported as deleted
        Ok(keys
            .iter()
            .map(|key| {
                objects.remove(key);
                DeleteOutcome::Deleted { key: key.clone() }
            })
            .collect())
    }

    async fn get_object_tagging(
        &self,
        bucket: &str,
        key: &str,
    ) -> TransportResult<HashMap<String, String>> {
        self.enter(Operation::GetObjectTagging, Some(key), None)?;
        Ok(self.lock().object(bucket, key)?.tags.clone())
    }

    async fn put_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        tags: &HashMap<String, String>,
    ) -> TransportResult<()> {
        self.enter(Operation::PutObjectTagging, Some(key), None)?;
        let mut state = self.lock();
        let object = state
            .bucket_mut(bucket)?
            .get_mut(key)
            .ok_or_else(|| no_such_key(key))?;
        object.tags = tags.clone();
        Ok(())
    }

    async fn delete_object_tagging(&self, bucket: &str, key: &str) -> TransportResult<()> {
        self.enter(Operation::DeleteObjectTagging, Some(key), None)?;
        let mut state = self.lock();
        let object = state
            .bucket_mut(bucket)?
            .get_mut(key)
            .ok_or_else(|| no_such_key(key))?;
        object.tags.clear();
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        _continuation: Option<String>,
    ) -> TransportResult<ObjectPage> {
        self.enter(Operation::ListObjects, None, None)?;
        let mut state = self.lock();
        let objects = state.bucket_mut(bucket)?;

        let mut page = ObjectPage::default();
        for (key, object) in objects.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            let rest = &key[prefix.len()..];
            if let Some(delimiter) = delimiter.filter(|d| !d.is_empty()) {
                if let Some(pos) = rest.find(delimiter) {
                    let common = format!("{}{}", prefix, &rest[..pos + delimiter.len()]);
                    if page.common_prefixes.last() != Some(&common) {
                        page.common_prefixes.push(common);
                    }
                    continue;
                }
            }
            page.objects.push(ObjectSummary {
                key: key.clone(),
                size: object.data.len() as u64,
                etag: Some(object.etag.clone()),
                last_modified: Some(object.last_modified),
                is_prefix: false,
            });
        }
        Ok(page)
    }

    async fn head_bucket(&self, bucket: &str) -> TransportResult<()> {
        self.enter(Operation::HeadBucket, None, None)?;
        self.lock().bucket_mut(bucket).map(|_| ())
    }

    async fn create_bucket(&self, bucket: &str) -> TransportResult<()> {
        self.enter(Operation::CreateBucket, None, None)?;
        let mut state = self.lock();
        if state.buckets.contains_key(bucket) {
            return Err(TransportError::status(
                409,
                Some("BucketAlreadyOwnedByYou"),
                format!("bucket {} already exists", bucket),
            ));
        }
        state
            .buckets
            .insert(bucket.to_string(), (Utc::now(), BTreeMap::new()));
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> TransportResult<()> {
        self.enter(Operation::DeleteBucket, None, None)?;
        let mut state = self.lock();
        if !state.bucket_mut(bucket)?.is_empty() {
            return Err(TransportError::status(
                409,
                Some("BucketNotEmpty"),
                format!("bucket {} is not empty", bucket),
            ));
        }
        state.buckets.remove(bucket);
        Ok(())
    }

    async fn list_buckets(&self) -> TransportResult<Vec<BucketInfo>> {
        self.enter(Operation::ListBuckets, None, None)?;
        Ok(self
            .lock()
            .buckets
            .iter()
            .map(|(name, (created, _))| BucketInfo {
                name: name.clone(),
                created: Some(*created),
            })
            .collect())
    }
}
