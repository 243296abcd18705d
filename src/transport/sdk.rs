//! Transport over the official AWS SDK
//!
//! Works against AWS S3 and S3-compatible stores (MinIO, Ceph RGW, ...).
//! The SDK's own retry layer is disabled; retries and deadlines belong to
//! the engine.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{BuildError, DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::{ByteStream as SdkByteStream, DateTime as SdkDateTime};
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart as SdkCompletedPart,
    CreateBucketConfiguration, Delete, ObjectIdentifier, StorageClass, Tag, Tagging,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio_util::io::ReaderStream;
use tracing::warn;

use super::{
    CompletedPart, GetOutput, ObjectAttributes, ObjectHead, ObjectPage, PutOutput, Transport,
    TransportError, TransportResult,
};
use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::types::{
    BucketInfo, ByteRange, DeleteOutcome, IncompleteUpload, ObjectSource, ObjectSummary,
};

const DEFAULT_REGION: &str = "us-east-1";

/// [`Transport`] backed by `aws-sdk-s3`
#[derive(Debug, Clone)]
pub struct SdkTransport {
    client: Client,
    region: String,
}

impl SdkTransport {
    /// Wrap an existing SDK client
    pub fn new(client: Client) -> Self {
        let region = client
            .config()
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        Self { client, region }
    }

    /// Build an SDK client from `config`
    pub async fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        // Explicit credentials; otherwise the SDK's default chain applies
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            let credentials = Credentials::new(
                access_key,
                secret_key,
                config.session_token.clone(),
                None,
                "stowage-static",
            );
            loader = loader.credentials_provider(credentials);
        }

        // Connect and per-read deadlines
        let deadline = config.transfer.request_timeout();
        let timeouts = TimeoutConfig::builder()
            .connect_timeout(deadline)
            .read_timeout(deadline)
            .build();

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.force_path_style)
            .retry_config(RetryConfig::disabled())
            .timeout_config(timeouts);

        if config.endpoint.is_some() {
            let endpoint = config.endpoint_url()?;
            builder = builder.endpoint_url(endpoint.as_str().trim_end_matches('/'));
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            region: config.region.clone(),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Classify an SDK failure by HTTP status and error code
fn sdk_error<E>(error: SdkError<E, HttpResponse>) -> TransportError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&error).to_string();
    match &error {
        SdkError::TimeoutError(_) => TransportError::timeout(message),
        SdkError::DispatchFailure(failure) if failure.is_timeout() => {
            TransportError::timeout(message)
        }
        SdkError::DispatchFailure(_) => TransportError::connection(message),
        SdkError::ServiceError(context) => {
            let status = context.raw().status().as_u16();
            let service = context.err();
            TransportError::status(
                status,
                service.code(),
                service.message().map(str::to_string).unwrap_or(message),
            )
        }
        SdkError::ResponseError(context) => {
            TransportError::status(context.raw().status().as_u16(), None, message)
        }
        SdkError::ConstructionFailure(_) => {
            TransportError::status(400, Some("InvalidRequest"), message)
        }
        _ => TransportError::connection(message),
    }
}

fn build_error(error: BuildError) -> TransportError {
    TransportError::status(400, Some("InvalidRequest"), error.to_string())
}

fn to_chrono(time: Option<&SdkDateTime>) -> Option<DateTime<Utc>> {
    time.and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
}

fn size_of(length: Option<i64>) -> u64 {
    length.and_then(|l| u64::try_from(l).ok()).unwrap_or(0)
}

/// Content type, user metadata and known header overrides for a write
macro_rules! with_attributes {
    ($request:expr, $attributes:expr) => {{
        let attributes: &ObjectAttributes = $attributes;
        let mut request = $request.set_content_type(attributes.content_type.clone());
        if !attributes.user_metadata.is_empty() {
            request = request.set_metadata(Some(attributes.user_metadata.clone()));
        }
        for (name, value) in &attributes.headers {
            request = match name.to_ascii_lowercase().as_str() {
                "cache-control" => request.cache_control(value),
                "content-disposition" => request.content_disposition(value),
                "content-encoding" => request.content_encoding(value),
                "content-language" => request.content_language(value),
                "x-amz-storage-class" => request.storage_class(StorageClass::from(value.as_str())),
                other => {
                    warn!(header = other, "Unsupported header override ignored");
                    request
                }
            };
        }
        request
    }};
}

#[async_trait]
impl Transport for SdkTransport {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        attributes: &ObjectAttributes,
    ) -> TransportResult<PutOutput> {
        let request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(SdkByteStream::from(body));
        let output = with_attributes!(request, attributes)
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(PutOutput {
            etag: output.e_tag().map(str::to_string),
            version_id: output.version_id().map(str::to_string),
        })
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> TransportResult<String> {
        let request = self.client.create_multipart_upload().bucket(bucket).key(key);
        let output = with_attributes!(request, attributes)
            .send()
            .await
            .map_err(sdk_error)?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| TransportError::status(500, None, "No upload ID returned"))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> TransportResult<String> {
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .body(SdkByteStream::from(body))
            .send()
            .await
            .map_err(sdk_error)?;

        output.e_tag().map(str::to_string).ok_or_else(|| {
            TransportError::status(500, None, format!("No ETag returned for part {}", part_number))
        })
    }

    async fn upload_part_copy(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        source: &ObjectSource,
        span: Option<(u64, u64)>,
    ) -> TransportResult<String> {
        let output = self
            .client
            .upload_part_copy()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .copy_source(source.copy_source_header())
            .set_copy_source_range(span.map(|(first, last)| format!("bytes={}-{}", first, last)))
            .send()
            .await
            .map_err(sdk_error)?;

        output
            .copy_part_result()
            .and_then(|result| result.e_tag())
            .map(str::to_string)
            .ok_or_else(|| {
                TransportError::status(
                    500,
                    None,
                    format!("No ETag returned for copied part {}", part_number),
                )
            })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> TransportResult<PutOutput> {
        let completed_parts: Vec<SdkCompletedPart> = parts
            .iter()
            .map(|p| {
                SdkCompletedPart::builder()
                    .part_number(p.part_number as i32)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();

        let multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(multipart_upload)
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(PutOutput {
            etag: output.e_tag().map(str::to_string),
            version_id: output.version_id().map(str::to_string),
        })
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> TransportResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> TransportResult<Vec<IncompleteUpload>> {
        let mut uploads = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut upload_id_marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_multipart_uploads()
                .bucket(bucket)
                .prefix(prefix)
                .set_key_marker(key_marker.take())
                .set_upload_id_marker(upload_id_marker.take())
                .send()
                .await
                .map_err(sdk_error)?;

            for upload in output.uploads() {
                if let (Some(key), Some(upload_id)) = (upload.key(), upload.upload_id()) {
                    uploads.push(IncompleteUpload {
                        key: key.to_string(),
                        upload_id: upload_id.to_string(),
                        initiated: to_chrono(upload.initiated()),
                    });
                }
            }

            if !output.is_truncated().unwrap_or(false) {
                break;
            }
            key_marker = output.next_key_marker().map(str::to_string);
            upload_id_marker = output.next_upload_id_marker().map(str::to_string);
            if key_marker.is_none() && upload_id_marker.is_none() {
                break;
            }
        }

        Ok(uploads)
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> TransportResult<GetOutput> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_range(range.map(|r| r.header_value()))
            .send()
            .await
            .map_err(sdk_error)?;

        let content_length = output.content_length().and_then(|l| u64::try_from(l).ok());
        let reader = output.body.into_async_read();
        Ok(GetOutput {
            body: Box::pin(ReaderStream::new(reader)),
            content_length,
        })
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> TransportResult<ObjectHead> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(ObjectHead {
            size: size_of(output.content_length()),
            content_type: output.content_type().map(str::to_string),
            etag: output.e_tag().map(str::to_string),
            last_modified: to_chrono(output.last_modified()),
            version_id: output.version_id().map(str::to_string),
            user_metadata: output.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn copy_object(
        &self,
        bucket: &str,
        key: &str,
        source: &ObjectSource,
    ) -> TransportResult<PutOutput> {
        let output = self
            .client
            .copy_object()
            .bucket(bucket)
            .key(key)
            .copy_source(source.copy_source_header())
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(PutOutput {
            etag: output
                .copy_object_result()
                .and_then(|result| result.e_tag())
                .map(str::to_string),
            version_id: output.version_id().map(str::to_string),
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> TransportResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> TransportResult<Vec<DeleteOutcome>> {
        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(build_error)?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(false)
            .build()
            .map_err(build_error)?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(sdk_error)?;

        let mut outcomes: Vec<DeleteOutcome> = output
            .deleted()
            .iter()
            .filter_map(|deleted| deleted.key())
            .map(|key| DeleteOutcome::Deleted {
                key: key.to_string(),
            })
            .collect();
        outcomes.extend(output.errors().iter().filter_map(|error| {
            error.key().map(|key| DeleteOutcome::Failed {
                key: key.to_string(),
                code: error.code().unwrap_or("Unknown").to_string(),
                message: error.message().unwrap_or_default().to_string(),
            })
        }));
        Ok(outcomes)
    }

    async fn get_object_tagging(
        &self,
        bucket: &str,
        key: &str,
    ) -> TransportResult<HashMap<String, String>> {
        let output = self
            .client
            .get_object_tagging()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(output
            .tag_set()
            .iter()
            .map(|tag| (tag.key().to_string(), tag.value().to_string()))
            .collect())
    }

    async fn put_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        tags: &HashMap<String, String>,
    ) -> TransportResult<()> {
        let tag_set = tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(build_error)?;
        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(build_error)?;

        self.client
            .put_object_tagging()
            .bucket(bucket)
            .key(key)
            .tagging(tagging)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn delete_object_tagging(&self, bucket: &str, key: &str) -> TransportResult<()> {
        self.client
            .delete_object_tagging()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<String>,
    ) -> TransportResult<ObjectPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_delimiter(delimiter.map(str::to_string))
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(sdk_error)?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                object.key().map(|key| ObjectSummary {
                    key: key.to_string(),
                    size: size_of(object.size()),
                    etag: object.e_tag().map(str::to_string),
                    last_modified: to_chrono(object.last_modified()),
                    is_prefix: false,
                })
            })
            .collect();
        let common_prefixes = output
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect();

        Ok(ObjectPage {
            objects,
            common_prefixes,
            next_continuation: output
                .next_continuation_token()
                .filter(|_| output.is_truncated().unwrap_or(false))
                .map(str::to_string),
        })
    }

    async fn head_bucket(&self, bucket: &str) -> TransportResult<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn create_bucket(&self, bucket: &str) -> TransportResult<()> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        request.send().await.map_err(sdk_error)?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> TransportResult<()> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn list_buckets(&self) -> TransportResult<Vec<BucketInfo>> {
        let output = self.client.list_buckets().send().await.map_err(sdk_error)?;
        Ok(output
            .buckets()
            .iter()
            .filter_map(|bucket| {
                bucket.name().map(|name| BucketInfo {
                    name: name.to_string(),
                    created: to_chrono(bucket.creation_date()),
                })
            })
            .collect())
    }
}
